//! Transfer commission.
//!
//! Rates are basis points: 300 = 3.00%. The commission is withheld from the
//! destination credit and recorded on the transaction; it is not credited to
//! any account.

/// Basis point precision (10^4 = 100%)
pub const BPS_PRECISION: i64 = 10_000;

/// Default commission rate (300 = 3.00%)
pub const DEFAULT_COMMISSION_BPS: u32 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommissionPolicy {
    rate_bps: u32,
}

impl Default for CommissionPolicy {
    fn default() -> Self {
        Self {
            rate_bps: DEFAULT_COMMISSION_BPS,
        }
    }
}

impl CommissionPolicy {
    /// Returns `None` for rates above 100%.
    pub fn new(rate_bps: u32) -> Option<Self> {
        (i64::from(rate_bps) <= BPS_PRECISION).then_some(Self { rate_bps })
    }

    pub fn rate_bps(&self) -> u32 {
        self.rate_bps
    }

    /// Commission for a positive amount, rounded half up to the nearest minor unit.
    ///
    /// Uses an i128 intermediate so `amount * rate` cannot overflow.
    ///
    /// ```
    /// use transfer_ledger::services::commission::CommissionPolicy;
    /// let policy = CommissionPolicy::default();
    /// assert_eq!(policy.commission_for(300), 9);
    /// ```
    pub fn commission_for(&self, amount: i64) -> i64 {
        let precision = i128::from(BPS_PRECISION);
        let scaled = i128::from(amount) * i128::from(self.rate_bps) + precision / 2;
        // rate <= 100%, so the quotient never exceeds `amount`
        (scaled / precision) as i64
    }

    /// Amount credited to the destination.
    pub fn net_amount(&self, amount: i64) -> i64 {
        amount - self.commission_for(amount)
    }
}
