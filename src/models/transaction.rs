//! Transaction (transfer record) models and API request/response types.
//!
//! This module defines:
//! - `Transaction`: the immutable record persisted once per transaction id
//! - `TransferRequest`: request body accepted by the gateway
//! - `TransferOutcome`: record plus both post-transfer account snapshots
//! - `TransactionFilter` and `DailySummary` for reporting reads

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::models::account::Account;

/// Represents a persisted transfer record.
///
/// # Invariants
///
/// - Immutable once committed
/// - `amount > 0`, `commission >= 0`
/// - `commission = round_half_up(amount * rate)`; the destination receives
///   `amount - commission` and the source is debited `amount`
///
/// The commission is an accounting entry only: it is recorded here and not
/// credited to any account.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize, Deserialize)]
pub struct Transaction {
    /// Caller-supplied idempotency key, never regenerated by the ledger
    pub transaction_id: String,

    pub from_account_id: String,

    pub to_account_id: String,

    /// Amount debited from the source, in minor units
    pub amount: i64,

    /// Commission withheld from the destination credit, in minor units
    pub commission: i64,

    pub currency: String,

    pub description: Option<String>,

    /// Source balance right after this transfer committed
    pub from_balance_after: i64,

    /// Destination balance right after this transfer committed
    pub to_balance_after: i64,

    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Amount credited to the destination account.
    pub fn net_amount(&self) -> i64 {
        self.amount - self.commission
    }

    /// Whether a retried request describes the same transfer as this record.
    pub fn matches(&self, from_account_id: &str, to_account_id: &str, amount: i64) -> bool {
        self.from_account_id == from_account_id
            && self.to_account_id == to_account_id
            && self.amount == amount
    }

    /// `account` as it stood when this transfer committed.
    ///
    /// Balances come from the record, so the snapshot does not move with
    /// later transfers on the same account.
    pub fn snapshot_of(&self, mut account: Account) -> Account {
        if account.account_id == self.from_account_id {
            account.balance = self.from_balance_after;
        } else if account.account_id == self.to_account_id {
            account.balance = self.to_balance_after;
        }
        account.updated_at = self.created_at;
        account
    }
}

/// Request to transfer money between accounts.
///
/// # JSON Example
///
/// ```json
/// {
///   "transaction_id": "0f8fad5b-d9cb-469f-a165-70867728950e",
///   "from_account_id": "acc-a",
///   "to_account_id": "acc-b",
///   "amount": 30000,
///   "description": "Invoice 789"
/// }
/// ```
///
/// `transaction_id` is the idempotency key. When omitted, the gateway assigns
/// one and returns it; clients that want safe retries should generate their own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    #[serde(default)]
    pub transaction_id: Option<String>,

    pub from_account_id: String,

    pub to_account_id: String,

    /// Amount to transfer in minor units
    pub amount: i64,

    #[serde(default)]
    pub description: Option<String>,
}

/// Result of a transfer, as returned by the ledger and rendered to clients.
///
/// `replayed` is true when the transaction id had already been committed and
/// this response reports that earlier result without re-applying anything.
/// Account snapshots are taken as of the transfer, so a replay returns the
/// same balances as the first response even after later transfers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub transaction: Transaction,
    pub from_account: Account,
    pub to_account: Account,
    pub replayed: bool,
}

/// Filter for listing transactions.
///
/// Query string example: `?account_id=acc-a&from=2025-01-01T00:00:00Z&limit=50`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionFilter {
    /// Match records where this account is the source or the destination
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,

    /// Inclusive lower bound on `created_at`
    #[serde(default, rename = "from", skip_serializing_if = "Option::is_none")]
    pub created_from: Option<DateTime<Utc>>,

    /// Exclusive upper bound on `created_at`
    #[serde(default, rename = "to", skip_serializing_if = "Option::is_none")]
    pub created_to: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl TransactionFilter {
    /// Whether a record passes the account and time bounds (the limit is applied by the caller).
    pub fn admits(&self, transaction: &Transaction) -> bool {
        if let Some(ref account_id) = self.account_id {
            if &transaction.from_account_id != account_id && &transaction.to_account_id != account_id
            {
                return false;
            }
        }
        if let Some(from) = self.created_from {
            if transaction.created_at < from {
                return false;
            }
        }
        if let Some(to) = self.created_to {
            if transaction.created_at >= to {
                return false;
            }
        }
        true
    }
}

/// Aggregate over one UTC day of transfers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub day: NaiveDate,
    pub transaction_count: u64,
    pub total_amount: i64,
    pub total_commission: i64,
    /// Integer mean of `amount`, rounded half up; zero when there were no transfers
    pub average_amount: i64,
}

#[derive(Debug, Deserialize)]
pub struct DailySummaryQuery {
    pub day: NaiveDate,
}
