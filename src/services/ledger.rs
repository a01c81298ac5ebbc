//! Ledger - the transfer engine.
//!
//! This service owns every balance change:
//! - Validation before any lock is taken
//! - Canonical lock order (ascending account id) for every multi-account unit
//! - Exactly-once transfer records keyed by the caller's transaction id
//! - Rollback of the whole unit on any failure
//!
//! # Atomicity Guarantees
//!
//! Both balance deltas and the transfer record are staged in one
//! [`UnitOfWork`] and become visible together at commit. No path reports a
//! failure while leaving part of a unit applied.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use futures::{StreamExt, TryStreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::account::{Account, CreateAccountRequest, NewAccount};
use crate::models::transaction::{DailySummary, Transaction, TransactionFilter, TransferOutcome};
use crate::services::commission::CommissionPolicy;
use crate::store::{LedgerStore, StoreError, UnitOfWork};

/// Default page size for collected listings.
pub const DEFAULT_LIST_LIMIT: usize = 100;

/// Hard cap on collected listings.
pub const MAX_LIST_LIMIT: usize = 1_000;

/// Longest accepted account or transaction identifier.
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// A validated transfer as the ledger receives it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferCommand {
    /// Idempotency key supplied by the caller (or assigned by the gateway)
    pub transaction_id: String,
    pub from_account_id: String,
    pub to_account_id: String,
    pub amount: i64,
    pub description: Option<String>,
}

/// Check that an identifier is safe to use as a key and in a URL path.
///
/// Accepts 1 to 128 characters from `[A-Za-z0-9._:-]`.
pub fn validate_identifier(field: &str, value: &str) -> Result<(), AppError> {
    if value.is_empty() || value.len() > MAX_IDENTIFIER_LEN {
        return Err(AppError::InvalidRequest(format!(
            "{field} must be 1 to {MAX_IDENTIFIER_LEN} characters"
        )));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-'))
    {
        return Err(AppError::InvalidRequest(format!(
            "{field} may only contain letters, digits, '.', '_', ':' and '-'"
        )));
    }
    Ok(())
}

/// Validate a transfer before any storage access.
pub fn validate_transfer(command: &TransferCommand) -> Result<(), AppError> {
    validate_identifier("transaction_id", &command.transaction_id)?;
    validate_identifier("from_account_id", &command.from_account_id)?;
    validate_identifier("to_account_id", &command.to_account_id)?;

    if command.amount <= 0 {
        return Err(AppError::InvalidRequest(
            "Amount must be positive".to_string(),
        ));
    }
    if command.from_account_id == command.to_account_id {
        return Err(AppError::InvalidRequest(
            "Cannot transfer to same account".to_string(),
        ));
    }
    Ok(())
}

/// The two account ids of a transfer in lock order.
fn lock_order<'a>(a: &'a str, b: &'a str) -> [&'a str; 2] {
    if a <= b { [a, b] } else { [b, a] }
}

/// Why a transfer unit stopped before commit.
enum Halt {
    /// The transaction id is already committed; report the earlier result.
    Duplicate,
    Rejected(AppError),
}

impl From<AppError> for Halt {
    fn from(err: AppError) -> Self {
        Halt::Rejected(err)
    }
}

/// Map store errors raised while an account is involved.
fn account_error(err: StoreError) -> AppError {
    match err {
        StoreError::NotFound(id) => AppError::AccountNotFound(id),
        StoreError::InsufficientFunds(_) => AppError::InsufficientFunds,
        other => other.into(),
    }
}

/// Map store errors raised by `commit`.
fn commit_error(err: StoreError) -> AppError {
    match err {
        StoreError::Unavailable(msg) => AppError::StorageUnavailable(msg),
        other => AppError::AbortedUnitOfWork(other.to_string()),
    }
}

/// Map store errors raised while reading a transaction record.
fn transaction_error(err: StoreError) -> AppError {
    match err {
        StoreError::NotFound(id) => AppError::TransactionNotFound(id),
        other => other.into(),
    }
}

/// Discard a unit, logging (not surfacing) a failed rollback.
///
/// A unit whose rollback fails is dropped anyway, which releases its holds
/// and never publishes its changes.
async fn abandon(unit: Box<dyn UnitOfWork>, transaction_id: &str) {
    if let Err(err) = unit.rollback().await {
        warn!(transaction_id, error = %err, "rollback failed, unit discarded");
    }
}

/// The transfer engine.
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    commission: CommissionPolicy,
}

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>, commission: CommissionPolicy) -> Self {
        Self { store, commission }
    }

    pub fn commission(&self) -> CommissionPolicy {
        self.commission
    }

    /// Move `amount` from one account to another.
    ///
    /// # Process
    ///
    /// 1. Validate the request (no lock taken)
    /// 2. Return the committed result if the transaction id is already recorded
    /// 3. Begin a unit of work
    /// 4. Hold both accounts, lowest id first
    /// 5. Reject a currency mismatch
    /// 6. Insert the record (a concurrent duplicate surfaces here)
    /// 7. Check funds against the held balance
    /// 8. Apply the debit and the net credit, lowest id first
    /// 9. Commit (or roll back on any error)
    ///
    /// # Errors
    ///
    /// - `InvalidRequest`: bad identifier, non-positive amount, same account
    /// - `AccountNotFound`: either account does not exist
    /// - `CurrencyMismatch`: accounts hold different currencies
    /// - `InsufficientFunds`: source balance below `amount`
    /// - `IdempotencyConflict`: id already used for a different transfer
    /// - `AbortedUnitOfWork` / `StorageUnavailable`: rolled back, retry with the same id
    pub async fn transfer(&self, command: TransferCommand) -> Result<TransferOutcome, AppError> {
        validate_transfer(&command)?;

        match self.store.get_transaction(&command.transaction_id).await {
            Ok(existing) => return self.replay(existing, &command).await,
            Err(StoreError::NotFound(_)) => {}
            Err(err) => return Err(err.into()),
        }

        let mut unit = self.store.begin().await?;
        let staged = self.transfer_in_unit(unit.as_mut(), &command).await;
        match staged {
            Ok((transaction, from_account, to_account)) => {
                unit.commit().await.map_err(commit_error)?;
                info!(
                    transaction_id = %transaction.transaction_id,
                    from = %transaction.from_account_id,
                    to = %transaction.to_account_id,
                    amount = transaction.amount,
                    commission = transaction.commission,
                    "transfer committed"
                );
                Ok(TransferOutcome {
                    transaction,
                    from_account,
                    to_account,
                    replayed: false,
                })
            }
            Err(Halt::Duplicate) => {
                abandon(unit, &command.transaction_id).await;
                let existing = self
                    .store
                    .get_transaction(&command.transaction_id)
                    .await
                    .map_err(transaction_error)?;
                self.replay(existing, &command).await
            }
            Err(Halt::Rejected(err)) => {
                abandon(unit, &command.transaction_id).await;
                warn!(
                    transaction_id = %command.transaction_id,
                    error = %err,
                    "transfer rolled back"
                );
                Err(err)
            }
        }
    }

    async fn transfer_in_unit(
        &self,
        unit: &mut dyn UnitOfWork,
        command: &TransferCommand,
    ) -> Result<(Transaction, Account, Account), Halt> {
        let from_id = command.from_account_id.as_str();
        let to_id = command.to_account_id.as_str();

        let mut from_account = None;
        let mut to_account = None;
        for account_id in lock_order(from_id, to_id) {
            let account = unit.get_for_update(account_id).await.map_err(account_error)?;
            debug!(transaction_id = %command.transaction_id, account_id, "account held");
            if account_id == from_id {
                from_account = Some(account);
            } else {
                to_account = Some(account);
            }
        }
        let (Some(from_account), Some(to_account)) = (from_account, to_account) else {
            return Err(Halt::Rejected(AppError::AbortedUnitOfWork(
                "account hold missing".to_string(),
            )));
        };

        if from_account.currency != to_account.currency {
            return Err(Halt::Rejected(AppError::CurrencyMismatch(format!(
                "{} holds {}, {} holds {}",
                from_account.account_id,
                from_account.currency,
                to_account.account_id,
                to_account.currency
            ))));
        }

        // Accounts are held, so the balances after the deltas are known now
        // and travel with the record.
        let commission = self.commission.commission_for(command.amount);
        let net = command.amount - commission;
        let to_balance_after = to_account.balance.checked_add(net).ok_or_else(|| {
            AppError::InvalidRequest(format!(
                "transfer would overflow the balance of {}",
                to_account.account_id
            ))
        })?;

        let record = Transaction {
            transaction_id: command.transaction_id.clone(),
            from_account_id: command.from_account_id.clone(),
            to_account_id: command.to_account_id.clone(),
            amount: command.amount,
            commission,
            currency: from_account.currency.clone(),
            description: command.description.clone(),
            from_balance_after: from_account.balance - command.amount,
            to_balance_after,
            created_at: Utc::now(),
        };
        let transaction = match unit.insert_transaction(record).await {
            Ok(transaction) => transaction,
            Err(StoreError::AlreadyExists(_)) => return Err(Halt::Duplicate),
            Err(err) => return Err(Halt::Rejected(err.into())),
        };

        if from_account.balance < command.amount {
            return Err(Halt::Rejected(AppError::InsufficientFunds));
        }

        for account_id in lock_order(from_id, to_id) {
            let delta = if account_id == from_id { -command.amount } else { net };
            unit.apply_delta(account_id, delta)
                .await
                .map_err(account_error)?;
        }

        let from_account = transaction.snapshot_of(from_account);
        let to_account = transaction.snapshot_of(to_account);
        Ok((transaction, from_account, to_account))
    }

    /// Report an already committed transfer without touching any balance.
    async fn replay(
        &self,
        existing: Transaction,
        command: &TransferCommand,
    ) -> Result<TransferOutcome, AppError> {
        if !existing.matches(&command.from_account_id, &command.to_account_id, command.amount) {
            warn!(
                transaction_id = %command.transaction_id,
                "transaction id reused with different parameters"
            );
            return Err(AppError::IdempotencyConflict(command.transaction_id.clone()));
        }

        let from_account = self
            .store
            .get_account(&existing.from_account_id)
            .await
            .map_err(account_error)?;
        let to_account = self
            .store
            .get_account(&existing.to_account_id)
            .await
            .map_err(account_error)?;
        let from_account = existing.snapshot_of(from_account);
        let to_account = existing.snapshot_of(to_account);

        info!(transaction_id = %existing.transaction_id, "transfer replayed");
        Ok(TransferOutcome {
            transaction: existing,
            from_account,
            to_account,
            replayed: true,
        })
    }

    /// Manual top-up through the same delta-apply primitive as transfers.
    pub async fn deposit(&self, account_id: &str, amount: i64) -> Result<Account, AppError> {
        validate_identifier("account_id", account_id)?;
        if amount <= 0 {
            return Err(AppError::InvalidRequest(
                "Amount must be positive".to_string(),
            ));
        }

        let mut unit = self.store.begin().await?;
        let staged = async {
            unit.get_for_update(account_id).await?;
            unit.apply_delta(account_id, amount).await
        }
        .await;

        match staged {
            Ok(account) => {
                unit.commit().await.map_err(commit_error)?;
                info!(account_id, amount, balance = account.balance, "deposit committed");
                Ok(account)
            }
            Err(err) => {
                abandon(unit, account_id).await;
                Err(account_error(err))
            }
        }
    }

    pub async fn create_account(&self, request: CreateAccountRequest) -> Result<Account, AppError> {
        let account_id = match request.account_id {
            Some(id) => {
                validate_identifier("account_id", &id)?;
                id
            }
            None => Uuid::new_v4().to_string(),
        };
        if request.user_id.trim().is_empty() {
            return Err(AppError::InvalidRequest("user_id is required".to_string()));
        }
        if request.currency.len() != 3 || !request.currency.chars().all(|c| c.is_ascii_uppercase())
        {
            return Err(AppError::InvalidRequest(
                "currency must be a 3-letter ISO 4217 code".to_string(),
            ));
        }

        let account = self
            .store
            .create_account(NewAccount {
                account_id,
                user_id: request.user_id,
                currency: request.currency,
            })
            .await
            .map_err(|err| match err {
                StoreError::AlreadyExists(id) => {
                    AppError::InvalidRequest(format!("account {id} already exists"))
                }
                other => other.into(),
            })?;

        info!(account_id = %account.account_id, currency = %account.currency, "account created");
        Ok(account)
    }

    pub async fn get_account(&self, account_id: &str) -> Result<Account, AppError> {
        self.store.get_account(account_id).await.map_err(account_error)
    }

    pub async fn get_transaction(&self, transaction_id: &str) -> Result<Transaction, AppError> {
        self.store
            .get_transaction(transaction_id)
            .await
            .map_err(transaction_error)
    }

    /// Collect one page of the ordered transaction sequence.
    ///
    /// The limit defaults to [`DEFAULT_LIST_LIMIT`] and is capped at [`MAX_LIST_LIMIT`].
    pub async fn list_transactions(
        &self,
        mut filter: TransactionFilter,
    ) -> Result<Vec<Transaction>, AppError> {
        let limit = filter
            .limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .min(MAX_LIST_LIMIT);
        filter.limit = Some(limit);

        self.store
            .list_transactions(filter)
            .map_err(AppError::from)
            .try_collect()
            .await
    }

    /// Aggregate every transfer created on `day` (UTC).
    pub async fn daily_summary(&self, day: NaiveDate) -> Result<DailySummary, AppError> {
        let start = Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN));
        let filter = TransactionFilter {
            created_from: Some(start),
            created_to: Some(start + chrono::Duration::days(1)),
            ..Default::default()
        };

        let mut count: u64 = 0;
        let mut total_amount: i64 = 0;
        let mut total_commission: i64 = 0;

        let mut records = self.store.list_transactions(filter);
        while let Some(record) = records.next().await {
            let record = record?;
            count += 1;
            total_amount = total_amount.saturating_add(record.amount);
            total_commission = total_commission.saturating_add(record.commission);
        }

        let average_amount = if count == 0 {
            0
        } else {
            let count = i128::from(count);
            ((i128::from(total_amount) + count / 2) / count) as i64
        };

        Ok(DailySummary {
            day,
            transaction_count: count,
            total_amount,
            total_commission,
            average_amount,
        })
    }

    pub async fn health(&self) -> Result<(), AppError> {
        self.store.ping().await.map_err(AppError::from)
    }
}
