//! Transfer Gateway - the client-facing entry point for transfers.
//!
//! The gateway validates a [`TransferRequest`], settles its idempotency key
//! and forwards it as ONE request to a [`LedgerClient`]. It never applies
//! either half of a transfer itself, so a transfer is atomic regardless of
//! whether the ledger runs in-process or behind HTTP.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::debug;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::account::{Account, CreateAccountRequest};
use crate::models::transaction::{
    DailySummary, Transaction, TransactionFilter, TransferOutcome, TransferRequest,
};
use crate::services::ledger::{Ledger, TransferCommand, validate_transfer};

/// Everything the HTTP surface needs from a ledger.
///
/// Implemented by the in-process [`Ledger`] and by
/// [`RemoteLedger`](crate::services::remote::RemoteLedger).
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn transfer(&self, command: TransferCommand) -> Result<TransferOutcome, AppError>;

    async fn get_transaction(&self, transaction_id: &str) -> Result<Transaction, AppError>;

    async fn list_transactions(
        &self,
        filter: TransactionFilter,
    ) -> Result<Vec<Transaction>, AppError>;

    async fn daily_summary(&self, day: NaiveDate) -> Result<DailySummary, AppError>;

    async fn get_account(&self, account_id: &str) -> Result<Account, AppError>;

    async fn create_account(&self, request: CreateAccountRequest) -> Result<Account, AppError>;

    async fn deposit(&self, account_id: &str, amount: i64) -> Result<Account, AppError>;

    async fn health(&self) -> Result<(), AppError>;
}

#[async_trait]
impl LedgerClient for Ledger {
    async fn transfer(&self, command: TransferCommand) -> Result<TransferOutcome, AppError> {
        Ledger::transfer(self, command).await
    }

    async fn get_transaction(&self, transaction_id: &str) -> Result<Transaction, AppError> {
        Ledger::get_transaction(self, transaction_id).await
    }

    async fn list_transactions(
        &self,
        filter: TransactionFilter,
    ) -> Result<Vec<Transaction>, AppError> {
        Ledger::list_transactions(self, filter).await
    }

    async fn daily_summary(&self, day: NaiveDate) -> Result<DailySummary, AppError> {
        Ledger::daily_summary(self, day).await
    }

    async fn get_account(&self, account_id: &str) -> Result<Account, AppError> {
        Ledger::get_account(self, account_id).await
    }

    async fn create_account(&self, request: CreateAccountRequest) -> Result<Account, AppError> {
        Ledger::create_account(self, request).await
    }

    async fn deposit(&self, account_id: &str, amount: i64) -> Result<Account, AppError> {
        Ledger::deposit(self, account_id, amount).await
    }

    async fn health(&self) -> Result<(), AppError> {
        Ledger::health(self).await
    }
}

pub struct TransferGateway {
    ledger: Arc<dyn LedgerClient>,
}

impl TransferGateway {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self { ledger }
    }

    /// Validate and forward a transfer.
    ///
    /// A missing `transaction_id` is replaced by a fresh UUID v4, which is
    /// returned in the outcome. Invalid requests never reach the ledger.
    pub async fn submit(&self, request: TransferRequest) -> Result<TransferOutcome, AppError> {
        let transaction_id = match request.transaction_id {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                debug!(transaction_id = %id, "assigned transaction id");
                id
            }
        };

        let command = TransferCommand {
            transaction_id,
            from_account_id: request.from_account_id,
            to_account_id: request.to_account_id,
            amount: request.amount,
            description: request.description,
        };
        validate_transfer(&command)?;

        self.ledger.transfer(command).await
    }
}
