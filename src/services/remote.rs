//! HTTP client for a ledger running as a separate service.
//!
//! A transfer is forwarded as ONE `POST /api/v1/transfers` carrying its
//! transaction id. Retries of transient failures resend the same id, so the
//! remote ledger either applies the transfer once or replays the committed
//! result. Non-idempotent calls (account creation, deposits) are never retried.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use tracing::warn;
use url::Url;

use crate::error::{AppError, ErrorBody};
use crate::models::account::{Account, CreateAccountRequest, DepositRequest};
use crate::models::transaction::{
    DailySummary, Transaction, TransactionFilter, TransferOutcome, TransferRequest,
};
use crate::services::gateway::LedgerClient;
use crate::services::ledger::TransferCommand;

/// Base delay between retries; attempt `n` waits `n` times this.
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

pub struct RemoteLedger {
    client: reqwest::Client,
    base: Url,
    retries: u32,
    backoff: Duration,
}

impl RemoteLedger {
    /// Build a client for the ledger service at `base`.
    ///
    /// `timeout` bounds each attempt; `retries` is the number of extra
    /// attempts made after a transient failure.
    pub fn new(base: Url, timeout: Duration, retries: u32) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base,
            retries,
            backoff: RETRY_BACKOFF,
        })
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, AppError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| {
                AppError::StorageUnavailable(format!("ledger url {} cannot be a base", self.base))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn retrying<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> Result<T, AppError>
    where
        T: Send,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, AppError>> + Send,
    {
        let mut tries: u32 = 0;
        loop {
            match attempt().await {
                Err(err) if err.is_transient() && tries < self.retries => {
                    tries += 1;
                    warn!(operation, attempt = tries, error = %err, "ledger call failed, retrying");
                    tokio::time::sleep(self.backoff * tries).await;
                }
                result => return result,
            }
        }
    }
}

/// Send one request and decode either the payload or the error envelope.
async fn execute<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, AppError> {
    let response = request
        .send()
        .await
        .map_err(|e| AppError::StorageUnavailable(format!("ledger service unreachable: {e}")))?;

    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|e| AppError::StorageUnavailable(format!("malformed ledger response: {e}")));
    }

    match response.json::<ErrorBody>().await {
        Ok(body) => Err(body.into()),
        Err(_) => Err(AppError::StorageUnavailable(format!(
            "ledger service returned {status}"
        ))),
    }
}

#[async_trait]
impl LedgerClient for RemoteLedger {
    async fn transfer(&self, command: TransferCommand) -> Result<TransferOutcome, AppError> {
        let url = self.endpoint(&["api", "v1", "transfers"])?;
        let body = TransferRequest {
            transaction_id: Some(command.transaction_id),
            from_account_id: command.from_account_id,
            to_account_id: command.to_account_id,
            amount: command.amount,
            description: command.description,
        };

        self.retrying("transfer", || {
            execute(self.client.post(url.clone()).json(&body))
        })
        .await
    }

    async fn get_transaction(&self, transaction_id: &str) -> Result<Transaction, AppError> {
        let url = self.endpoint(&["api", "v1", "transactions", transaction_id])?;
        self.retrying("get_transaction", || execute(self.client.get(url.clone())))
            .await
    }

    async fn list_transactions(
        &self,
        filter: TransactionFilter,
    ) -> Result<Vec<Transaction>, AppError> {
        let url = self.endpoint(&["api", "v1", "transactions"])?;
        self.retrying("list_transactions", || {
            execute(self.client.get(url.clone()).query(&filter))
        })
        .await
    }

    async fn daily_summary(&self, day: NaiveDate) -> Result<DailySummary, AppError> {
        let url = self.endpoint(&["api", "v1", "reports", "daily"])?;
        let day = day.to_string();
        self.retrying("daily_summary", || {
            execute(self.client.get(url.clone()).query(&[("day", day.as_str())]))
        })
        .await
    }

    async fn get_account(&self, account_id: &str) -> Result<Account, AppError> {
        let url = self.endpoint(&["api", "v1", "accounts", account_id])?;
        self.retrying("get_account", || execute(self.client.get(url.clone())))
            .await
    }

    async fn create_account(&self, request: CreateAccountRequest) -> Result<Account, AppError> {
        let url = self.endpoint(&["api", "v1", "accounts"])?;
        execute(self.client.post(url).json(&request)).await
    }

    async fn deposit(&self, account_id: &str, amount: i64) -> Result<Account, AppError> {
        let url = self.endpoint(&["api", "v1", "accounts", account_id, "deposits"])?;
        execute(self.client.post(url).json(&DepositRequest { amount })).await
    }

    async fn health(&self) -> Result<(), AppError> {
        let url = self.endpoint(&["health"])?;
        self.retrying("health", || {
            execute::<serde_json::Value>(self.client.get(url.clone()))
        })
        .await
        .map(|_| ())
    }
}
