//! PostgreSQL ledger store.
//!
//! A unit of work is one database transaction:
//! - `get_for_update` takes a `FOR NO KEY UPDATE` row lock (compatible with the
//!   key-share locks taken by foreign key checks on `transactions`)
//! - `apply_delta` is a guarded `UPDATE ... WHERE balance + $1 >= 0`, so the
//!   database rejects a negative result even if a caller skipped the pre-check
//! - `insert_transaction` relies on the unique `transaction_id` index; a
//!   concurrent insert of the same id blocks until the other transaction ends

use std::collections::HashSet;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use sqlx::Postgres;

use super::{
    AccountStore, LedgerStore, StoreError, StoreResult, TransactionLog, UnitOfWork,
};
use crate::db::DbPool;
use crate::models::account::{Account, NewAccount};
use crate::models::transaction::{Transaction, TransactionFilter};

const SELECT_ACCOUNT: &str = r#"
    SELECT account_id, user_id, balance, currency, created_at, updated_at
    FROM accounts
    WHERE account_id = $1
"#;

const SELECT_ACCOUNT_FOR_UPDATE: &str = r#"
    SELECT account_id, user_id, balance, currency, created_at, updated_at
    FROM accounts
    WHERE account_id = $1
    FOR NO KEY UPDATE
"#;

const INSERT_ACCOUNT: &str = r#"
    INSERT INTO accounts (account_id, user_id, balance, currency)
    VALUES ($1, $2, 0, $3)
    ON CONFLICT (account_id) DO NOTHING
    RETURNING account_id, user_id, balance, currency, created_at, updated_at
"#;

const APPLY_DELTA: &str = r#"
    UPDATE accounts
    SET balance = balance + $1,
        updated_at = NOW()
    WHERE account_id = $2
      AND balance + $1 >= 0
    RETURNING account_id, user_id, balance, currency, created_at, updated_at
"#;

const SELECT_TRANSACTION: &str = r#"
    SELECT transaction_id, from_account_id, to_account_id, amount, commission,
           currency, description, from_balance_after, to_balance_after, created_at
    FROM transactions
    WHERE transaction_id = $1
"#;

const INSERT_TRANSACTION: &str = r#"
    INSERT INTO transactions (
        transaction_id,
        from_account_id,
        to_account_id,
        amount,
        commission,
        currency,
        description,
        from_balance_after,
        to_balance_after,
        created_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
    ON CONFLICT (transaction_id) DO NOTHING
    RETURNING transaction_id, from_account_id, to_account_id, amount, commission,
              currency, description, from_balance_after, to_balance_after, created_at
"#;

const LIST_TRANSACTIONS: &str = r#"
    SELECT transaction_id, from_account_id, to_account_id, amount, commission,
           currency, description, from_balance_after, to_balance_after, created_at
    FROM transactions
    WHERE ($1::text IS NULL OR from_account_id = $1 OR to_account_id = $1)
      AND ($2::timestamptz IS NULL OR created_at >= $2)
      AND ($3::timestamptz IS NULL OR created_at < $3)
    ORDER BY created_at, id
    LIMIT $4
"#;

/// Ledger store backed by PostgreSQL.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for PgStore {
    async fn get_account(&self, account_id: &str) -> StoreResult<Account> {
        sqlx::query_as::<_, Account>(SELECT_ACCOUNT)
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(account_id.to_string()))
    }

    async fn create_account(&self, new: NewAccount) -> StoreResult<Account> {
        sqlx::query_as::<_, Account>(INSERT_ACCOUNT)
            .bind(&new.account_id)
            .bind(&new.user_id)
            .bind(&new.currency)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::AlreadyExists(new.account_id.clone()))
    }
}

#[async_trait]
impl TransactionLog for PgStore {
    async fn get_transaction(&self, transaction_id: &str) -> StoreResult<Transaction> {
        sqlx::query_as::<_, Transaction>(SELECT_TRANSACTION)
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(transaction_id.to_string()))
    }

    fn list_transactions(
        &self,
        filter: TransactionFilter,
    ) -> BoxStream<'_, StoreResult<Transaction>> {
        let limit = filter.limit.map(|limit| limit as i64);

        sqlx::query_as::<_, Transaction>(LIST_TRANSACTIONS)
            .bind(filter.account_id)
            .bind(filter.created_from)
            .bind(filter.created_to)
            .bind(limit)
            .fetch(&self.pool)
            .map(|row| row.map_err(StoreError::from))
            .boxed()
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnit {
            tx,
            held: HashSet::new(),
        }))
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Unit of work over one PostgreSQL transaction.
pub struct PgUnit {
    tx: sqlx::Transaction<'static, Postgres>,
    /// Accounts row-locked by this transaction
    held: HashSet<String>,
}

#[async_trait]
impl UnitOfWork for PgUnit {
    async fn get_for_update(&mut self, account_id: &str) -> StoreResult<Account> {
        let account = sqlx::query_as::<_, Account>(SELECT_ACCOUNT_FOR_UPDATE)
            .bind(account_id)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(account_id.to_string()))?;

        self.held.insert(account_id.to_string());
        Ok(account)
    }

    async fn apply_delta(&mut self, account_id: &str, delta: i64) -> StoreResult<Account> {
        if !self.held.contains(account_id) {
            return Err(StoreError::NotLocked(account_id.to_string()));
        }

        // The row is locked by this transaction, so no row means the guard failed.
        sqlx::query_as::<_, Account>(APPLY_DELTA)
            .bind(delta)
            .bind(account_id)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| StoreError::InsufficientFunds(account_id.to_string()))
    }

    async fn insert_transaction(&mut self, record: Transaction) -> StoreResult<Transaction> {
        sqlx::query_as::<_, Transaction>(INSERT_TRANSACTION)
            .bind(&record.transaction_id)
            .bind(&record.from_account_id)
            .bind(&record.to_account_id)
            .bind(record.amount)
            .bind(record.commission)
            .bind(&record.currency)
            .bind(&record.description)
            .bind(record.from_balance_after)
            .bind(record.to_balance_after)
            .bind(record.created_at)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| StoreError::AlreadyExists(record.transaction_id.clone()))
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
