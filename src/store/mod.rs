//! Storage seams consumed by the ledger.
//!
//! The ledger depends on exactly three things from storage:
//! - [`AccountStore`]: plain account reads (and creation, for seeding)
//! - [`TransactionLog`]: record reads and the ordered, restartable listing
//! - [`UnitOfWork`]: the atomic unit in which accounts are held for update,
//!   balance deltas are applied and the record is inserted exactly once
//!
//! Two backends implement these traits: [`memory::MemoryStore`] and
//! [`postgres::PgStore`].

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::models::account::{Account, NewAccount};
use crate::models::transaction::{Transaction, TransactionFilter};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Storage-level failures.
///
/// Identifiers are carried so the ledger can report which account or
/// transaction was involved.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    /// A transaction record with this id is already committed.
    #[error("record already exists: {0}")]
    AlreadyExists(String),

    /// Applying the delta would make the balance negative.
    #[error("insufficient funds on account {0}")]
    InsufficientFunds(String),

    /// `apply_delta` was called on an account this unit does not hold.
    #[error("account {0} is not held by this unit of work")]
    NotLocked(String),

    /// The resulting balance does not fit the balance type.
    #[error("value out of range: {0}")]
    OutOfRange(String),

    #[error("unit of work aborted: {0}")]
    Aborted(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Classify driver errors into the storage taxonomy.
///
/// SQLSTATE classes:
/// - `23505` unique violation, `23503` foreign key, `23514` check
/// - `22003` numeric value out of range
/// - `40P01` deadlock, `40001` serialization failure, `55P03` lock not available
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row".to_string()),
            sqlx::Error::Database(ref db) => match db.code().as_deref() {
                Some("23505") => StoreError::AlreadyExists(db.message().to_string()),
                Some("23503") => StoreError::NotFound(db.message().to_string()),
                Some("23514") => StoreError::InsufficientFunds(db.message().to_string()),
                Some("22003") => StoreError::OutOfRange(db.message().to_string()),
                Some("40P01") | Some("40001") | Some("55P03") => {
                    StoreError::Aborted(db.message().to_string())
                }
                _ => StoreError::Aborted(err.to_string()),
            },
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
            other => StoreError::Aborted(other.to_string()),
        }
    }
}

/// Account reads that do not take a hold.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Read the committed state of an account.
    async fn get_account(&self, account_id: &str) -> StoreResult<Account>;

    /// Create a zero-balance account. Fails with `AlreadyExists` on a duplicate id.
    async fn create_account(&self, new: NewAccount) -> StoreResult<Account>;
}

/// Append-only transfer records.
#[async_trait]
pub trait TransactionLog: Send + Sync {
    async fn get_transaction(&self, transaction_id: &str) -> StoreResult<Transaction>;

    /// Lazy sequence of committed records ordered by creation time.
    ///
    /// Each call starts a fresh sequence. `filter.limit` is honored by the stream.
    fn list_transactions(
        &self,
        filter: TransactionFilter,
    ) -> BoxStream<'_, StoreResult<Transaction>>;
}

/// A storage backend able to open units of work.
#[async_trait]
pub trait LedgerStore: AccountStore + TransactionLog {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>>;

    /// Cheap connectivity check.
    async fn ping(&self) -> StoreResult<()>;
}

/// One atomic unit: every change made through it commits or rolls back together.
///
/// Dropping a unit without calling [`UnitOfWork::commit`] discards its changes
/// and releases its holds.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Read the account and hold it exclusively until the unit ends.
    async fn get_for_update(&mut self, account_id: &str) -> StoreResult<Account>;

    /// Add `delta` to a held account's balance and return the staged snapshot.
    ///
    /// Fails with `InsufficientFunds` if the balance would go negative and with
    /// `NotLocked` if the account was not first held by `get_for_update`.
    async fn apply_delta(&mut self, account_id: &str, delta: i64) -> StoreResult<Account>;

    /// Insert the record keyed by its transaction id, exactly once.
    ///
    /// Fails with `AlreadyExists` if a committed record has the same id. A
    /// concurrent unit inserting the same id makes this call wait for it to end.
    async fn insert_transaction(&mut self, record: Transaction) -> StoreResult<Transaction>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
