//! In-process ledger store.
//!
//! Committed state lives in a single arena (`RwLock<MemoryState>`): account rows
//! addressed by identifier plus the transaction log. A unit of work never writes
//! to the arena until commit, and commit publishes every staged balance and
//! record under one write lock, so a reader that holds no account never sees a
//! debit without its matching credit.
//!
//! Exclusive holds are per key `tokio::sync::Mutex`es. A unit keeps the owned
//! guard of every account it read for update, and of every transaction id it
//! inserted, until it ends. Waiting on a transaction id hold mirrors a unique
//! index: the second inserter of an id waits for the first unit to finish and
//! then sees the committed record (or nothing, if it rolled back).
//!
//! Listing walks an index ordered by `(created_at, commit sequence)` one page
//! at a time, taking the read lock per page rather than for the whole walk.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::Bound;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use super::{
    AccountStore, LedgerStore, StoreError, StoreResult, TransactionLog, UnitOfWork,
};
use crate::models::account::{Account, NewAccount};
use crate::models::transaction::{Transaction, TransactionFilter};

/// Records scanned per read-lock acquisition while listing.
const LIST_PAGE: usize = 256;

/// Position of a record in listing order.
type LogKey = (DateTime<Utc>, u64);

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<String, Account>,
    transactions: HashMap<String, Transaction>,
    /// Listing order: creation time, then commit sequence
    log: BTreeMap<LogKey, String>,
    next_seq: u64,
}

struct Inner {
    state: RwLock<MemoryState>,
    account_holds: Arc<KeyedLocks>,
    transaction_holds: Arc<KeyedLocks>,
}

impl Inner {
    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".to_string()))
    }
}

/// Ledger store backed by process memory.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(MemoryState::default()),
                account_holds: Arc::new(KeyedLocks::default()),
                transaction_holds: Arc::new(KeyedLocks::default()),
            }),
        }
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn get_account(&self, account_id: &str) -> StoreResult<Account> {
        self.inner
            .read()?
            .accounts
            .get(account_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(account_id.to_string()))
    }

    async fn create_account(&self, new: NewAccount) -> StoreResult<Account> {
        let mut state = self.inner.write()?;
        if state.accounts.contains_key(&new.account_id) {
            return Err(StoreError::AlreadyExists(new.account_id));
        }

        let now = Utc::now();
        let account = Account {
            account_id: new.account_id,
            user_id: new.user_id,
            balance: 0,
            currency: new.currency,
            created_at: now,
            updated_at: now,
        };
        state
            .accounts
            .insert(account.account_id.clone(), account.clone());
        Ok(account)
    }
}

#[async_trait]
impl TransactionLog for MemoryStore {
    async fn get_transaction(&self, transaction_id: &str) -> StoreResult<Transaction> {
        self.inner
            .read()?
            .transactions
            .get(transaction_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(transaction_id.to_string()))
    }

    fn list_transactions(
        &self,
        filter: TransactionFilter,
    ) -> BoxStream<'_, StoreResult<Transaction>> {
        let cursor = LogCursor {
            inner: self.inner.clone(),
            remaining: filter.limit.unwrap_or(usize::MAX),
            filter,
            after: None,
            buffer: VecDeque::new(),
            exhausted: false,
        };

        stream::unfold(cursor, |mut cursor| async move {
            loop {
                if cursor.remaining == 0 {
                    return None;
                }
                if let Some(record) = cursor.buffer.pop_front() {
                    cursor.remaining -= 1;
                    return Some((Ok(record), cursor));
                }
                if cursor.exhausted {
                    return None;
                }
                if let Err(err) = cursor.refill() {
                    cursor.remaining = 0;
                    return Some((Err(err), cursor));
                }
            }
        })
        .boxed()
    }
}

/// Lazy walk over the committed log in listing order.
struct LogCursor {
    inner: Arc<Inner>,
    filter: TransactionFilter,
    /// Last key scanned; the next page starts after it
    after: Option<LogKey>,
    buffer: VecDeque<Transaction>,
    remaining: usize,
    exhausted: bool,
}

impl LogCursor {
    /// Scan the next page of the log into the buffer.
    fn refill(&mut self) -> StoreResult<()> {
        let state = self.inner.read()?;
        let lower = self.after.map_or(Bound::Unbounded, Bound::Excluded);

        let mut scanned = 0;
        for (key, transaction_id) in state.log.range((lower, Bound::Unbounded)) {
            scanned += 1;
            self.after = Some(*key);
            if let Some(record) = state.transactions.get(transaction_id) {
                if self.filter.admits(record) {
                    self.buffer.push_back(record.clone());
                }
            }
            if scanned == LIST_PAGE {
                return Ok(());
            }
        }

        self.exhausted = true;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        Ok(Box::new(MemoryUnit {
            inner: self.inner.clone(),
            held: HashMap::new(),
            staged: Vec::new(),
        }))
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.read().map(|_| ())
    }
}

struct HeldAccount {
    _hold: KeyHold,
    working: Account,
    dirty: bool,
}

struct StagedRecord {
    _hold: KeyHold,
    record: Transaction,
}

/// Unit of work over a [`MemoryStore`].
pub struct MemoryUnit {
    inner: Arc<Inner>,
    held: HashMap<String, HeldAccount>,
    staged: Vec<StagedRecord>,
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    async fn get_for_update(&mut self, account_id: &str) -> StoreResult<Account> {
        if let Some(held) = self.held.get(account_id) {
            return Ok(held.working.clone());
        }

        let hold = KeyedLocks::acquire(&self.inner.account_holds, account_id).await;
        debug!(account_id, "account held for update");

        let committed = self
            .inner
            .read()?
            .accounts
            .get(account_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(account_id.to_string()))?;

        self.held.insert(
            account_id.to_string(),
            HeldAccount {
                _hold: hold,
                working: committed.clone(),
                dirty: false,
            },
        );
        Ok(committed)
    }

    async fn apply_delta(&mut self, account_id: &str, delta: i64) -> StoreResult<Account> {
        let held = self
            .held
            .get_mut(account_id)
            .ok_or_else(|| StoreError::NotLocked(account_id.to_string()))?;

        let balance = held
            .working
            .balance
            .checked_add(delta)
            .ok_or_else(|| StoreError::OutOfRange(format!("balance overflow on {account_id}")))?;
        if balance < 0 {
            return Err(StoreError::InsufficientFunds(account_id.to_string()));
        }

        held.working.balance = balance;
        held.working.updated_at = Utc::now();
        held.dirty = true;
        Ok(held.working.clone())
    }

    async fn insert_transaction(&mut self, record: Transaction) -> StoreResult<Transaction> {
        if self
            .staged
            .iter()
            .any(|staged| staged.record.transaction_id == record.transaction_id)
        {
            return Err(StoreError::AlreadyExists(record.transaction_id));
        }

        let hold = KeyedLocks::acquire(&self.inner.transaction_holds, &record.transaction_id).await;
        if self
            .inner
            .read()?
            .transactions
            .contains_key(&record.transaction_id)
        {
            return Err(StoreError::AlreadyExists(record.transaction_id));
        }

        self.staged.push(StagedRecord {
            _hold: hold,
            record: record.clone(),
        });
        Ok(record)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        {
            let mut state = self.inner.write()?;

            // The id holds make this unreachable, but never publish half a unit.
            if let Some(dup) = self
                .staged
                .iter()
                .find(|staged| state.transactions.contains_key(&staged.record.transaction_id))
            {
                return Err(StoreError::Aborted(format!(
                    "transaction {} committed concurrently",
                    dup.record.transaction_id
                )));
            }

            for (account_id, held) in &self.held {
                if held.dirty {
                    state.accounts.insert(account_id.clone(), held.working.clone());
                }
            }
            for staged in &self.staged {
                let seq = state.next_seq;
                state.next_seq += 1;
                state.log.insert(
                    (staged.record.created_at, seq),
                    staged.record.transaction_id.clone(),
                );
                state.transactions.insert(
                    staged.record.transaction_id.clone(),
                    staged.record.clone(),
                );
            }
        }

        // Holds are released when `self` drops, after publication.
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

/// Per key exclusive holds, created on demand and removed when unused.
#[derive(Default)]
struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    async fn acquire(locks: &Arc<KeyedLocks>, key: &str) -> KeyHold {
        let lock = locks
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_default()
            .clone();

        let guard = lock.lock_owned().await;
        KeyHold {
            guard: Some(guard),
            owner: locks.clone(),
        }
    }

    /// Drop every entry nobody holds or waits on.
    ///
    /// Sweeping all keys also clears entries left by an `acquire` that was
    /// cancelled while waiting, which never reaches a `KeyHold`.
    fn release(&self) {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

struct KeyHold {
    guard: Option<OwnedMutexGuard<()>>,
    owner: Arc<KeyedLocks>,
}

impl Drop for KeyHold {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.owner.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn store_with(accounts: &[(&str, i64)]) -> MemoryStore {
        let store = MemoryStore::new();
        for (id, balance) in accounts {
            store
                .create_account(NewAccount {
                    account_id: id.to_string(),
                    user_id: "user".to_string(),
                    currency: "USD".to_string(),
                })
                .await
                .unwrap();
            if *balance > 0 {
                let mut unit = store.begin().await.unwrap();
                unit.get_for_update(id).await.unwrap();
                unit.apply_delta(id, *balance).await.unwrap();
                unit.commit().await.unwrap();
            }
        }
        store
    }

    fn record(id: &str) -> Transaction {
        Transaction {
            transaction_id: id.to_string(),
            from_account_id: "a".to_string(),
            to_account_id: "b".to_string(),
            amount: 100,
            commission: 3,
            currency: "USD".to_string(),
            description: None,
            from_balance_after: 0,
            to_balance_after: 100,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn get_for_update_is_exclusive_until_unit_ends() {
        let store = store_with(&[("a", 100)]).await;

        let mut first = store.begin().await.unwrap();
        first.get_for_update("a").await.unwrap();

        let contender = store.clone();
        let waiter = tokio::spawn(async move {
            let mut second = contender.begin().await.unwrap();
            let account = second.get_for_update("a").await.unwrap();
            second.rollback().await.unwrap();
            account.balance
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        first.apply_delta("a", -40).await.unwrap();
        first.commit().await.unwrap();

        // The second unit reads the balance committed by the first.
        let balance = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(balance, 60);
    }

    #[tokio::test]
    async fn apply_delta_requires_hold() {
        let store = store_with(&[("a", 100)]).await;
        let mut unit = store.begin().await.unwrap();
        let err = unit.apply_delta("a", 10).await.unwrap_err();
        assert_eq!(err, StoreError::NotLocked("a".to_string()));
    }

    #[tokio::test]
    async fn apply_delta_rejects_negative_result() {
        let store = store_with(&[("a", 100)]).await;
        let mut unit = store.begin().await.unwrap();
        unit.get_for_update("a").await.unwrap();

        let err = unit.apply_delta("a", -101).await.unwrap_err();
        assert_eq!(err, StoreError::InsufficientFunds("a".to_string()));

        let staged = unit.apply_delta("a", -100).await.unwrap();
        assert_eq!(staged.balance, 0);
    }

    #[tokio::test]
    async fn apply_delta_overflow_is_out_of_range() {
        let store = store_with(&[("a", 100)]).await;
        let mut unit = store.begin().await.unwrap();
        unit.get_for_update("a").await.unwrap();

        let err = unit.apply_delta("a", i64::MAX).await.unwrap_err();
        assert!(matches!(err, StoreError::OutOfRange(_)));
    }

    #[tokio::test]
    async fn missing_account_is_not_found() {
        let store = MemoryStore::new();
        let mut unit = store.begin().await.unwrap();
        assert_eq!(
            unit.get_for_update("ghost").await.unwrap_err(),
            StoreError::NotFound("ghost".to_string())
        );
        assert_eq!(
            store.get_account("ghost").await.unwrap_err(),
            StoreError::NotFound("ghost".to_string())
        );
    }

    #[tokio::test]
    async fn staged_changes_are_invisible_until_commit() {
        let store = store_with(&[("a", 100), ("b", 0)]).await;

        let mut unit = store.begin().await.unwrap();
        unit.get_for_update("a").await.unwrap();
        unit.get_for_update("b").await.unwrap();
        unit.apply_delta("a", -30).await.unwrap();
        unit.apply_delta("b", 30).await.unwrap();
        unit.insert_transaction(record("tx-1")).await.unwrap();

        // Lock-free readers still see the committed state.
        assert_eq!(store.get_account("a").await.unwrap().balance, 100);
        assert_eq!(store.get_account("b").await.unwrap().balance, 0);
        assert!(store.get_transaction("tx-1").await.is_err());

        unit.commit().await.unwrap();
        assert_eq!(store.get_account("a").await.unwrap().balance, 70);
        assert_eq!(store.get_account("b").await.unwrap().balance, 30);
        assert_eq!(store.get_transaction("tx-1").await.unwrap().amount, 100);
    }

    #[tokio::test]
    async fn rollback_and_drop_discard_everything() {
        let store = store_with(&[("a", 100)]).await;

        let mut unit = store.begin().await.unwrap();
        unit.get_for_update("a").await.unwrap();
        unit.apply_delta("a", -50).await.unwrap();
        unit.insert_transaction(record("tx-1")).await.unwrap();
        unit.rollback().await.unwrap();

        let mut dropped = store.begin().await.unwrap();
        dropped.get_for_update("a").await.unwrap();
        dropped.apply_delta("a", -50).await.unwrap();
        drop(dropped);

        assert_eq!(store.get_account("a").await.unwrap().balance, 100);
        assert!(store.get_transaction("tx-1").await.is_err());
        assert_eq!(store.inner.account_holds.len(), 0);
        assert_eq!(store.inner.transaction_holds.len(), 0);
    }

    #[tokio::test]
    async fn insert_is_exactly_once_per_id() {
        let store = MemoryStore::new();

        let mut unit = store.begin().await.unwrap();
        unit.insert_transaction(record("tx-1")).await.unwrap();
        assert_eq!(
            unit.insert_transaction(record("tx-1")).await.unwrap_err(),
            StoreError::AlreadyExists("tx-1".to_string())
        );
        unit.commit().await.unwrap();

        let mut again = store.begin().await.unwrap();
        assert_eq!(
            again.insert_transaction(record("tx-1")).await.unwrap_err(),
            StoreError::AlreadyExists("tx-1".to_string())
        );
    }

    #[tokio::test]
    async fn concurrent_insert_waits_for_first_unit() {
        let store = MemoryStore::new();

        let mut first = store.begin().await.unwrap();
        first.insert_transaction(record("tx-1")).await.unwrap();

        let contender = store.clone();
        let second = tokio::spawn(async move {
            let mut unit = contender.begin().await.unwrap();
            unit.insert_transaction(record("tx-1")).await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!second.is_finished());

        first.commit().await.unwrap();
        let result = second.await.unwrap();
        assert_eq!(result.unwrap_err(), StoreError::AlreadyExists("tx-1".to_string()));
    }

    #[tokio::test]
    async fn list_is_ordered_limited_and_restartable() {
        let store = MemoryStore::new();
        for id in ["tx-1", "tx-2", "tx-3"] {
            let mut unit = store.begin().await.unwrap();
            unit.insert_transaction(record(id)).await.unwrap();
            unit.commit().await.unwrap();
        }

        let ids = |filter: TransactionFilter| {
            let store = store.clone();
            async move {
                store
                    .list_transactions(filter)
                    .map(|r| r.unwrap().transaction_id)
                    .collect::<Vec<_>>()
                    .await
            }
        };

        assert_eq!(ids(TransactionFilter::default()).await, vec!["tx-1", "tx-2", "tx-3"]);
        assert_eq!(ids(TransactionFilter::default()).await, vec!["tx-1", "tx-2", "tx-3"]);
        let limited = TransactionFilter {
            limit: Some(2),
            ..Default::default()
        };
        assert_eq!(ids(limited).await, vec!["tx-1", "tx-2"]);
    }

    #[tokio::test]
    async fn list_walks_pages_in_creation_order() {
        let store = MemoryStore::new();
        let base = Utc::now();
        let total = LIST_PAGE * 2 + 10;

        // Committed newest first; listing must still come out oldest first.
        let mut unit = store.begin().await.unwrap();
        for i in (0..total).rev() {
            let mut tx = record(&format!("tx-{i:04}"));
            tx.created_at = base + chrono::Duration::seconds(i as i64);
            unit.insert_transaction(tx).await.unwrap();
        }
        unit.commit().await.unwrap();

        let mut listing = store.list_transactions(TransactionFilter::default());
        let first = listing.next().await.unwrap().unwrap();
        assert_eq!(first.transaction_id, "tx-0000");

        // Pages are read as the walk advances, so a later commit shows up.
        let mut unit = store.begin().await.unwrap();
        let mut late = record("tx-late");
        late.created_at = base + chrono::Duration::seconds(total as i64);
        unit.insert_transaction(late).await.unwrap();
        unit.commit().await.unwrap();

        let rest: Vec<String> = listing
            .map(|r| r.unwrap().transaction_id)
            .collect()
            .await;
        assert_eq!(rest.len(), total);
        assert_eq!(rest[0], "tx-0001");
        assert_eq!(rest[total - 2], format!("tx-{:04}", total - 1));
        assert_eq!(rest[total - 1], "tx-late");
    }

    #[test]
    fn cancelled_wait_leaves_no_entry_behind() {
        use futures::FutureExt;

        let locks = Arc::new(KeyedLocks::default());
        let held = KeyedLocks::acquire(&locks, "a").now_or_never().unwrap();

        let mut waiter = Box::pin(KeyedLocks::acquire(&locks, "a"));
        assert!((&mut waiter).now_or_never().is_none());

        // The waiter still references "a" when the holder goes away, then is
        // cancelled without ever holding it.
        drop(held);
        drop(waiter);
        assert_eq!(locks.len(), 1);

        // The next release sweeps the orphaned entry.
        drop(KeyedLocks::acquire(&locks, "b").now_or_never().unwrap());
        assert_eq!(locks.len(), 0);
    }
}
