//! Ledger over PostgreSQL.
//!
//! Run with a database:
//! `DATABASE_URL=postgres://... cargo test --test postgres -- --ignored`

use std::sync::Arc;
use std::time::Duration;

use transfer_ledger::db;
use transfer_ledger::error::AppError;
use transfer_ledger::models::account::CreateAccountRequest;
use transfer_ledger::services::commission::CommissionPolicy;
use transfer_ledger::services::ledger::{Ledger, TransferCommand};
use transfer_ledger::store::PgStore;
use uuid::Uuid;

async fn ledger() -> Arc<Ledger> {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = db::create_pool(&url, 10).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    Arc::new(Ledger::new(
        Arc::new(PgStore::new(pool)),
        CommissionPolicy::default(),
    ))
}

/// Account ids are random so runs against the same database do not collide.
async fn open(ledger: &Ledger, balance: i64) -> String {
    let account = ledger
        .create_account(CreateAccountRequest {
            account_id: None,
            user_id: "pg-test".to_string(),
            currency: "USD".to_string(),
        })
        .await
        .unwrap();
    if balance > 0 {
        ledger.deposit(&account.account_id, balance).await.unwrap();
    }
    account.account_id
}

fn transfer(from: &str, to: &str, amount: i64) -> TransferCommand {
    TransferCommand {
        transaction_id: Uuid::new_v4().to_string(),
        from_account_id: from.to_string(),
        to_account_id: to.to_string(),
        amount,
        description: None,
    }
}

#[tokio::test]
#[ignore = "requires PostgreSQL database"]
async fn transfer_and_replay() {
    let ledger = ledger().await;
    let a = open(&ledger, 1_000).await;
    let b = open(&ledger, 500).await;

    let command = transfer(&a, &b, 300);
    let outcome = ledger.transfer(command.clone()).await.unwrap();
    assert_eq!(outcome.from_account.balance, 700);
    assert_eq!(outcome.to_account.balance, 791);
    assert_eq!(outcome.transaction.commission, 9);

    ledger.transfer(transfer(&a, &b, 100)).await.unwrap();

    let replay = ledger.transfer(command).await.unwrap();
    assert!(replay.replayed);
    assert_eq!(replay.from_account.balance, 700);
    assert_eq!(replay.to_account.balance, 791);
    assert_eq!(ledger.get_account(&a).await.unwrap().balance, 600);
}

#[tokio::test]
#[ignore = "requires PostgreSQL database"]
async fn insufficient_funds_rolls_back() {
    let ledger = ledger().await;
    let a = open(&ledger, 1_000).await;
    let b = open(&ledger, 500).await;

    let command = transfer(&a, &b, 5_000);
    let err = ledger.transfer(command.clone()).await.unwrap_err();
    assert_eq!(err, AppError::InsufficientFunds);
    assert_eq!(ledger.get_account(&a).await.unwrap().balance, 1_000);
    assert!(matches!(
        ledger.get_transaction(&command.transaction_id).await,
        Err(AppError::TransactionNotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires PostgreSQL database"]
async fn concurrent_retries_and_opposite_transfers() {
    let ledger = ledger().await;
    let a = open(&ledger, 100_000).await;
    let b = open(&ledger, 100_000).await;

    let retried = transfer(&a, &b, 300);
    let mut handles = Vec::new();
    for _ in 0..8 {
        let ledger = ledger.clone();
        let command = retried.clone();
        handles.push(tokio::spawn(async move { ledger.transfer(command).await }));
    }
    for i in 0..20 {
        let ledger = ledger.clone();
        let command = if i % 2 == 0 {
            transfer(&a, &b, 100)
        } else {
            transfer(&b, &a, 100)
        };
        handles.push(tokio::spawn(async move { ledger.transfer(command).await }));
    }

    tokio::time::timeout(Duration::from_secs(30), async {
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
    })
    .await
    .expect("transfers deadlocked");

    // 300 once (commission 9), plus 10 x 100 each way (commission 3 each).
    let a_balance = ledger.get_account(&a).await.unwrap().balance;
    let b_balance = ledger.get_account(&b).await.unwrap().balance;
    assert_eq!(a_balance, 100_000 - 300 - 30);
    assert_eq!(b_balance, 100_000 + 291 - 30);
}
