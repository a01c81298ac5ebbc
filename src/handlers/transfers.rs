//! Transfer and transaction HTTP handlers.
//!
//! - POST /api/v1/transfers - Move money between accounts
//! - GET /api/v1/transactions/{id} - Get a transfer record
//! - GET /api/v1/transactions - List transfer records
//! - GET /api/v1/reports/daily - Aggregate one UTC day

use crate::{
    app::AppState,
    error::AppError,
    models::transaction::{
        DailySummary, DailySummaryQuery, Transaction, TransactionFilter, TransferOutcome,
        TransferRequest,
    },
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};

/// Transfer money between accounts.
///
/// # Request Body
///
/// ```json
/// {
///   "transaction_id": "0f8fad5b-d9cb-469f-a165-70867728950e",
///   "from_account_id": "acc-a",
///   "to_account_id": "acc-b",
///   "amount": 300
/// }
/// ```
///
/// # Response
///
/// - **201 Created**: transfer applied now
/// - **200 OK**: `transaction_id` was already committed; the earlier result is returned
///
/// ```json
/// {
///   "transaction": { "transaction_id": "...", "amount": 300, "commission": 9, ... },
///   "from_account": { "account_id": "acc-a", "balance": 700, ... },
///   "to_account": { "account_id": "acc-b", "balance": 791, ... },
///   "replayed": false
/// }
/// ```
///
/// # Atomicity
///
/// The debit, the credit and the record commit together or not at all.
/// A 503 means nothing was applied; retry with the same `transaction_id`.
pub async fn create_transfer(
    State(state): State<AppState>,
    Json(request): Json<TransferRequest>,
) -> Result<(StatusCode, Json<TransferOutcome>), AppError> {
    let outcome = state.gateway.submit(request).await?;
    let status = if outcome.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(outcome)))
}

pub async fn get_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Result<Json<Transaction>, AppError> {
    let transaction = state.ledger.get_transaction(&transaction_id).await?;
    Ok(Json(transaction))
}

/// List transfer records in creation order.
///
/// # Query Parameters
///
/// - `account_id`: records where the account is source or destination
/// - `from` / `to`: RFC 3339 bounds on `created_at` (`to` is exclusive)
/// - `limit`: page size, default 100, max 1000
pub async fn list_transactions(
    State(state): State<AppState>,
    Query(filter): Query<TransactionFilter>,
) -> Result<Json<Vec<Transaction>>, AppError> {
    let transactions = state.ledger.list_transactions(filter).await?;
    Ok(Json(transactions))
}

/// Count, total, average and commission of the transfers made on `?day=YYYY-MM-DD`.
pub async fn daily_report(
    State(state): State<AppState>,
    Query(query): Query<DailySummaryQuery>,
) -> Result<Json<DailySummary>, AppError> {
    let summary = state.ledger.daily_summary(query.day).await?;
    Ok(Json(summary))
}
