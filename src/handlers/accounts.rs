//! Account HTTP handlers.
//!
//! - POST /api/v1/accounts - Create an account
//! - GET /api/v1/accounts/{id} - Get an account
//! - POST /api/v1/accounts/{id}/deposits - Top up an account

use crate::{
    app::AppState,
    error::AppError,
    models::account::{Account, CreateAccountRequest, DepositRequest},
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

/// Create a new account with a zero balance.
///
/// # Request Body
///
/// ```json
/// {
///   "account_id": "acc-a",   // optional, a UUID is assigned when omitted
///   "user_id": "user-1",
///   "currency": "USD"        // optional, defaults to USD
/// }
/// ```
///
/// # Response
///
/// - **201 Created**: the new account
/// - **400**: invalid fields or duplicate `account_id`
pub async fn create_account(
    State(state): State<AppState>,
    Json(request): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<Account>), AppError> {
    let account = state.ledger.create_account(request).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

/// Get an account's committed state.
pub async fn get_account(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<Account>, AppError> {
    let account = state.ledger.get_account(&account_id).await?;
    Ok(Json(account))
}

/// Add money to an account.
///
/// # Request Body
///
/// ```json
/// { "amount": 100000 }
/// ```
///
/// Returns the account after the deposit is committed.
pub async fn create_deposit(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(request): Json<DepositRequest>,
) -> Result<Json<Account>, AppError> {
    let account = state.ledger.deposit(&account_id, request.amount).await?;
    Ok(Json(account))
}
