//! Error types and HTTP error response handling.
//!
//! This module defines the service-level error taxonomy and how it is
//! converted into HTTP responses with appropriate status codes and JSON bodies.
//! The same JSON body is parsed back into an [`AppError`] by the cross-service
//! gateway, so a remote ledger surfaces exactly the errors a local one would.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;

use crate::store::StoreError;

/// Application-wide error type.
///
/// # Error Categories
///
/// - **Validation Errors**: rejected before any lock is taken
/// - **Resource Errors**: account or transaction does not exist
/// - **Business Rule Errors**: insufficient funds, currency mismatch, idempotency key reuse
/// - **Unit Of Work Errors**: the atomic unit was rolled back; safe to retry with the same transaction id
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppError {
    /// Request body or parameters are invalid.
    ///
    /// Returns HTTP 400 Bad Request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Source or destination account does not exist.
    ///
    /// Returns HTTP 404 Not Found.
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// Returns HTTP 404 Not Found.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    /// Source balance read under lock is below the transfer amount.
    ///
    /// Returns HTTP 422 Unprocessable Entity.
    #[error("Insufficient funds")]
    InsufficientFunds,

    /// Source and destination hold different currencies.
    ///
    /// Returns HTTP 422 Unprocessable Entity.
    #[error("Currency mismatch: {0}")]
    CurrencyMismatch(String),

    /// Transaction id already committed with different parameters.
    ///
    /// Returns HTTP 409 Conflict.
    #[error("Transaction id reused with different parameters: {0}")]
    IdempotencyConflict(String),

    /// The unit of work was aborted (deadlock victim, lock timeout, constraint race)
    /// and fully rolled back.
    ///
    /// Returns HTTP 503 Service Unavailable.
    #[error("Unit of work aborted: {0}")]
    AbortedUnitOfWork(String),

    /// Storage (or the remote ledger service) could not be reached.
    ///
    /// Returns HTTP 503 Service Unavailable.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl AppError {
    /// Machine readable code carried in the error body.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidRequest(_) => "invalid_request",
            AppError::AccountNotFound(_) => "account_not_found",
            AppError::TransactionNotFound(_) => "transaction_not_found",
            AppError::InsufficientFunds => "insufficient_funds",
            AppError::CurrencyMismatch(_) => "currency_mismatch",
            AppError::IdempotencyConflict(_) => "idempotency_conflict",
            AppError::AbortedUnitOfWork(_) => "aborted_unit_of_work",
            AppError::StorageUnavailable(_) => "storage_unavailable",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::AccountNotFound(_) | AppError::TransactionNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            AppError::InsufficientFunds | AppError::CurrencyMismatch(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::IdempotencyConflict(_) => StatusCode::CONFLICT,
            AppError::AbortedUnitOfWork(_) | AppError::StorageUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }

    /// Whether retrying the same request (same transaction id) may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::AbortedUnitOfWork(_) | AppError::StorageUnavailable(_)
        )
    }

    /// Rebuild an error from the `code` and `message` of an error body.
    ///
    /// Unknown codes are treated as an unavailable upstream.
    pub fn from_code(code: &str, message: String) -> Self {
        match code {
            "invalid_request" => AppError::InvalidRequest(message),
            "account_not_found" => AppError::AccountNotFound(message),
            "transaction_not_found" => AppError::TransactionNotFound(message),
            "insufficient_funds" => AppError::InsufficientFunds,
            "currency_mismatch" => AppError::CurrencyMismatch(message),
            "idempotency_conflict" => AppError::IdempotencyConflict(message),
            "aborted_unit_of_work" => AppError::AbortedUnitOfWork(message),
            _ => AppError::StorageUnavailable(message),
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::InvalidRequest(msg)
            | AppError::AccountNotFound(msg)
            | AppError::TransactionNotFound(msg)
            | AppError::CurrencyMismatch(msg)
            | AppError::IdempotencyConflict(msg)
            | AppError::AbortedUnitOfWork(msg)
            | AppError::StorageUnavailable(msg) => msg.clone(),
            AppError::InsufficientFunds => self.to_string(),
        }
    }
}

/// Store failures that escape a unit of work.
///
/// `NotFound` and `InsufficientFunds` are normally translated by the ledger with
/// the offending identifier attached; this conversion covers the remaining paths.
impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => AppError::AccountNotFound(id),
            StoreError::AlreadyExists(id) => AppError::IdempotencyConflict(id),
            StoreError::InsufficientFunds(_) => AppError::InsufficientFunds,
            StoreError::OutOfRange(msg) => AppError::InvalidRequest(msg),
            StoreError::NotLocked(_) | StoreError::Aborted(_) => {
                AppError::AbortedUnitOfWork(err.to_string())
            }
            StoreError::Unavailable(msg) => AppError::StorageUnavailable(msg),
        }
    }
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// All errors return JSON in this format:
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.message()
            }
        }));

        (self.status(), body).into_response()
    }
}

/// Wire shape of an error response, used when reading a remote ledger's reply.
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl From<ErrorBody> for AppError {
    fn from(body: ErrorBody) -> Self {
        AppError::from_code(&body.error.code, body.error.message)
    }
}
