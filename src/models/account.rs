//! Account data models and API request types.
//!
//! This module defines:
//! - `Account`: a balance row as held by the account store
//! - `NewAccount`: what the store needs to create a row
//! - `CreateAccountRequest` / `DepositRequest`: request bodies

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Represents an account balance row.
///
/// # Balance Storage
///
/// Balances are stored as `i64` minor units (cents) to avoid floating-point
/// drift. For example:
/// - $10.50 is stored as 1050
/// - $100.00 is stored as 10000
///
/// The balance only changes through the store's delta-apply primitive inside a
/// ledger-owned unit of work.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize, Deserialize)]
pub struct Account {
    /// Opaque, globally unique account identifier
    pub account_id: String,

    /// Owning user identifier
    pub user_id: String,

    /// Current balance in minor units
    ///
    /// Never negative (enforced by the store and by a database CHECK constraint).
    pub balance: i64,

    /// Currency code (ISO 4217, 3 letters)
    pub currency: String,

    pub created_at: DateTime<Utc>,

    /// Timestamp of the last balance change
    pub updated_at: DateTime<Utc>,
}

/// Store-level input for creating an account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub account_id: String,
    pub user_id: String,
    pub currency: String,
}

/// Request body for creating a new account.
///
/// # JSON Example
///
/// ```json
/// {
///   "user_id": "user-42",
///   "currency": "USD"
/// }
/// ```
///
/// Accounts are always created with a zero balance; money arrives through
/// deposits or transfers. `account_id` is generated when omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountRequest {
    #[serde(default)]
    pub account_id: Option<String>,

    pub user_id: String,

    /// Currency code (defaults to "USD" if not provided)
    #[serde(default = "default_currency")]
    pub currency: String,
}

/// Default currency value when not specified in request.
fn default_currency() -> String {
    "USD".to_string()
}

/// Request body for a manual top-up.
///
/// ```json
/// { "amount": 100000 }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRequest {
    /// Amount to add in minor units, must be positive
    pub amount: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_defaults() {
        let req: CreateAccountRequest = serde_json::from_str(r#"{"user_id":"u1"}"#).unwrap();
        assert_eq!(req.currency, "USD");
        assert!(req.account_id.is_none());
    }
}
