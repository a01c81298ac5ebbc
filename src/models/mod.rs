//! Data models representing stored entities and API payloads.

/// Account balance rows
pub mod account;
/// Transfer records, requests and reporting types
pub mod transaction;
