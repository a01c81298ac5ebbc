//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, URL params, query string)
//! 2. Delegates to the gateway or the ledger client
//! 3. Returns HTTP response (JSON, status code)

/// Account management endpoints
pub mod accounts;
/// Liveness check
pub mod health;
/// Transfers, transaction reads and reports
pub mod transfers;
