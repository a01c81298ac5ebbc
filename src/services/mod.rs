//! Business logic services.
//!
//! Services contain the transfer engine and its client-facing entry points,
//! separated from HTTP handlers and storage backends.

pub mod commission;
pub mod gateway;
pub mod ledger;
pub mod remote;
