//! Money-transfer engine.
//!
//! Accounts hold integer balances in minor units. A transfer debits the
//! source, credits the destination net of commission and records the transfer,
//! all in one atomic unit keyed by the caller's transaction id.
//!
//! # Layout
//!
//! - [`store`]: account store, transaction log and units of work (memory, PostgreSQL)
//! - [`services::ledger`]: the transfer engine
//! - [`services::gateway`]: client-facing entry point, in-process or remote
//! - [`handlers`] / [`app`]: the HTTP surface

pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod store;
