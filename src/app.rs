//! Router assembly.
//!
//! Shared between `main` and the integration tests, which drive the router
//! in-process with `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::handlers;
use crate::services::gateway::{LedgerClient, TransferGateway};

/// State shared with every handler via `State` extraction.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<TransferGateway>,
    pub ledger: Arc<dyn LedgerClient>,
}

impl AppState {
    /// Wire a gateway in front of `ledger`; reads go to the ledger directly.
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self {
            gateway: Arc::new(TransferGateway::new(ledger.clone())),
            ledger,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        // Transfers
        .route("/api/v1/transfers", post(handlers::transfers::create_transfer))
        .route(
            "/api/v1/transactions",
            get(handlers::transfers::list_transactions),
        )
        .route(
            "/api/v1/transactions/{id}",
            get(handlers::transfers::get_transaction),
        )
        .route(
            "/api/v1/reports/daily",
            get(handlers::transfers::daily_report),
        )
        // Accounts
        .route("/api/v1/accounts", post(handlers::accounts::create_account))
        .route(
            "/api/v1/accounts/{id}",
            get(handlers::accounts::get_account),
        )
        .route(
            "/api/v1/accounts/{id}/deposits",
            post(handlers::accounts::create_deposit),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
