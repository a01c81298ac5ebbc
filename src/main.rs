//! Transfer Ledger - Main Application Entry Point
//!
//! A REST API server that moves money between accounts atomically and
//! idempotently, with a configurable commission withheld from each transfer.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Storage**: in-memory arena or PostgreSQL with sqlx
//! - **Deployment**: in-process ledger, or a gateway forwarding to a remote ledger service
//! - **Format**: JSON requests/responses
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Build the ledger client (remote, memory or PostgreSQL with migrations)
//! 3. Build HTTP router with routes and middleware
//! 4. Start server on configured port

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use transfer_ledger::{
    app::{AppState, build_router},
    config::{Config, StorageBackend},
    db,
    services::{gateway::LedgerClient, ledger::Ledger, remote::RemoteLedger},
    store::{LedgerStore, MemoryStore, PgStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with tracing subscriber. Reads RUST_LOG environment variable (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    let ledger = build_ledger(&config).await?;
    let app = build_router(AppState::new(ledger));

    // Bind to network address and start server
    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn build_ledger(config: &Config) -> anyhow::Result<Arc<dyn LedgerClient>> {
    if let Some(url) = config.ledger_service_url()? {
        tracing::info!(%url, "Forwarding transfers to ledger service");
        let remote = RemoteLedger::new(url, config.upstream_timeout(), config.upstream_retries)?;
        return Ok(Arc::new(remote));
    }

    let store: Arc<dyn LedgerStore> = match config.storage_backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; balances are lost on restart");
            Arc::new(MemoryStore::new())
        }
        StorageBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is not set"))?;

            let pool = db::create_pool(database_url, config.database_max_connections).await?;
            tracing::info!("Database pool created");

            db::run_migrations(&pool).await?;
            tracing::info!("Database migrations complete");

            Arc::new(PgStore::new(pool))
        }
    };

    let commission = config.commission_policy()?;
    tracing::info!(rate_bps = commission.rate_bps(), "Ledger ready");
    Ok(Arc::new(Ledger::new(store, commission)))
}
