//! Application configuration management.
//!
//! This module handles loading configuration from environment variables.
//! It uses the `envy` crate to automatically deserialize environment variables into a type-safe struct.

use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::services::commission::{CommissionPolicy, DEFAULT_COMMISSION_BPS};

/// Where the in-process ledger keeps its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local arena, lost on restart
    #[default]
    Memory,
    Postgres,
}

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `STORAGE_BACKEND` (optional): `memory` or `postgres`, defaults to `memory`
/// - `DATABASE_URL` (required for `postgres`): PostgreSQL connection string
/// - `DATABASE_MAX_CONNECTIONS` (optional): pool size, defaults to 5
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `COMMISSION_RATE_BPS` (optional): commission in basis points, defaults to 300 (3%)
/// - `LEDGER_SERVICE_URL` (optional): when set, transfers are forwarded to a
///   ledger service at this URL instead of an in-process ledger
/// - `UPSTREAM_TIMEOUT_MS` (optional): per-attempt timeout for the ledger service, defaults to 5000
/// - `UPSTREAM_RETRIES` (optional): extra attempts after a transient failure, defaults to 2
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage_backend: StorageBackend,

    pub database_url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_commission_rate_bps")]
    pub commission_rate_bps: u32,

    pub ledger_service_url: Option<String>,

    #[serde(default = "default_upstream_timeout_ms")]
    pub upstream_timeout_ms: u64,

    #[serde(default = "default_upstream_retries")]
    pub upstream_retries: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read environment: {0}")]
    Env(#[from] envy::Error),

    #[error("DATABASE_URL is required when STORAGE_BACKEND=postgres")]
    MissingDatabaseUrl,

    #[error("COMMISSION_RATE_BPS must be at most 10000, got {0}")]
    InvalidCommissionRate(u32),

    #[error("LEDGER_SERVICE_URL is not a valid URL: {0}")]
    InvalidLedgerUrl(#[from] url::ParseError),
}

/// Default port if SERVER_PORT environment variable is not set.
fn default_port() -> u16 {
    3000
}

fn default_max_connections() -> u32 {
    5
}

fn default_commission_rate_bps() -> u32 {
    DEFAULT_COMMISSION_BPS
}

fn default_upstream_timeout_ms() -> u64 {
    5_000
}

fn default_upstream_retries() -> u32 {
    2
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This method first attempts to load a `.env` file (which is optional),
    /// then reads environment variables and deserializes them into a Config struct.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be parsed or if the combination of
    /// values is invalid (see [`Config::validate`]).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Try to load .env file if it exists (does nothing if not found)
        dotenvy::dotenv().ok();

        // Field names are automatically converted: database_url -> DATABASE_URL
        let config = envy::from_env::<Config>()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from explicit key/value pairs.
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config = envy::from_iter::<_, Config>(vars)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.commission_policy()?;
        self.ledger_service_url()?;
        if self.ledger_service_url.is_none()
            && self.storage_backend == StorageBackend::Postgres
            && self.database_url.is_none()
        {
            return Err(ConfigError::MissingDatabaseUrl);
        }
        Ok(())
    }

    pub fn commission_policy(&self) -> Result<CommissionPolicy, ConfigError> {
        CommissionPolicy::new(self.commission_rate_bps)
            .ok_or(ConfigError::InvalidCommissionRate(self.commission_rate_bps))
    }

    pub fn ledger_service_url(&self) -> Result<Option<Url>, ConfigError> {
        self.ledger_service_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .map_err(ConfigError::from)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }
}
