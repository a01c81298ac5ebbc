//! Health check endpoint for service monitoring.

use crate::{app::AppState, error::AppError};
use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall service status
    pub status: String,

    /// Ledger storage status
    pub storage: String,

    /// Current server timestamp
    pub timestamp: DateTime<Utc>,
}

/// Health check handler.
///
/// # Response (200 OK)
///
/// ```json
/// {
///   "status": "healthy",
///   "storage": "connected",
///   "timestamp": "2025-12-21T19:00:00Z"
/// }
/// ```
///
/// # Response (503 Service Unavailable)
///
/// If storage (or the remote ledger) is unreachable, returns the standard error response.
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    state.ledger.health().await?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        storage: "connected".to_string(),
        timestamp: Utc::now(),
    }))
}
