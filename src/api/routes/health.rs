//! Health Routes
//!
//! Health check endpoints for monitoring and Kubernetes probes.
//!
//! - GET /health/live - Liveness probe (process is alive)
//! - GET /health/ready - Readiness probe (still accepting points)
//! - GET /health - Full health status with storage statistics

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::dto::HealthResponse;
use crate::api::state::AppState;

/// GET /health/live
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// GET /health/ready
///
/// 503 once the engine has stopped accepting points.
pub async fn readiness(State(state): State<Arc<AppState>>) -> StatusCode {
    if state.engine.is_accepting() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /health
pub async fn full_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let status = if state.engine.is_accepting() {
        "healthy"
    } else {
        "shutting_down"
    };

    Json(HealthResponse {
        status: status.to_string(),
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        storage: state.engine.stats().await,
    })
}
