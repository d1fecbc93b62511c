//! Query Routes
//!
//! - POST /query - Points of one series within an inclusive time range

use axum::{extract::rejection::JsonRejection, extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::dto::{QueryRequest, QueryResponse};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::storage::Point;

/// POST /query
///
/// Bad requests and refusals answer with `success: false` and the reason.
pub async fn execute_query(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<QueryResponse>)> {
    match run_query(&state, payload).await {
        Ok(points) => Ok((
            StatusCode::OK,
            Json(QueryResponse {
                success: true,
                error: String::new(),
                points,
            }),
        )),
        Err(e) if e.is_server_fault() => Err(e),
        Err(e) => {
            tracing::debug!(error = %e, "Query refused");
            Ok((
                e.status(),
                Json(QueryResponse {
                    success: false,
                    error: e.to_string(),
                    points: Vec::new(),
                }),
            ))
        }
    }
}

async fn run_query(
    state: &AppState,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> ApiResult<Vec<Point>> {
    let Json(req) = payload.map_err(|e| ApiError::Validation(e.body_text()))?;

    if req.key.is_empty() {
        return Err(ApiError::Validation("key cannot be empty".to_string()));
    }

    let from = req
        .from_unix_timestamp_nano
        .resolve()
        .map_err(|e| ApiError::Validation(format!("from_unix_timestamp_nano: {}", e)))?;
    let to = req
        .to_unix_timestamp_nano
        .resolve()
        .map_err(|e| ApiError::Validation(format!("to_unix_timestamp_nano: {}", e)))?;

    Ok(state.engine.query(&req.key, from, to).await?)
}
