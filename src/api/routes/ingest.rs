//! Ingest Routes
//!
//! Endpoints for submitting points to the ingest queue.
//!
//! - POST /ingest/single - Single point
//! - POST /ingest/batch - Array of points
//!
//! A 200 response means the points were queued, not that they are durable.

use axum::{extract::rejection::JsonRejection, extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::dto::IngestResponse;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::storage::Point;

type IngestReply = ApiResult<(StatusCode, Json<IngestResponse>)>;

/// POST /ingest/single
pub async fn ingest_single(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Point>, JsonRejection>,
) -> IngestReply {
    let submitted = payload
        .map_err(|e| ApiError::Validation(e.body_text()))
        .and_then(|Json(point)| {
            validate_point(&point)?;
            state.engine.submit(point).map_err(ApiError::from)
        });

    match submitted {
        Ok(()) => Ok((
            StatusCode::OK,
            Json(IngestResponse {
                accepted: 1,
                rejected: 0,
                error: String::new(),
            }),
        )),
        Err(e) => refused(e, 1),
    }
}

/// POST /ingest/batch
///
/// Points are submitted in order; each is accepted or rejected on its own.
pub async fn ingest_batch(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Vec<Point>>, JsonRejection>,
) -> IngestReply {
    // The body could not be read as points, so there is nothing to count
    let points = match payload {
        Ok(Json(points)) => points,
        Err(e) => return refused(ApiError::Validation(e.body_text()), 0),
    };

    let max = state.config.max_batch_points;
    if points.len() > max {
        let err = ApiError::Validation(format!("Batch size exceeds maximum of {} points", max));
        return refused(err, points.len());
    }

    let mut invalid = 0;
    let mut first_error = None;
    let valid: Vec<Point> = points
        .into_iter()
        .filter(|point| match validate_point(point) {
            Ok(()) => true,
            Err(e) => {
                invalid += 1;
                first_error.get_or_insert_with(|| e.to_string());
                false
            }
        })
        .collect();

    let outcome = state.engine.submit_batch(valid);
    let rejected = invalid + outcome.rejected;

    let error = match first_error {
        Some(e) => e,
        None if outcome.rejected > 0 => format!(
            "{} points not queued: ingest queue is full or shutting down",
            outcome.rejected
        ),
        None => String::new(),
    };

    Ok((
        StatusCode::OK,
        Json(IngestResponse {
            accepted: outcome.accepted,
            rejected,
            error,
        }),
    ))
}

/// Report a refused request in the ingest response shape.
///
/// Server faults keep the generic error envelope.
fn refused(err: ApiError, rejected: usize) -> IngestReply {
    if err.is_server_fault() {
        return Err(err);
    }

    tracing::debug!(error = %err, rejected, "Ingest refused");
    Ok((
        err.status(),
        Json(IngestResponse {
            accepted: 0,
            rejected,
            error: err.to_string(),
        }),
    ))
}

/// Validate a point before it reaches the queue
fn validate_point(point: &Point) -> ApiResult<()> {
    if point.measurement.is_empty() {
        return Err(ApiError::Validation("no measurement provided".to_string()));
    }

    if point.measurement.contains('|') {
        return Err(ApiError::Validation(
            "measurement cannot contain '|'".to_string(),
        ));
    }

    for (key, value) in &point.tags {
        if key.is_empty() {
            return Err(ApiError::Validation("Tag key cannot be empty".to_string()));
        }
        if key.contains(['|', '=']) || value.contains('|') {
            return Err(ApiError::Validation(format!(
                "Tag {:?} contains a reserved character",
                key
            )));
        }
    }

    if let Some((name, _)) = point.fields.iter().find(|(_, v)| !v.is_finite()) {
        return Err(ApiError::Validation(format!(
            "Field {:?} must be a finite number",
            name
        )));
    }

    Ok(())
}
