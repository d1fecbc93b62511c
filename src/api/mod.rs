//! tickdb REST API
//!
//! Thin HTTP layer over the storage engine, built with Axum.
//!
//! # Endpoints
//!
//! ## Ingest
//! - `POST /ingest/single` - Single point
//! - `POST /ingest/batch` - Array of points
//!
//! ## Query
//! - `POST /query` - Points of one series in a time range
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe
//! - `GET /health` - Full health status
//!
//! # Example
//!
//! ```rust,ignore
//! use tickdb::api::{serve, ApiConfig, AppState};
//! use tickdb::storage::{EngineConfig, StorageEngine};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Arc::new(StorageEngine::open(EngineConfig::new("./data")).await?);
//!     let config = ApiConfig::default();
//!
//!     serve(AppState::new(Arc::clone(&engine), config.clone()), &config).await?;
//!     engine.close().await;
//!
//!     Ok(())
//! }
//! ```

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::{ApiConfig, AppState};

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Build the API router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let ingest_routes = Router::new()
        .route("/single", post(routes::ingest::ingest_single))
        .route("/batch", post(routes::ingest::ingest_batch));

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/ready", get(routes::health::readiness))
        .route("/", get(routes::health::full_health));

    let body_limit = state.config.max_body_size;
    let shared_state = Arc::new(state);

    Router::new()
        .nest("/ingest", ingest_routes)
        .route("/query", post(routes::query::execute_query))
        .nest("/health", health_routes)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(shared_state)
}

/// Start the API server; returns after a shutdown signal
pub async fn serve(state: AppState, config: &ApiConfig) -> Result<(), ApiError> {
    let router = build_router(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("tickdb API listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("tickdb API shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::dto::{IngestResponse, QueryResponse};
    use crate::storage::{EngineConfig, FlushPolicy, StorageEngine};
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        response::Response,
    };
    use tempfile::tempdir;
    use tower::util::ServiceExt;

    async fn create_test_app() -> (Router, Arc<StorageEngine>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = EngineConfig {
            flush_policy: FlushPolicy::manual(),
            ..EngineConfig::new(dir.path())
        };
        let engine = Arc::new(StorageEngine::open(config).await.unwrap());
        let router = build_router(AppState::new(Arc::clone(&engine), ApiConfig::default()));

        (router, engine, dir)
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let (app, _engine, _dir) = create_test_app().await;

        for uri in ["/health/live", "/health/ready", "/health"] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_ready_fails_after_close() {
        let (app, engine, _dir) = create_test_app().await;
        engine.close().await;

        let response = app
            .oneshot(Request::builder().uri("/health/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_ingest_single_then_query() {
        let (app, engine, _dir) = create_test_app().await;

        let response = app
            .clone()
            .oneshot(post_json(
                "/ingest/single",
                r#"{"measurement": "cpu", "tags": {"host": "a"}, "fields": {"usage": 0.5}, "timestamp_unix_nano": 20}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: IngestResponse = json_body(response).await;
        assert_eq!(body.accepted, 1);
        assert_eq!(body.rejected, 0);

        // Barrier: the point is applied once the flush completes
        engine.flush().await.unwrap();

        let response = app
            .oneshot(post_json(
                "/query",
                r#"{"key": "cpu|host=a", "from_unix_timestamp_nano": "15", "to_unix_timestamp_nano": "25"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: QueryResponse = json_body(response).await;
        assert!(body.success);
        assert_eq!(body.points.len(), 1);
        assert_eq!(body.points[0].timestamp_unix_nano, 20);
    }

    #[tokio::test]
    async fn test_ingest_batch_counts_invalid_points() {
        let (app, _engine, _dir) = create_test_app().await;

        let response = app
            .oneshot(post_json(
                "/ingest/batch",
                r#"[
                    {"measurement": "cpu", "timestamp_unix_nano": 1},
                    {"measurement": "", "timestamp_unix_nano": 2},
                    {"measurement": "cpu", "timestamp_unix_nano": 3}
                ]"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: IngestResponse = json_body(response).await;
        assert_eq!(body.accepted, 2);
        assert_eq!(body.rejected, 1);
        assert!(!body.error.is_empty());
    }

    #[tokio::test]
    async fn test_ingest_invalid_json() {
        let (app, _engine, _dir) = create_test_app().await;

        let response = app
            .oneshot(post_json("/ingest/single", "not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body: IngestResponse = json_body(response).await;
        assert_eq!(body.accepted, 0);
        assert_eq!(body.rejected, 1);
        assert!(!body.error.is_empty());
    }

    #[tokio::test]
    async fn test_ingest_batch_unreadable_body() {
        let (app, _engine, _dir) = create_test_app().await;

        let response = app
            .oneshot(post_json("/ingest/batch", r#"{"measurement": "cpu"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body: IngestResponse = json_body(response).await;
        assert_eq!(body.accepted, 0);
        assert_eq!(body.rejected, 0);
        assert!(!body.error.is_empty());
    }

    #[tokio::test]
    async fn test_ingest_after_close_is_unavailable() {
        let (app, engine, _dir) = create_test_app().await;
        engine.close().await;

        let response = app
            .oneshot(post_json(
                "/ingest/single",
                r#"{"measurement": "cpu", "timestamp_unix_nano": 1}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body: IngestResponse = json_body(response).await;
        assert_eq!(
            body,
            IngestResponse {
                accepted: 0,
                rejected: 1,
                error: "Rejected: ingest pipeline is shutting down".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_query_reversed_range() {
        let (app, _engine, _dir) = create_test_app().await;

        let response = app
            .oneshot(post_json(
                "/query",
                r#"{"key": "cpu", "from_unix_timestamp_nano": 30, "to_unix_timestamp_nano": 10}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body: QueryResponse = json_body(response).await;
        assert!(!body.success);
        assert!(body.error.contains("range"), "{}", body.error);
        assert!(body.points.is_empty());
    }

    #[tokio::test]
    async fn test_query_bad_timestamp() {
        let (app, _engine, _dir) = create_test_app().await;

        let response = app
            .oneshot(post_json(
                "/query",
                r#"{"key": "cpu", "from_unix_timestamp_nano": "soon", "to_unix_timestamp_nano": 10}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body: QueryResponse = json_body(response).await;
        assert!(!body.success);
        assert!(body.error.contains("from_unix_timestamp_nano"), "{}", body.error);
    }

    #[tokio::test]
    async fn test_query_unknown_series_is_empty() {
        let (app, _engine, _dir) = create_test_app().await;

        let response = app
            .oneshot(post_json(
                "/query",
                r#"{"key": "mem|host=z", "from_unix_timestamp_nano": 0, "to_unix_timestamp_nano": 100}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: QueryResponse = json_body(response).await;
        assert!(body.success);
        assert!(body.points.is_empty());
    }
}
