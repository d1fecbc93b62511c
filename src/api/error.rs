//! API Error Types
//!
//! Defines error types for the API layer and implements conversion
//! to HTTP responses with appropriate status codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::storage::{Rejected, StorageError};

/// API error types
#[derive(Error, Debug)]
pub enum ApiError {
    /// Request validation failed
    #[error("Validation error: {0}")]
    Validation(String),

    /// The ingest queue turned the request away
    #[error("Rejected: {0}")]
    Rejected(#[from] Rejected),

    /// Storage layer error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// HTTP status this error maps to
    pub(crate) fn status(&self) -> StatusCode {
        self.status_and_code().0
    }

    /// Whether the failure is the server's fault rather than the request's
    pub(crate) fn is_server_fault(&self) -> bool {
        self.status() == StatusCode::INTERNAL_SERVER_ERROR
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ApiError::Rejected(Rejected::QueueFull) => {
                (StatusCode::SERVICE_UNAVAILABLE, "QUEUE_FULL")
            }
            ApiError::Rejected(Rejected::ShuttingDown)
            | ApiError::Storage(StorageError::ShuttingDown) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SHUTTING_DOWN")
            }
            ApiError::Storage(StorageError::InvalidRange { .. }) => {
                (StatusCode::BAD_REQUEST, "INVALID_RANGE")
            }
            ApiError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
        }
    }
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
    pub request_id: String,
}

/// Error details
#[derive(Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let request_id = uuid::Uuid::new_v4().to_string();

        // Backpressure and bad input are the client's concern
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(
                request_id = %request_id,
                error_code = %code,
                error_message = %self,
                "API error occurred"
            );
        } else {
            tracing::debug!(
                request_id = %request_id,
                error_code = %code,
                error_message = %self,
                "Request refused"
            );
        }

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: self.to_string(),
            },
            request_id,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for API operations
pub type ApiResult<T> = Result<T, ApiError>;
