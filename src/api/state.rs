//! Application State
//!
//! Shared state accessible by all API handlers.

use crate::storage::StorageEngine;
use std::sync::Arc;
use std::time::Instant;

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Storage engine for ingesting and querying points
    pub engine: Arc<StorageEngine>,
    /// API configuration
    pub config: Arc<ApiConfig>,
    /// Server start time for uptime tracking
    pub start_time: Instant,
}

impl AppState {
    pub fn new(engine: Arc<StorageEngine>, config: ApiConfig) -> Self {
        Self {
            engine,
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
    /// Maximum points per batch request
    pub max_batch_points: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8086,
            max_body_size: 4 * 1024 * 1024,
            max_batch_points: 10_000,
        }
    }
}

impl ApiConfig {
    /// Create config with custom host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<&crate::config::ApiConfig> for ApiConfig {
    fn from(config: &crate::config::ApiConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            max_body_size: config.max_body_bytes,
            ..Default::default()
        }
    }
}
