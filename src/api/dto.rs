//! Data Transfer Objects
//!
//! Request and response types for the REST API. Points are accepted and
//! returned in their storage JSON form.

use serde::{Deserialize, Serialize};

use crate::storage::{Point, StorageStats};

// ============================================================================
// Ingest DTOs
// ============================================================================

/// Response for single and batch ingestion
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub accepted: usize,
    pub rejected: usize,
    /// Empty when everything was accepted
    #[serde(default)]
    pub error: String,
}

// ============================================================================
// Query DTOs
// ============================================================================

/// Query request body
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    /// Series key, e.g. `cpu|host=a`
    pub key: String,
    pub from_unix_timestamp_nano: Timestamp,
    pub to_unix_timestamp_nano: Timestamp,
}

/// Nanosecond timestamp given as a JSON integer or a decimal string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Int(i64),
    Text(String),
}

impl Timestamp {
    pub fn resolve(&self) -> Result<i64, String> {
        match self {
            Timestamp::Int(ts) => Ok(*ts),
            Timestamp::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| format!("{:?} is not an integer timestamp", text)),
        }
    }
}

/// Query response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub success: bool,
    #[serde(default)]
    pub error: String,
    pub points: Vec<Point>,
}

// ============================================================================
// Health DTOs
// ============================================================================

/// Full health status
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `healthy`, or `shutting_down` once ingestion is closed
    pub status: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub storage: StorageStats,
}
