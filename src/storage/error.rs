//! Storage engine error types
//!
//! Defines all errors that can occur in the storage layer.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the storage engine
#[derive(Error, Debug)]
pub enum StorageError {
    /// Required directories or files could not be created or opened
    #[error("Initialization error: {0}")]
    Init(String),

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A durability log record does not decode
    #[error("Corrupt log {path:?} at line {line}: {reason}")]
    CorruptLog {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// A segment file is malformed
    #[error("Corrupt segment {path:?}: {reason}")]
    CorruptSegment { path: PathBuf, reason: String },

    /// Query range with from > to
    #[error("Invalid time range: from ({from}) is after to ({to})")]
    InvalidRange { from: i64, to: i64 },

    /// Lock acquisition failed
    #[error("Lock error: {0}")]
    Lock(String),

    /// The ingest pipeline no longer accepts commands
    #[error("Ingest pipeline is shutting down")]
    ShuttingDown,
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Why a submission was turned away at the admission queue
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejected {
    /// The queue is at capacity; retry or drop
    #[error("ingest queue is full")]
    QueueFull,

    /// The pipeline has been closed
    #[error("ingest pipeline is shutting down")]
    ShuttingDown,
}
