//! # tickdb
//!
//! A minimal time-series storage engine with an HTTP front end.
//!
//! ## Features
//!
//! - **Durability**: every accepted point is fsynced to a write-ahead log
//!   before it becomes visible
//! - **Backpressure**: a bounded ingest queue rejects instead of blocking
//! - **Immutable segments**: key-sorted files with a trailing index, so a
//!   lookup reads one entry
//! - **Crash recovery**: log replay that never double-counts flushed points
//!
//! ## Modules
//!
//! - [`storage`]: Core time-series storage engine
//! - [`config`]: File and environment configuration
//! - [`api`]: REST API server with Axum
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tickdb::storage::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = StorageEngine::open(EngineConfig::new("./data")).await?;
//!
//!     let outcome = engine.submit_batch((0..10).map(|i| {
//!         Point::new("mood", i).tag("source", "manual").field("value", 7.5)
//!     }));
//!     println!("accepted {} of 10", outcome.accepted);
//!
//!     engine.flush().await?;
//!     let points = engine.query("mood|source=manual", 0, 9).await?;
//!     println!("Found {} entries", points.len());
//!
//!     // Graceful shutdown
//!     engine.close().await;
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod storage;

// Re-export top-level types for convenience
pub use storage::{
    EngineConfig, Point, Rejected, StorageEngine, StorageError, StorageResult, StorageStats,
};

pub use api::{build_router, serve, ApiConfig, ApiError, AppState};

pub use config::{Config, ConfigError, LoggingConfig};
