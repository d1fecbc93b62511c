//! tickdb Storage Engine
//!
//! - **types**: Points and series keys
//! - **wal**: Write-ahead log for durability
//! - **memtable**: In-memory table of unflushed points
//! - **segment**: Immutable, indexed segment files and their catalog
//! - **pipeline**: Bounded admission queue and its single consumer
//! - **writer**: The consumer's write path, log to table to segment
//! - **engine**: Recovery, submission and queries
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//!   Point → queue → WAL (fsync) → MemTable ──flush──▶ Segment, rotate WAL
//!
//! Read Path:
//!   Query → Segments (index lookup) + MemTable → Filter by time
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use tickdb::storage::{EngineConfig, Point, StorageEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = StorageEngine::open(EngineConfig::new("./data")).await?;
//!
//!     engine.submit(Point::new("cpu", 20).tag("host", "a").field("usage", 0.5))?;
//!     engine.flush().await?;
//!
//!     let points = engine.query("cpu|host=a", 15, 25).await?;
//!     assert_eq!(points.len(), 1);
//!
//!     engine.close().await;
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod error;
pub mod memtable;
pub mod pipeline;
pub mod segment;
pub mod types;
pub mod wal;
pub mod writer;

// Re-export commonly used types
pub use engine::{EngineConfig, StorageEngine, StorageStats};
pub use error::{Rejected, StorageError, StorageResult};
pub use memtable::{FlushPolicy, MemTable, Snapshot};
pub use pipeline::{BatchOutcome, IngestPipeline, PipelineConfig, PointSink};
pub use segment::{Segment, SegmentCatalog, SegmentName};
pub use types::{series_key, Point};
pub use wal::WriteAheadLog;
