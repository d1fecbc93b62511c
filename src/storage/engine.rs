//! Storage engine: startup recovery, ingestion front door, and query path
//!
//! Owns the shared in-memory table and segment catalog, and the pipeline
//! whose consumer holds the durability log.

use crate::config::StorageConfig;
use crate::storage::error::{Rejected, StorageError, StorageResult};
use crate::storage::memtable::{FlushPolicy, MemTable};
use crate::storage::pipeline::{BatchOutcome, IngestPipeline, PipelineConfig, DEFAULT_QUEUE_CAPACITY};
use crate::storage::segment::SegmentCatalog;
use crate::storage::types::Point;
use crate::storage::writer::{IngestStats, IngestWriter};
use crate::storage::wal::WriteAheadLog;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Engine settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root directory for all data
    pub data_dir: PathBuf,
    /// Admission queue capacity
    pub queue_capacity: usize,
    /// Size thresholds that trigger a flush
    pub flush_policy: FlushPolicy,
    /// Flush a non-empty table at this period, if set
    pub flush_interval: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("tickdb_data"),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            flush_policy: FlushPolicy::default(),
            flush_interval: None,
        }
    }
}

impl EngineConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Get path to the durability log directory
    pub fn wal_dir(&self) -> PathBuf {
        self.data_dir.join("wal")
    }

    /// Get path to the segments directory
    pub fn segments_dir(&self) -> PathBuf {
        self.data_dir.join("sstable")
    }
}

impl From<&StorageConfig> for EngineConfig {
    fn from(config: &StorageConfig) -> Self {
        let limit = |max: usize| (max > 0).then_some(max);
        Self {
            data_dir: PathBuf::from(&config.data_dir),
            queue_capacity: config.queue_capacity,
            flush_policy: FlushPolicy {
                max_series: limit(config.flush_max_series),
                max_points: limit(config.flush_max_points),
            },
            flush_interval: (config.flush_interval_ms > 0)
                .then(|| Duration::from_millis(config.flush_interval_ms)),
        }
    }
}

/// Time-series storage engine
pub struct StorageEngine {
    config: EngineConfig,
    memtable: Arc<MemTable>,
    segments: Arc<SegmentCatalog>,
    pipeline: IngestPipeline,
    ingest_stats: Arc<IngestStats>,
}

impl StorageEngine {
    /// Open or create an engine under `config.data_dir`.
    ///
    /// Loads every segment, replays the active log into the table, then
    /// starts the ingest consumer. Must run inside a Tokio runtime.
    pub async fn open(config: EngineConfig) -> StorageResult<Self> {
        std::fs::create_dir_all(&config.data_dir).map_err(|e| {
            StorageError::Init(format!(
                "cannot create data directory {:?}: {}",
                config.data_dir, e
            ))
        })?;

        let segments = Arc::new(SegmentCatalog::load(config.segments_dir())?);
        let wal = WriteAheadLog::open(config.wal_dir())?;
        let memtable = Arc::new(MemTable::new());

        let mut writer = IngestWriter::new(
            wal,
            Arc::clone(&memtable),
            Arc::clone(&segments),
            config.flush_policy,
        );
        let replay = writer.replay().await?;
        if replay.replayed > 0 || replay.already_flushed > 0 {
            tracing::info!(
                replayed = replay.replayed,
                already_flushed = replay.already_flushed,
                "Recovered points from log"
            );
        }

        let ingest_stats = writer.stats();
        let pipeline = IngestPipeline::start(
            writer,
            PipelineConfig {
                queue_capacity: config.queue_capacity,
                tick_interval: config.flush_interval,
            },
        );

        tracing::info!(data_dir = ?config.data_dir, "Storage engine opened");

        Ok(Self {
            config,
            memtable,
            segments,
            pipeline,
            ingest_stats,
        })
    }

    /// Queue a point for ingestion. Never blocks.
    pub fn submit(&self, point: Point) -> Result<(), Rejected> {
        let result = self.pipeline.submit(point);
        if let Err(reason) = result {
            tracing::debug!("Point rejected: {}", reason);
        }
        result
    }

    /// Queue several points, each accepted or rejected on its own
    pub fn submit_batch(&self, points: impl IntoIterator<Item = Point>) -> BatchOutcome {
        self.pipeline.submit_batch(points)
    }

    /// Flush the table to a segment once everything queued so far is applied
    pub async fn flush(&self) -> StorageResult<()> {
        self.pipeline.flush().await
    }

    /// Points of one series with `from <= timestamp <= to`.
    ///
    /// Segment points come first, oldest flush first, then unflushed points.
    /// Within each source, points keep arrival order.
    pub async fn query(&self, key: &str, from: i64, to: i64) -> StorageResult<Vec<Point>> {
        if from > to {
            return Err(StorageError::InvalidRange { from, to });
        }

        // The consumer publishes a segment and clears the table under the
        // table's write lock, so holding the read lock across both reads
        // sees each point exactly once.
        let (unflushed, segments) = {
            let table = self.memtable.read().await;
            let unflushed = table.get(key).map(<[Point]>::to_vec).unwrap_or_default();
            (unflushed, self.segments.list().await)
        };

        let in_range = |p: &Point| p.timestamp_unix_nano >= from && p.timestamp_unix_nano <= to;

        let mut points = Vec::new();
        for segment in &segments {
            if let Some(stored) = segment.lookup(key)? {
                points.extend(stored.into_iter().filter(in_range));
            }
        }
        points.extend(unflushed.into_iter().filter(in_range));

        tracing::debug!(key, from, to, matched = points.len(), "Query complete");
        Ok(points)
    }

    /// Get engine statistics
    pub async fn stats(&self) -> StorageStats {
        let (series_buffered, points_buffered) = {
            let table = self.memtable.read().await;
            (table.series_count(), table.point_count())
        };

        StorageStats {
            segment_count: self.segments.len().await,
            series_buffered,
            points_buffered,
            log_start_time: self.ingest_stats.log_start_time(),
            log_records: self.ingest_stats.log_records(),
            points_dropped: self.ingest_stats.points_dropped(),
            flushes: self.ingest_stats.flushes(),
            queue_pending: self.pipeline.pending(),
            queue_capacity: self.pipeline.capacity(),
        }
    }

    /// Stop accepting points and wait until every accepted point is applied.
    ///
    /// Unflushed points stay in the log and are replayed on next open.
    pub async fn close(&self) {
        if self.pipeline.is_closed() {
            return;
        }
        tracing::info!("Shutting down storage engine...");
        self.pipeline.close().await;
        tracing::info!("Storage engine shutdown complete");
    }

    /// False once [`close`](Self::close) has begun
    pub fn is_accepting(&self) -> bool {
        !self.pipeline.is_closed()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

/// Storage engine statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct StorageStats {
    pub segment_count: usize,
    pub series_buffered: usize,
    pub points_buffered: usize,
    pub log_start_time: i64,
    pub log_records: u64,
    pub points_dropped: u64,
    pub flushes: u64,
    pub queue_pending: usize,
    pub queue_capacity: usize,
}

impl std::fmt::Display for StorageStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Segments: {}, Buffered: {} points in {} series, Log: {} records since {}, Queue: {}/{}",
            self.segment_count,
            self.points_buffered,
            self.series_buffered,
            self.log_records,
            self.log_start_time,
            self.queue_pending,
            self.queue_capacity
        )
    }
}
