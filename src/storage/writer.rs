//! Write state owned by the ingest consumer
//!
//! [`IngestWriter`] holds the durability log exclusively and is the only
//! writer of the in-memory table. Per point it appends to the log, adds to
//! the table, and flushes when the policy fires:
//!
//! ```text
//! snapshot ─▶ write segment ─▶ publish + clear (one exclusive section) ─▶ rotate log
//! ```
//!
//! A failed segment write leaves both table and log untouched.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::memtable::{FlushPolicy, MemTable};
use crate::storage::pipeline::PointSink;
use crate::storage::segment::SegmentCatalog;
use crate::storage::types::Point;
use crate::storage::wal::WriteAheadLog;
use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// Counters published by the writer for observers
#[derive(Debug, Default)]
pub struct IngestStats {
    log_start_time: AtomicI64,
    log_records: AtomicU64,
    points_dropped: AtomicU64,
    flushes: AtomicU64,
}

impl IngestStats {
    /// Start time of the active log
    pub fn log_start_time(&self) -> i64 {
        self.log_start_time.load(Ordering::Relaxed)
    }

    /// Records in the active log
    pub fn log_records(&self) -> u64 {
        self.log_records.load(Ordering::Relaxed)
    }

    /// Accepted points lost to a failed log append
    pub fn points_dropped(&self) -> u64 {
        self.points_dropped.load(Ordering::Relaxed)
    }

    /// Successful flushes since startup
    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }
}

/// Outcome of startup replay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Log records added back into the table
    pub replayed: u64,
    /// Log records skipped because a segment already holds them
    pub already_flushed: u64,
}

pub struct IngestWriter {
    wal: WriteAheadLog,
    memtable: Arc<MemTable>,
    segments: Arc<SegmentCatalog>,
    policy: FlushPolicy,
    stats: Arc<IngestStats>,
}

impl IngestWriter {
    pub fn new(
        wal: WriteAheadLog,
        memtable: Arc<MemTable>,
        segments: Arc<SegmentCatalog>,
        policy: FlushPolicy,
    ) -> Self {
        let writer = Self {
            wal,
            memtable,
            segments,
            policy,
            stats: Arc::new(IngestStats::default()),
        };
        writer.publish_log_stats();
        writer
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        Arc::clone(&self.stats)
    }

    /// Rebuild the table from the active log. Startup only, before the
    /// pipeline accepts submissions.
    ///
    /// Segments named after the active log already hold its leading records
    /// (a crash hit between segment write and log rotation); those records
    /// are skipped rather than duplicated.
    pub async fn replay(&mut self) -> StorageResult<ReplaySummary> {
        let points = self.wal.replay()?;
        let total = points.len() as u64;
        let flushed = self
            .segments
            .points_flushed_from(self.wal.start_time())
            .await?;

        if flushed > total {
            return Err(StorageError::Init(format!(
                "segments hold {} points from log {:?}, which has only {} records",
                flushed,
                self.wal.path(),
                total
            )));
        }

        {
            let mut table = self.memtable.write().await;
            for point in points.into_iter().skip(flushed as usize) {
                table.add(point);
            }
        }

        if flushed > 0 && flushed == total {
            tracing::info!(
                log = ?self.wal.path(),
                "Log fully flushed before shutdown, completing rotation"
            );
            self.wal.rotate()?;
        }

        self.publish_log_stats();

        Ok(ReplaySummary {
            replayed: total - flushed,
            already_flushed: flushed,
        })
    }

    async fn flush_table(&mut self) -> StorageResult<()> {
        let snapshot = self.memtable.snapshot().await;
        if snapshot.is_empty() {
            return Ok(());
        }

        let segment = self.segments.write(&snapshot, self.wal.start_time())?;

        tracing::info!(
            segment = ?segment.path(),
            series = snapshot.series_count(),
            points = snapshot.point_count(),
            "Flushed table to segment"
        );

        {
            let mut table = self.memtable.write().await;
            self.segments.publish(segment).await;
            table.clear();
        }
        self.stats.flushes.fetch_add(1, Ordering::Relaxed);

        let rotated = self.wal.rotate();
        self.publish_log_stats();
        rotated
    }

    fn publish_log_stats(&self) {
        self.stats
            .log_start_time
            .store(self.wal.start_time(), Ordering::Relaxed);
        self.stats
            .log_records
            .store(self.wal.record_count(), Ordering::Relaxed);
    }
}

#[async_trait]
impl PointSink for IngestWriter {
    async fn ingest(&mut self, point: Point) {
        if let Err(e) = self.wal.append(&point) {
            self.stats.points_dropped.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                series = %point.series_key(),
                timestamp = point.timestamp_unix_nano,
                "Dropping point, log append failed: {}",
                e
            );
            return;
        }
        self.publish_log_stats();

        let due = {
            let mut table = self.memtable.write().await;
            table.add(point);
            self.policy.should_flush(&table)
        };

        if due {
            if let Err(e) = self.flush_table().await {
                tracing::error!("Threshold flush failed: {}", e);
            }
        }
    }

    async fn flush(&mut self) -> StorageResult<()> {
        self.flush_table().await
    }

    async fn tick(&mut self) {
        if let Err(e) = self.flush_table().await {
            tracing::error!("Interval flush failed: {}", e);
        }
    }
}
