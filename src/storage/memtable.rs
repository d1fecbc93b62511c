//! In-memory table of not-yet-flushed points
//!
//! Maps each series key to the points received for it since the last flush,
//! in arrival order. Only the ingest consumer mutates the table; queries and
//! flushes read it concurrently through a shared lock.

use crate::storage::types::Point;
use std::collections::HashMap;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Series key → points, plus a running point count
#[derive(Debug, Default)]
pub struct Table {
    series: HashMap<String, Vec<Point>>,
    point_count: usize,
}

impl Table {
    /// Append a point under its series key
    pub fn add(&mut self, point: Point) {
        let key = point.series_key();
        self.series.entry(key).or_default().push(point);
        self.point_count += 1;
    }

    /// Points held for a series, in arrival order
    pub fn get(&self, key: &str) -> Option<&[Point]> {
        self.series.get(key).map(Vec::as_slice)
    }

    /// Point-in-time copy sorted ascending by series key
    pub fn snapshot(&self) -> Snapshot {
        let mut entries: Vec<(String, Vec<Point>)> = self
            .series
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));

        Snapshot {
            entries,
            point_count: self.point_count,
        }
    }

    /// Drop every series and reset the counter
    pub fn clear(&mut self) {
        self.series.clear();
        self.point_count = 0;
    }

    /// Number of distinct series
    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    /// Total number of points across all series
    pub fn point_count(&self) -> usize {
        self.point_count
    }

    pub fn is_empty(&self) -> bool {
        self.point_count == 0
    }
}

/// Immutable, key-sorted copy of a [`Table`], ready to be written as a segment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    entries: Vec<(String, Vec<Point>)>,
    point_count: usize,
}

impl Snapshot {
    /// Build a snapshot from arbitrary entries, sorting them by key
    pub fn from_entries(mut entries: Vec<(String, Vec<Point>)>) -> Self {
        entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        let point_count = entries.iter().map(|(_, points)| points.len()).sum();
        Self {
            entries,
            point_count,
        }
    }

    /// Entries in ascending key order
    pub fn entries(&self) -> &[(String, Vec<Point>)] {
        &self.entries
    }

    pub fn series_count(&self) -> usize {
        self.entries.len()
    }

    pub fn point_count(&self) -> usize {
        self.point_count
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// When a table is due for a flush
///
/// Evaluated after each add, so a burst of adds may overshoot the limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    /// Flush once this many distinct series are buffered
    pub max_series: Option<usize>,
    /// Flush once this many points are buffered
    pub max_points: Option<usize>,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            max_series: Some(1000),
            max_points: Some(100_000),
        }
    }
}

impl FlushPolicy {
    /// Never flush on size; only explicit or interval flushes apply
    pub fn manual() -> Self {
        Self {
            max_series: None,
            max_points: None,
        }
    }

    pub fn should_flush(&self, table: &Table) -> bool {
        let series_hit = self
            .max_series
            .is_some_and(|max| table.series_count() >= max);
        let points_hit = self
            .max_points
            .is_some_and(|max| table.point_count() >= max);
        series_hit || points_hit
    }
}

/// Shared, lock-guarded [`Table`]
#[derive(Debug, Default)]
pub struct MemTable {
    inner: RwLock<Table>,
}

impl MemTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared access, for reads that must see a consistent table
    pub async fn read(&self) -> RwLockReadGuard<'_, Table> {
        self.inner.read().await
    }

    /// Exclusive access, for the ingest consumer only
    pub async fn write(&self) -> RwLockWriteGuard<'_, Table> {
        self.inner.write().await
    }

    pub async fn add(&self, point: Point) {
        self.inner.write().await.add(point);
    }

    /// Copy of the points held for a series
    pub async fn get(&self, key: &str) -> Option<Vec<Point>> {
        self.inner.read().await.get(key).map(<[Point]>::to_vec)
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.inner.read().await.snapshot()
    }

    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }

    pub async fn series_count(&self) -> usize {
        self.inner.read().await.series_count()
    }

    pub async fn point_count(&self) -> usize {
        self.inner.read().await.point_count()
    }
}
