//! Segment file format for TickDB storage
//!
//! A segment is an immutable, key-sorted snapshot of the in-memory table.
//!
//! Layout (all integers little-endian):
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ DATA BLOCK                              │
//! │   For each series, ascending by key:    │
//! │     len: i32                            │
//! │     json: {"key": .., "value": [..]}    │
//! ├─────────────────────────────────────────┤
//! │ INDEX BLOCK                             │
//! │   len: i32                              │
//! │   json: {key: entry offset, ..}         │
//! ├─────────────────────────────────────────┤
//! │ FOOTER                                  │
//! │   index_offset: u64                     │
//! └─────────────────────────────────────────┘
//! ```
//!
//! A reader only touches the footer and index on open, then seeks straight
//! to the entry of the series being looked up. Only the index stays in
//! memory; each lookup opens the file for the duration of one read.
//!
//! Files are named `<log start>-<flush time>.sst`. They are written under a
//! `.sst.tmp` name and renamed into place once fully synced, so a `.sst`
//! file on disk is always complete.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::memtable::Snapshot;
use crate::storage::types::Point;
use crate::storage::wal::sync_dir;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Size of a block length prefix
const LEN_PREFIX_SIZE: u64 = 4;

/// Size of the trailing index offset
const FOOTER_SIZE: u64 = 8;

const SEGMENT_EXTENSION: &str = "sst";
const TMP_EXTENSION: &str = "sst.tmp";

#[derive(Serialize)]
struct EntryRef<'a> {
    key: &'a str,
    value: &'a [Point],
}

#[derive(Deserialize)]
struct Entry {
    key: String,
    value: Vec<Point>,
}

/// Identity of a segment, parsed from its file name
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentName {
    /// Start time of the log whose records the segment holds
    pub log_start: i64,
    /// Unix time (seconds) of the flush
    pub flushed_at: i64,
}

impl SegmentName {
    /// Parse `<log start>-<flush time>.sst`
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(".sst")?;
        let (log_start, flushed_at) = stem.split_once('-')?;
        Some(Self {
            log_start: log_start.parse().ok()?,
            flushed_at: flushed_at.parse().ok()?,
        })
    }

    pub fn file_name(&self) -> String {
        format!("{}-{}.{}", self.log_start, self.flushed_at, SEGMENT_EXTENSION)
    }

    /// A name for a flush happening now that does not collide in `dir`
    fn unused(dir: &Path, log_start: i64) -> Self {
        let mut name = Self {
            log_start,
            flushed_at: Utc::now().timestamp(),
        };
        while dir.join(name.file_name()).exists() {
            name.flushed_at += 1;
        }
        name
    }
}

impl std::fmt::Display for SegmentName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.log_start, self.flushed_at)
    }
}

/// Write `snapshot` as a new segment under `dir`.
///
/// Returns the final path. On error no `.sst` file is left behind.
pub fn write_segment(dir: &Path, snapshot: &Snapshot, log_start: i64) -> StorageResult<PathBuf> {
    std::fs::create_dir_all(dir)?;

    let name = SegmentName::unused(dir, log_start);
    let path = dir.join(name.file_name());
    let tmp = path.with_extension(TMP_EXTENSION);

    let written = write_synced(&tmp, snapshot)
        .and_then(|_| std::fs::rename(&tmp, &path).map_err(StorageError::from));
    if let Err(e) = written {
        if let Err(cleanup) = std::fs::remove_file(&tmp) {
            tracing::debug!(path = ?tmp, "Could not remove partial segment: {}", cleanup);
        }
        return Err(e);
    }

    if let Err(e) = sync_dir(dir) {
        tracing::debug!(dir = ?dir, "Directory sync after segment write failed: {}", e);
    }

    Ok(path)
}

fn write_synced(path: &Path, snapshot: &Snapshot) -> StorageResult<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    encode_segment(&mut writer, snapshot)?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(())
}

/// Encode a snapshot in segment layout, returning the bytes written
pub fn encode_segment<W: Write>(writer: &mut W, snapshot: &Snapshot) -> StorageResult<u64> {
    let mut offset = 0u64;
    let mut index: BTreeMap<&str, u64> = BTreeMap::new();

    for (key, points) in snapshot.entries() {
        let entry = serde_json::to_vec(&EntryRef { key, value: points })?;
        index.insert(key, offset);
        offset += write_block(writer, &entry)?;
    }

    let index_offset = offset;
    let index_json = serde_json::to_vec(&index)?;
    offset += write_block(writer, &index_json)?;

    writer.write_all(&index_offset.to_le_bytes())?;
    Ok(offset + FOOTER_SIZE)
}

fn write_block<W: Write>(writer: &mut W, payload: &[u8]) -> StorageResult<u64> {
    let len = i32::try_from(payload.len()).map_err(|_| {
        StorageError::Serialization(format!(
            "segment block of {} bytes exceeds the i32 length prefix",
            payload.len()
        ))
    })?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(payload)?;
    Ok(LEN_PREFIX_SIZE + payload.len() as u64)
}

/// An open, read-only segment
pub struct Segment {
    path: PathBuf,
    name: Option<SegmentName>,
    /// Series key → entry offset
    index: HashMap<String, u64>,
    /// Start of the index block; entries live before it
    index_offset: u64,
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("path", &self.path)
            .field("series", &self.index.len())
            .field("index_offset", &self.index_offset)
            .finish()
    }
}

impl Segment {
    /// Open a segment, reading only its footer and index
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = BufReader::new(File::open(&path)?);
        let file_len = file.get_ref().metadata()?.len();

        if file_len < LEN_PREFIX_SIZE + FOOTER_SIZE {
            return Err(corrupt(&path, format!("file too short ({} bytes)", file_len)));
        }

        let footer_start = file_len - FOOTER_SIZE;
        file.seek(SeekFrom::Start(footer_start))?;
        let mut footer = [0u8; FOOTER_SIZE as usize];
        file.read_exact(&mut footer)?;
        let index_offset = u64::from_le_bytes(footer);

        if index_offset > footer_start - LEN_PREFIX_SIZE {
            return Err(corrupt(
                &path,
                format!("index offset {} beyond file end", index_offset),
            ));
        }

        let index_json = read_block(&mut file, &path, index_offset, footer_start)?;
        if index_offset + LEN_PREFIX_SIZE + index_json.len() as u64 != footer_start {
            return Err(corrupt(&path, "index block does not end at footer".to_string()));
        }

        let index: HashMap<String, u64> = serde_json::from_slice(&index_json)
            .map_err(|e| corrupt(&path, format!("undecodable index: {}", e)))?;

        if let Some((key, offset)) = index.iter().find(|(_, o)| **o >= index_offset) {
            return Err(corrupt(
                &path,
                format!("entry {:?} at offset {} overlaps the index", key, offset),
            ));
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(SegmentName::parse);

        Ok(Self {
            path,
            name,
            index,
            index_offset,
        })
    }

    /// Points stored for `key`, or `None` if this segment lacks the series
    pub fn lookup(&self, key: &str) -> StorageResult<Option<Vec<Point>>> {
        let Some(&offset) = self.index.get(key) else {
            return Ok(None);
        };

        let mut reader = BufReader::new(File::open(&self.path)?);
        let payload = read_block(&mut reader, &self.path, offset, self.index_offset)?;

        let entry: Entry = serde_json::from_slice(&payload).map_err(|e| {
            corrupt(&self.path, format!("undecodable entry at offset {}: {}", offset, e))
        })?;

        if entry.key != key {
            return Err(corrupt(
                &self.path,
                format!(
                    "index maps {:?} to offset {} holding {:?}",
                    key, offset, entry.key
                ),
            ));
        }

        Ok(Some(entry.value))
    }

    /// Series keys held by this segment, ascending
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.index.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Total points across all series (reads every entry)
    pub fn point_count(&self) -> StorageResult<u64> {
        let mut total = 0u64;
        for key in self.index.keys() {
            total += self.lookup(key)?.map_or(0, |points| points.len() as u64);
        }
        Ok(total)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parsed file name, if it follows the segment naming scheme
    pub fn name(&self) -> Option<SegmentName> {
        self.name
    }

    /// Number of series in the segment
    pub fn series_count(&self) -> usize {
        self.index.len()
    }
}

/// Read a length-prefixed block at `offset`, which must end by `limit`
fn read_block<R: Read + Seek>(
    reader: &mut R,
    path: &Path,
    offset: u64,
    limit: u64,
) -> StorageResult<Vec<u8>> {
    reader.seek(SeekFrom::Start(offset))?;

    let mut len_buf = [0u8; LEN_PREFIX_SIZE as usize];
    reader.read_exact(&mut len_buf)?;
    let len = i32::from_le_bytes(len_buf);

    let len = u64::try_from(len)
        .map_err(|_| corrupt(path, format!("negative block length at offset {}", offset)))?;
    if offset + LEN_PREFIX_SIZE + len > limit {
        return Err(corrupt(
            path,
            format!("block at offset {} of {} bytes overruns its region", offset, len),
        ));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

fn corrupt(path: &Path, reason: String) -> StorageError {
    StorageError::CorruptSegment {
        path: path.to_path_buf(),
        reason,
    }
}

/// Every segment on disk, in flush order
pub struct SegmentCatalog {
    dir: PathBuf,
    segments: RwLock<Vec<Arc<Segment>>>,
}

impl SegmentCatalog {
    /// Open every segment in `dir`, creating the directory if needed.
    ///
    /// Leftover `.sst.tmp` files from an interrupted flush are removed.
    pub fn load(dir: impl AsRef<Path>) -> StorageResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| {
            StorageError::Init(format!("cannot create segment directory {:?}: {}", dir, e))
        })?;

        let entries = std::fs::read_dir(&dir).map_err(|e| {
            StorageError::Init(format!("cannot read segment directory {:?}: {}", dir, e))
        })?;

        let mut segments = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            if file_name.ends_with(".sst.tmp") {
                tracing::warn!(path = ?path, "Removing incomplete segment");
                std::fs::remove_file(&path)?;
                continue;
            }

            if SegmentName::parse(file_name).is_none() {
                continue;
            }

            segments.push(Arc::new(Segment::open(&path)?));
        }

        segments.sort_by_key(|s| s.name());

        tracing::info!("Loaded {} segments", segments.len());
        Ok(Self {
            dir,
            segments: RwLock::new(segments),
        })
    }

    /// Write a snapshot as a new segment and open it. Not yet visible to
    /// readers until [`publish`](Self::publish).
    ///
    /// A segment that cannot be opened back is removed, so no file outside
    /// the catalog holds flushed points.
    pub fn write(&self, snapshot: &Snapshot, log_start: i64) -> StorageResult<Segment> {
        self.write_with(snapshot, log_start, |path| Segment::open(path))
    }

    fn write_with<F>(&self, snapshot: &Snapshot, log_start: i64, open: F) -> StorageResult<Segment>
    where
        F: FnOnce(&Path) -> StorageResult<Segment>,
    {
        let path = write_segment(&self.dir, snapshot, log_start)?;
        match open(&path) {
            Ok(segment) => Ok(segment),
            Err(e) => {
                tracing::warn!(path = ?path, "Removing segment that failed to open: {}", e);
                if let Err(remove) = std::fs::remove_file(&path) {
                    tracing::error!(path = ?path, "Could not remove unopenable segment: {}", remove);
                }
                Err(e)
            }
        }
    }

    /// Make a segment visible to readers
    pub async fn publish(&self, segment: Segment) {
        let mut segments = self.segments.write().await;
        segments.push(Arc::new(segment));
        segments.sort_by_key(|s| s.name());
    }

    /// Current segments, oldest flush first
    pub async fn list(&self) -> Vec<Arc<Segment>> {
        self.segments.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.segments.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.segments.read().await.is_empty()
    }

    /// Points already flushed out of the log that started at `log_start`
    pub async fn points_flushed_from(&self, log_start: i64) -> StorageResult<u64> {
        let segments = self.list().await;
        let mut total = 0u64;
        for segment in segments
            .iter()
            .filter(|s| s.name().is_some_and(|n| n.log_start == log_start))
        {
            total += segment.point_count()?;
        }
        Ok(total)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn series(key: &str, timestamps: &[i64]) -> (String, Vec<Point>) {
        let points = timestamps
            .iter()
            .map(|&ts| Point::new("m", ts).tag("k", key).field("v", ts as f64))
            .collect();
        (key.to_string(), points)
    }

    fn abc_snapshot() -> Snapshot {
        Snapshot::from_entries(vec![
            series("c", &[5, 6]),
            series("a", &[1, 2, 3]),
            series("b", &[4]),
        ])
    }

    #[test]
    fn test_write_and_lookup_every_key() {
        let dir = tempdir().unwrap();
        let snapshot = abc_snapshot();

        let path = write_segment(dir.path(), &snapshot, 100).unwrap();
        let segment = Segment::open(&path).unwrap();

        assert_eq!(segment.keys(), vec!["a", "b", "c"]);
        for (key, points) in snapshot.entries() {
            assert_eq!(segment.lookup(key).unwrap().as_ref(), Some(points));
        }
        assert!(segment.lookup("zzz").unwrap().is_none());
        assert_eq!(segment.point_count().unwrap(), 6);
    }

    #[test]
    fn test_layout_matches_format() {
        let snapshot = abc_snapshot();
        let mut buf = Cursor::new(Vec::new());
        let written = encode_segment(&mut buf, &snapshot).unwrap();
        let bytes = buf.into_inner();
        assert_eq!(written, bytes.len() as u64);

        let footer: [u8; 8] = bytes[bytes.len() - 8..].try_into().unwrap();
        let index_offset = u64::from_le_bytes(footer) as usize;

        let index_len =
            i32::from_le_bytes(bytes[index_offset..index_offset + 4].try_into().unwrap()) as usize;
        assert_eq!(index_offset + 4 + index_len, bytes.len() - 8);

        let index: BTreeMap<String, u64> =
            serde_json::from_slice(&bytes[index_offset + 4..index_offset + 4 + index_len]).unwrap();
        assert_eq!(index["a"], 0);

        // Entries appear in key order, each at its indexed offset
        let mut offsets: Vec<(u64, &str)> = index.iter().map(|(k, &o)| (o, k.as_str())).collect();
        offsets.sort();
        let order: Vec<&str> = offsets.iter().map(|(_, k)| *k).collect();
        assert_eq!(order, vec!["a", "b", "c"]);

        let first_len = i32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let first: serde_json::Value = serde_json::from_slice(&bytes[4..4 + first_len]).unwrap();
        assert_eq!(first["key"], "a");
        assert_eq!(first["value"].as_array().unwrap().len(), 3);
        assert_eq!(index["b"], (4 + first_len) as u64);
    }

    #[test]
    fn test_lookup_seeks_without_scanning() {
        let dir = tempdir().unwrap();
        let path = write_segment(dir.path(), &abc_snapshot(), 100).unwrap();

        let (offset_a, offset_c) = {
            let segment = Segment::open(&path).unwrap();
            (segment.index["a"], segment.index["c"])
        };

        // Scribble over the payloads of "a" and "c"; "b" must stay readable
        let mut bytes = std::fs::read(&path).unwrap();
        for offset in [offset_a, offset_c] {
            let start = offset as usize + 4;
            bytes[start..start + 8].copy_from_slice(b"garbage!");
        }
        std::fs::write(&path, &bytes).unwrap();

        let segment = Segment::open(&path).unwrap();
        let b = segment.lookup("b").unwrap().unwrap();
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].timestamp_unix_nano, 4);

        assert!(matches!(
            segment.lookup("a"),
            Err(StorageError::CorruptSegment { .. })
        ));
    }

    #[test]
    fn test_empty_snapshot_round_trip() {
        let dir = tempdir().unwrap();
        let path = write_segment(dir.path(), &Snapshot::default(), 1).unwrap();

        let segment = Segment::open(&path).unwrap();
        assert_eq!(segment.series_count(), 0);
        assert!(segment.lookup("a").unwrap().is_none());
    }

    #[test]
    fn test_truncated_segment_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = write_segment(dir.path(), &abc_snapshot(), 100).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();
        assert!(matches!(
            Segment::open(&path),
            Err(StorageError::CorruptSegment { .. })
        ));

        std::fs::write(&path, b"tiny").unwrap();
        assert!(matches!(
            Segment::open(&path),
            Err(StorageError::CorruptSegment { .. })
        ));
    }

    #[test]
    fn test_segment_names() {
        let name = SegmentName::parse("1700000000-1700000042.sst").unwrap();
        assert_eq!(name.log_start, 1_700_000_000);
        assert_eq!(name.flushed_at, 1_700_000_042);
        assert_eq!(name.file_name(), "1700000000-1700000042.sst");

        assert!(SegmentName::parse("1700000000.sst").is_none());
        assert!(SegmentName::parse("a-b.sst").is_none());
        assert!(SegmentName::parse("1-2.sst.tmp").is_none());

        let older = SegmentName { log_start: 1, flushed_at: 9 };
        let newer = SegmentName { log_start: 2, flushed_at: 3 };
        assert!(older < newer);
    }

    #[test]
    fn test_same_second_flushes_get_distinct_names() {
        let dir = tempdir().unwrap();
        let first = write_segment(dir.path(), &abc_snapshot(), 7).unwrap();
        let second = write_segment(dir.path(), &abc_snapshot(), 7).unwrap();
        assert_ne!(first, second);
        assert!(first.exists());
        assert!(second.exists());
    }

    #[tokio::test]
    async fn test_catalog_load_orders_and_cleans_up() {
        let dir = tempdir().unwrap();
        write_segment(dir.path(), &Snapshot::from_entries(vec![series("x", &[1])]), 20).unwrap();
        write_segment(dir.path(), &Snapshot::from_entries(vec![series("x", &[0])]), 10).unwrap();
        std::fs::write(dir.path().join("30-31.sst.tmp"), b"partial").unwrap();

        let catalog = SegmentCatalog::load(dir.path()).unwrap();
        let segments = catalog.list().await;
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].name().unwrap().log_start, 10);
        assert_eq!(segments[1].name().unwrap().log_start, 20);
        assert!(!dir.path().join("30-31.sst.tmp").exists());
    }

    #[tokio::test]
    async fn test_catalog_publish_and_flushed_points() {
        let dir = tempdir().unwrap();
        let catalog = SegmentCatalog::load(dir.path().join("sstable")).unwrap();
        assert!(catalog.is_empty().await);

        let segment = catalog.write(&abc_snapshot(), 42).unwrap();
        assert!(catalog.is_empty().await);

        catalog.publish(segment).await;
        let other = catalog
            .write(&Snapshot::from_entries(vec![series("q", &[1, 2])]), 43)
            .unwrap();
        catalog.publish(other).await;

        assert_eq!(catalog.len().await, 2);
        assert_eq!(catalog.points_flushed_from(42).await.unwrap(), 6);
        assert_eq!(catalog.points_flushed_from(43).await.unwrap(), 2);
        assert_eq!(catalog.points_flushed_from(44).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unopenable_segment_is_removed() {
        let dir = tempdir().unwrap();
        let catalog = SegmentCatalog::load(dir.path()).unwrap();

        let result = catalog.write_with(&abc_snapshot(), 42, |path| {
            Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("too many open files reopening {:?}", path),
            )))
        });
        assert!(result.is_err());

        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftovers.is_empty());
        assert!(SegmentCatalog::load(dir.path()).unwrap().is_empty().await);
    }

    #[test]
    fn test_lookup_reads_the_file_on_each_call() {
        let dir = tempdir().unwrap();
        let path = write_segment(dir.path(), &abc_snapshot(), 100).unwrap();
        let segment = Segment::open(&path).unwrap();

        // Nothing keeps the file open between lookups
        let moved = dir.path().join("moved");
        std::fs::rename(&path, &moved).unwrap();
        assert!(matches!(segment.lookup("a"), Err(StorageError::Io(_))));
        assert!(segment.lookup("zzz").unwrap().is_none());

        std::fs::rename(&moved, &path).unwrap();
        assert_eq!(segment.lookup("b").unwrap().unwrap().len(), 1);
    }
}
