//! Write-Ahead Log (WAL) for durability guarantees
//!
//! Every ingested point is persisted here before it becomes visible in the
//! in-memory table. On restart the active log is replayed to rebuild the
//! table.
//!
//! Files live in a single directory:
//! - `<start>.new.log`: the active log (zero or one exists)
//! - `<start>.closed.log`: logs rotated out after a successful flush
//!
//! `<start>` is the Unix time (seconds) the log was opened. Each line is one
//! JSON-encoded [`Point`].

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::Point;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

const ACTIVE_SUFFIX: &str = ".new.log";
const CLOSED_SUFFIX: &str = ".closed.log";

/// Append-only durability log
pub struct WriteAheadLog {
    /// Directory holding active and closed logs
    dir: PathBuf,
    /// Path of the active log
    path: PathBuf,
    /// Append handle for the active log
    file: File,
    /// Start time encoded in the active log's name
    start_time: i64,
    /// Length of the active log in bytes
    len: u64,
    /// Records appended or replayed since the log was opened
    record_count: u64,
    /// The active log was moved to its closed name by a rotation that could
    /// not finish. Nothing is appended until a rotation succeeds.
    detached: bool,
}

impl WriteAheadLog {
    /// Open the log directory, resuming the active log if one exists.
    ///
    /// Resuming is the crash-recovery path: the caller is expected to
    /// [`replay`](Self::replay) before appending.
    pub fn open(dir: impl AsRef<Path>) -> StorageResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| {
            StorageError::Init(format!("cannot create log directory {:?}: {}", dir, e))
        })?;

        let (active, latest_start) = Self::scan(&dir)?;

        if let Some(start_time) = active {
            let path = active_path(&dir, start_time);
            let file = OpenOptions::new()
                .append(true)
                .open(&path)
                .map_err(|e| StorageError::Init(format!("cannot open log {:?}: {}", path, e)))?;
            let len = file.metadata()?.len();

            tracing::info!(path = ?path, bytes = len, "Resuming active log");

            return Ok(Self {
                dir,
                path,
                file,
                start_time,
                len,
                record_count: 0,
                detached: false,
            });
        }

        let start_time = next_start_time(latest_start);
        let path = active_path(&dir, start_time);
        let file = create_log_file(&path)
            .map_err(|e| StorageError::Init(format!("cannot create log {:?}: {}", path, e)))?;

        tracing::info!(path = ?path, "Created new active log");

        Ok(Self {
            dir,
            path,
            file,
            start_time,
            len: 0,
            record_count: 0,
            detached: false,
        })
    }

    /// Find the active log's start time and the newest start time of any log
    fn scan(dir: &Path) -> StorageResult<(Option<i64>, Option<i64>)> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| StorageError::Init(format!("cannot read log directory {:?}: {}", dir, e)))?;

        let mut active = Vec::new();
        let mut latest: Option<i64> = None;

        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };

            let (stem, is_active) = if let Some(stem) = name.strip_suffix(ACTIVE_SUFFIX) {
                (stem, true)
            } else if let Some(stem) = name.strip_suffix(CLOSED_SUFFIX) {
                (stem, false)
            } else {
                continue;
            };

            let start: i64 = stem.parse().map_err(|_| {
                StorageError::Init(format!("log file {:?} has no valid start time", name))
            })?;

            latest = Some(latest.map_or(start, |l| l.max(start)));
            if is_active {
                active.push(start);
            }
        }

        if active.len() > 1 {
            active.sort_unstable();
            return Err(StorageError::Init(format!(
                "found {} active logs in {:?} (start times {:?}), expected at most one",
                active.len(),
                dir,
                active
            )));
        }

        Ok((active.pop(), latest))
    }

    /// Append a point and force it to stable storage.
    ///
    /// On failure the log is truncated back to its previous length so it
    /// never holds a record the caller considers un-ingested. If an earlier
    /// rotation left no active log, it is finished first.
    pub fn append(&mut self, point: &Point) -> StorageResult<()> {
        if self.detached {
            tracing::warn!(path = ?self.path, "Finishing interrupted rotation before append");
            self.rotate()?;
        }

        if let Some((name, value)) = point.fields.iter().find(|(_, v)| !v.is_finite()) {
            return Err(StorageError::Serialization(format!(
                "field {:?} is not a finite number: {}",
                name, value
            )));
        }

        let mut line = serde_json::to_vec(point)?;
        line.push(b'\n');

        if let Err(e) = self.write_synced(&line) {
            self.rollback();
            return Err(e.into());
        }

        self.len += line.len() as u64;
        self.record_count += 1;
        Ok(())
    }

    fn write_synced(&mut self, line: &[u8]) -> std::io::Result<()> {
        self.file.write_all(line)?;
        self.file.sync_all()
    }

    fn rollback(&mut self) {
        if let Err(e) = self.file.set_len(self.len) {
            tracing::error!(path = ?self.path, "Failed to truncate log after failed append: {}", e);
        }
    }

    /// Read every record of the active log, in append order.
    ///
    /// A final line without a trailing newline is a write torn by a crash:
    /// it is dropped and the file truncated if it does not decode. Any other
    /// undecodable record is [`StorageError::CorruptLog`].
    pub fn replay(&mut self) -> StorageResult<Vec<Point>> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        let mut points = Vec::new();
        let mut buf = Vec::new();
        let mut offset = 0u64;
        let mut line = 0usize;

        loop {
            buf.clear();
            let n = reader.read_until(b'\n', &mut buf)?;
            if n == 0 {
                break;
            }
            line += 1;

            let terminated = buf.last() == Some(&b'\n');
            let record = if terminated { &buf[..n - 1] } else { &buf[..] };

            if record.iter().all(u8::is_ascii_whitespace) {
                offset += n as u64;
                continue;
            }

            match serde_json::from_slice::<Point>(record) {
                Ok(point) => {
                    points.push(point);
                    if !terminated {
                        self.file.write_all(b"\n")?;
                        self.file.sync_all()?;
                        self.len = offset + n as u64 + 1;
                    }
                }
                Err(e) if !terminated => {
                    tracing::warn!(
                        path = ?self.path,
                        line,
                        "Dropping torn record at end of log: {}",
                        e
                    );
                    self.file.set_len(offset)?;
                    self.file.sync_all()?;
                    self.len = offset;
                    break;
                }
                Err(e) => {
                    return Err(StorageError::CorruptLog {
                        path: self.path.clone(),
                        line,
                        reason: e.to_string(),
                    });
                }
            }

            offset += n as u64;
        }

        self.record_count = points.len() as u64;
        Ok(points)
    }

    /// Close the active log and start a fresh one.
    ///
    /// Only call once the in-memory table holding this log's records has been
    /// durably flushed.
    pub fn rotate(&mut self) -> StorageResult<()> {
        let closed = closed_path(&self.dir, self.start_time);
        if !self.detached {
            std::fs::rename(&self.path, &closed)?;
        }

        let start_time = next_start_time(Some(self.start_time));
        let path = active_path(&self.dir, start_time);
        let file = match create_log_file(&path) {
            Ok(file) => file,
            Err(e) => {
                if !self.detached {
                    if let Err(restore) = std::fs::rename(&closed, &self.path) {
                        tracing::error!(
                            path = ?closed,
                            "Failed to restore active log after failed rotation: {}",
                            restore
                        );
                        self.detached = true;
                    }
                }
                return Err(e.into());
            }
        };

        if let Err(e) = sync_dir(&self.dir) {
            tracing::debug!(dir = ?self.dir, "Directory sync after rotation failed: {}", e);
        }

        tracing::info!(closed = ?closed, active = ?path, "Rotated log");

        self.file = file;
        self.path = path;
        self.start_time = start_time;
        self.len = 0;
        self.record_count = 0;
        self.detached = false;
        Ok(())
    }

    /// Start time encoded in the active log's name
    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    /// Path of the active log
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended or replayed since the active log was opened
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Size of the active log in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

fn active_path(dir: &Path, start_time: i64) -> PathBuf {
    dir.join(format!("{}{}", start_time, ACTIVE_SUFFIX))
}

fn closed_path(dir: &Path, start_time: i64) -> PathBuf {
    dir.join(format!("{}{}", start_time, CLOSED_SUFFIX))
}

/// Current time, kept strictly after any existing log's start
fn next_start_time(latest: Option<i64>) -> i64 {
    let now = Utc::now().timestamp();
    match latest {
        Some(latest) => now.max(latest + 1),
        None => now,
    }
}

fn create_log_file(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create_new(true).append(true).open(path)
}

/// Persist directory entries (renames, creations)
pub(crate) fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}
