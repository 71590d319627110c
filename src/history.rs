//! Append-only download history.
//!
//! Each completed transfer appends one line to `history.log`:
//!
//! ```text
//! <localPath> <remoteModifiedAt> <remoteSize> <recordedAt>
//! ```
//!
//! Lines written before `recordedAt` existed carry only the first three
//! fields and are still honoured. Fields are parsed from the right, so local
//! paths may contain spaces.

use crate::error::SyncError;
use crate::types::DownloadRecord;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;
use tracing::{debug, warn};

/// File name of the history log inside the log directory.
pub const HISTORY_FILE_NAME: &str = "history.log";

/// Durable record of completed downloads, queried by exact match.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    // Serializes appends from concurrent workers into whole lines.
    write_lock: Mutex<()>,
}

impl HistoryStore {
    /// Uses `log_dir/history.log` without touching the filesystem.
    pub fn new(log_dir: &Path) -> Self {
        Self {
            path: log_dir.join(HISTORY_FILE_NAME),
            write_lock: Mutex::new(()),
        }
    }

    /// Like [`HistoryStore::new`], but first proves the log is writable.
    ///
    /// Creates the directory and the (empty) log file if absent, and reports
    /// unreadable lines once here rather than on every query.
    pub fn open(log_dir: &Path) -> Result<Self, SyncError> {
        let store = Self::new(log_dir);
        std::fs::create_dir_all(log_dir).map_err(|source| SyncError::StoreUnavailable {
            path: log_dir.to_path_buf(),
            source,
        })?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&store.path)
            .map_err(|source| store.unavailable(source))?;

        let (_, skipped) = store.scan()?;
        if skipped > 0 {
            warn!(
                "Ignoring {} malformed line(s) in {}",
                skipped,
                store.path.display()
            );
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends a record for a fully written `local_path`.
    pub fn record_download(
        &self,
        local_path: &Path,
        remote_size: u64,
        remote_modified_at: &str,
    ) -> Result<(), SyncError> {
        let mut line = format_line(local_path, remote_size, remote_modified_at, SystemTime::now());

        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| self.unavailable(source))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| self.unavailable(source))?;
        // A torn previous append must not swallow this record.
        if !ends_with_newline(&mut file).map_err(|source| self.unavailable(source))? {
            line.insert(0, '\n');
        }
        // One write call per line; O_APPEND keeps it whole.
        file.write_all(line.as_bytes())
            .and_then(|_| file.sync_data())
            .map_err(|source| self.unavailable(source))?;

        debug!("Recorded {} in history", local_path.display());
        Ok(())
    }

    /// Whether a record with exactly these three fields exists.
    ///
    /// A missing log is an empty history, not an error.
    pub fn is_already_downloaded(
        &self,
        local_path: &Path,
        remote_size: u64,
        remote_modified_at: &str,
    ) -> Result<bool, SyncError> {
        Ok(self
            .records()?
            .iter()
            .any(|record| record.matches(local_path, remote_size, remote_modified_at)))
    }

    /// All parseable records, oldest first.
    ///
    /// Lines that are not valid UTF-8 or do not parse are skipped.
    pub fn records(&self) -> Result<Vec<DownloadRecord>, SyncError> {
        let (records, skipped) = self.scan()?;
        if skipped > 0 {
            debug!("Skipped {} malformed history line(s)", skipped);
        }
        Ok(records)
    }

    /// Parses the whole log; returns the records and the number of skipped lines.
    fn scan(&self) -> Result<(Vec<DownloadRecord>, usize), SyncError> {
        let content = match std::fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(source) => return Err(self.unavailable(source)),
        };

        let mut records = Vec::new();
        let mut skipped = 0;
        for raw in content.split(|byte| *byte == b'\n') {
            let Ok(line) = std::str::from_utf8(raw) else {
                skipped += 1;
                continue;
            };
            if line.trim().is_empty() {
                continue;
            }
            match parse_line(line) {
                Some(record) => records.push(record),
                None => skipped += 1,
            }
        }
        Ok((records, skipped))
    }

    fn unavailable(&self, source: io::Error) -> SyncError {
        SyncError::StoreUnavailable {
            path: self.path.clone(),
            source,
        }
    }
}

/// Whether `file` is empty or its last byte is a line break.
fn ends_with_newline(file: &mut File) -> io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn format_line(
    local_path: &Path,
    remote_size: u64,
    remote_modified_at: &str,
    recorded_at: SystemTime,
) -> String {
    format!(
        "{} {} {} {}\n",
        local_path.display(),
        remote_modified_at,
        remote_size,
        humantime::format_rfc3339_seconds(recorded_at)
    )
}

fn parse_line(line: &str) -> Option<DownloadRecord> {
    let line = line.trim_end();

    let (rest, recorded_at) = match line.rsplit_once(' ') {
        Some((rest, last)) => match humantime::parse_rfc3339(last) {
            Ok(at) => (rest, Some(at)),
            Err(_) => (line, None),
        },
        None => return None,
    };

    let mut fields = rest.rsplitn(3, ' ');
    let remote_size = fields.next()?.parse::<u64>().ok()?;
    let remote_modified_at = fields.next()?;
    let local_path = fields.next()?;
    if local_path.is_empty() || remote_modified_at.is_empty() {
        return None;
    }

    Some(DownloadRecord {
        local_path: PathBuf::from(local_path),
        remote_size,
        remote_modified_at: remote_modified_at.to_string(),
        recorded_at,
    })
}
