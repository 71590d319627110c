//! Data structures for sync operations.

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;

/// Fixed logical groups of remote files, in the order they are synced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    /// Cover image archives for one image-size folder.
    Covers,
    /// ONIX catalog archives (Active, Extended, NotAvailable).
    Catalog,
    /// ONIX backlist archives.
    Backlist,
    /// Reference code tables.
    Reference,
}

impl Collection {
    /// Every collection, in batch order.
    pub const ALL: [Collection; 4] = [
        Collection::Covers,
        Collection::Catalog,
        Collection::Backlist,
        Collection::Reference,
    ];

    /// Returns the short name used on the command line and in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Covers => "covers",
            Collection::Catalog => "catalog",
            Collection::Backlist => "backlist",
            Collection::Reference => "reference",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "covers" => Ok(Collection::Covers),
            "catalog" | "onix" => Ok(Collection::Catalog),
            "backlist" | "onix_bklst" => Ok(Collection::Backlist),
            "reference" => Ok(Collection::Reference),
            other => Err(format!(
                "unknown collection '{}' (expected covers, catalog, backlist or reference)",
                other
            )),
        }
    }
}

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Absolute remote path (`/ONIX/Active/file.zip`).
    pub absolute_path: String,
    /// Base name of the entry.
    pub name: String,
    /// Whether the entry is a directory.
    pub is_directory: bool,
    /// Whether the entry is a regular file.
    pub is_file: bool,
}

/// Unit of work handed to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferJob {
    /// Absolute remote path of the file to fetch.
    pub remote_path: String,
    /// Local directory that mirrors the remote tree.
    pub local_download_root: PathBuf,
}

impl TransferJob {
    pub fn new(remote_path: impl Into<String>, local_download_root: impl Into<PathBuf>) -> Self {
        Self {
            remote_path: remote_path.into(),
            local_download_root: local_download_root.into(),
        }
    }

    /// Local destination: the download root, then the remote directory with
    /// its leading separator stripped, then the remote base name.
    pub fn local_path(&self) -> PathBuf {
        let (dir, name) = match self.remote_path.rsplit_once('/') {
            Some((dir, name)) => (dir, name),
            None => ("", self.remote_path.as_str()),
        };
        let mut path = self.local_download_root.clone();
        let dir = dir.trim_start_matches('/');
        if !dir.is_empty() {
            path.push(dir);
        }
        path.push(name);
        path
    }
}

/// Why a single job failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// Remote size or modification time could not be read.
    MetadataUnavailable(String),
    /// Streaming or writing the content failed; nothing was recorded.
    TransferError(String),
    /// The run was interrupted before the job reached a commit point.
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::MetadataUnavailable(detail) => {
                write!(f, "metadata unavailable: {}", detail)
            }
            FailureReason::TransferError(detail) => write!(f, "transfer error: {}", detail),
            FailureReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Result of processing one transfer job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// An identical transfer is already recorded.
    Skipped,
    /// The file was transferred and recorded.
    Downloaded,
    /// The job failed; see the reason.
    Failed(FailureReason),
}

impl TransferOutcome {
    /// Whether the local file is known to be complete after this outcome.
    pub fn is_complete(&self) -> bool {
        matches!(self, TransferOutcome::Skipped | TransferOutcome::Downloaded)
    }
}

/// One completed transfer, as stored in the history log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRecord {
    pub local_path: PathBuf,
    pub remote_size: u64,
    /// Opaque server timestamp, compared by exact string equality.
    pub remote_modified_at: String,
    /// When the record was written; absent on legacy lines.
    pub recorded_at: Option<SystemTime>,
}

impl DownloadRecord {
    /// Exact three-field match used for the skip decision.
    pub fn matches(&self, local_path: &Path, remote_size: u64, remote_modified_at: &str) -> bool {
        self.local_path == local_path
            && self.remote_size == remote_size
            && self.remote_modified_at == remote_modified_at
    }
}

/// A failed job in a batch report.
#[derive(Debug, Clone, Serialize)]
pub struct JobFailure {
    pub remote_path: String,
    pub reason: FailureReason,
}

/// Aggregated outcomes of one collection's batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub collection: Collection,
    pub skipped: usize,
    pub downloaded: usize,
    pub failures: Vec<JobFailure>,
}

impl BatchReport {
    /// Builds a report from jobs and their outcomes (same order).
    pub fn from_outcomes(
        collection: Collection,
        jobs: &[TransferJob],
        outcomes: &[TransferOutcome],
    ) -> Self {
        let mut report = BatchReport {
            collection,
            skipped: 0,
            downloaded: 0,
            failures: Vec::new(),
        };
        for (job, outcome) in jobs.iter().zip(outcomes) {
            match outcome {
                TransferOutcome::Skipped => report.skipped += 1,
                TransferOutcome::Downloaded => report.downloaded += 1,
                TransferOutcome::Failed(reason) => report.failures.push(JobFailure {
                    remote_path: job.remote_path.clone(),
                    reason: reason.clone(),
                }),
            }
        }
        report
    }
}

/// A collection that could not be enumerated.
#[derive(Debug, Clone, Serialize)]
pub struct ListingFailure {
    pub collection: Collection,
    pub cause: String,
}

/// Everything a run did, for logging and `--summary-json`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub batches: Vec<BatchReport>,
    pub listing_failures: Vec<ListingFailure>,
    pub extracted: usize,
    pub unpack_failures: usize,
    pub cancelled: bool,
    pub elapsed_secs: f64,
}

impl RunSummary {
    pub fn skipped(&self) -> usize {
        self.batches.iter().map(|b| b.skipped).sum()
    }

    pub fn downloaded(&self) -> usize {
        self.batches.iter().map(|b| b.downloaded).sum()
    }

    pub fn failed(&self) -> usize {
        self.batches.iter().map(|b| b.failures.len()).sum()
    }

    /// A run succeeds when no job in any batch failed.
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

/// Per-run switches that are not part of the persisted configuration.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Re-download even when history says the file is current.
    pub force: bool,
    /// Extract archives after each batch.
    pub unpack: bool,
    /// Collections to process; always run in [`Collection::ALL`] order.
    pub collections: Vec<Collection>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            force: false,
            unpack: true,
            collections: Collection::ALL.to_vec(),
        }
    }
}
