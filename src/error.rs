//! Error types for sync operations.

use crate::types::Collection;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while talking to the remote file service.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// FTP protocol or connection error.
    #[error(transparent)]
    Ftp(#[from] suppaftp::FtpError),

    /// I/O error while streaming remote content into a local sink.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// A directory listing line could not be understood.
    #[error("Malformed listing line: {0}")]
    MalformedListing(String),

    /// The remote path does not exist.
    #[error("Remote path not found: {0}")]
    NotFound(String),

    /// The transfer was interrupted by a cancellation request.
    #[error("Transfer cancelled")]
    Cancelled,
}

/// Errors that can occur during a sync run.
#[derive(Error, Debug)]
pub enum SyncError {
    /// I/O error during file operations.
    #[error(transparent)]
    IoError(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),

    /// The download history log cannot be read or written.
    ///
    /// Fatal to the run: without history the skip decision is unsafe.
    #[error("History store unavailable at {}: {source}", .path.display())]
    StoreUnavailable {
        /// Log file or directory that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Enumerating one collection failed; other collections are unaffected.
    #[error("Listing failed for {collection}: {source}")]
    ListingFailed {
        /// Collection whose listing failed.
        collection: Collection,
        /// Underlying remote error.
        #[source]
        source: RemoteError,
    },

    /// Invalid or missing configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Archive could not be unpacked.
    #[error("Failed to extract {}: {reason}", .archive.display())]
    Extract {
        /// Archive being unpacked.
        archive: PathBuf,
        /// Human readable cause.
        reason: String,
    },

    /// A worker task panicked or was aborted.
    #[error("Worker task failed: {0}")]
    Worker(String),
}
