//! Ingram Sync - incremental mirror of Ingram data feeds over FTP
//!
//! This library mirrors a fixed set of remote collections (cover image
//! archives, ONIX catalog and backlist archives, reference tables) to local
//! storage and unpacks them into a working directory.
//!
//! # Features
//!
//! - **Incremental Runs**: Every completed transfer is appended to a history
//!   log; files whose path, size and modification time match a record are skipped
//! - **Bounded Concurrency**: A fixed pool of workers, each with its own FTP
//!   connection since one connection cannot interleave transfers
//! - **Safe Placement**: Content is streamed to a `.part` file, size-checked and
//!   renamed into place before it is recorded
//! - **Unpacking**: Catalog archives extract once per archive; covers are
//!   partitioned by the last four characters of their identifier
//!
//! # Example
//!
//! ```no_run
//! use ingram_sync::{run_sync, FtpConnector, RunOptions, SyncConfig};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SyncConfig::load("config.json".as_ref())?;
//! let connector = Arc::new(FtpConnector::new(config.credentials()));
//! let summary = run_sync(&config, connector, &RunOptions::default(), &CancellationToken::new()).await?;
//! assert!(summary.is_success());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod download;
pub mod error;
pub mod extract;
pub mod history;
pub mod listing;
pub mod orchestrator;
pub mod remote;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{RemoteCredentials, SyncConfig};
pub use download::{fetch, FetchContext};
pub use error::{RemoteError, SyncError};
pub use history::HistoryStore;
pub use listing::list_collection;
pub use orchestrator::{run_batch, run_sync};
pub use remote::{Connector, FtpConnector, RemoteSession};
pub use types::{
    BatchReport, Collection, DownloadRecord, FailureReason, RemoteEntry, RunOptions, RunSummary,
    TransferJob, TransferOutcome,
};
