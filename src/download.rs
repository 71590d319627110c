//! Per-file fetch decision and transfer.

use crate::error::{RemoteError, SyncError};
use crate::history::HistoryStore;
use crate::remote::{Connector, RemoteSession};
use crate::types::{FailureReason, TransferJob, TransferOutcome};
use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Suffix of the file a transfer streams into before it is moved into place.
const PARTIAL_SUFFIX: &str = ".part";

/// Shared, read-only state every fetch needs.
#[derive(Clone)]
pub struct FetchContext {
    pub connector: Arc<dyn Connector>,
    pub history: Arc<HistoryStore>,
    /// Re-download even when history has a matching record.
    pub force: bool,
}

/// Decides whether `job` needs a transfer and performs it.
///
/// Opens its own session, since a session cannot interleave transfers.
/// Job-level problems come back as [`TransferOutcome::Failed`]; only an
/// unusable history store is returned as an error.
pub fn fetch(
    ctx: &FetchContext,
    job: &TransferJob,
    cancel: &CancellationToken,
) -> Result<TransferOutcome, SyncError> {
    if cancel.is_cancelled() {
        return Ok(TransferOutcome::Failed(FailureReason::Cancelled));
    }

    let local_path = job.local_path();
    let remote_path = job.remote_path.as_str();

    let mut session = match ctx.connector.connect() {
        Ok(session) => session,
        Err(e) => {
            warn!("Failed to connect for {}: {}", remote_path, e);
            return Ok(TransferOutcome::Failed(
                FailureReason::MetadataUnavailable(format!("connect: {}", e)),
            ));
        }
    };

    let (remote_size, remote_modified_at) = match remote_metadata(session.as_mut(), remote_path)
    {
        Ok(metadata) => metadata,
        Err(e) => {
            warn!("Metadata unavailable for {}: {}", remote_path, e);
            return Ok(TransferOutcome::Failed(
                FailureReason::MetadataUnavailable(e.to_string()),
            ));
        }
    };

    if !ctx.force
        && ctx
            .history
            .is_already_downloaded(&local_path, remote_size, &remote_modified_at)?
    {
        debug!("Skipping {} (already downloaded)", remote_path);
        return Ok(TransferOutcome::Skipped);
    }

    info!(
        "Downloading \"{}\" => \"{}\" ...",
        remote_path,
        local_path.display()
    );
    match transfer(session.as_mut(), remote_path, &local_path, remote_size, cancel) {
        Ok(()) => {}
        Err(RemoteError::Cancelled) => {
            info!("Cancelled transfer of {}", remote_path);
            return Ok(TransferOutcome::Failed(FailureReason::Cancelled));
        }
        Err(e) => {
            warn!("Failed to download {}: {}", remote_path, e);
            return Ok(TransferOutcome::Failed(FailureReason::TransferError(
                e.to_string(),
            )));
        }
    }

    ctx.history
        .record_download(&local_path, remote_size, &remote_modified_at)?;
    Ok(TransferOutcome::Downloaded)
}

fn remote_metadata(
    session: &mut dyn RemoteSession,
    remote_path: &str,
) -> Result<(u64, String), RemoteError> {
    let size = session.size(remote_path)?;
    let modified_at = session.modified_at(remote_path)?;
    Ok((size, modified_at))
}

/// Streams the remote file into a `.part` sibling and moves it over
/// `local_path` once it is durable and of the expected size.
///
/// The partial file is removed on any failure.
fn transfer(
    session: &mut dyn RemoteSession,
    remote_path: &str,
    local_path: &Path,
    expected_size: u64,
    cancel: &CancellationToken,
) -> Result<(), RemoteError> {
    if let Some(parent) = local_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let partial_path = partial_path(local_path);
    let result = stream_to_file(session, remote_path, &partial_path, expected_size, cancel)
        .and_then(|()| std::fs::rename(&partial_path, local_path).map_err(RemoteError::from));

    if result.is_err() {
        if let Err(e) = std::fs::remove_file(&partial_path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(
                    "Failed to remove partial file {}: {}",
                    partial_path.display(),
                    e
                );
            }
        }
    }
    result
}

fn stream_to_file(
    session: &mut dyn RemoteSession,
    remote_path: &str,
    partial_path: &Path,
    expected_size: u64,
    cancel: &CancellationToken,
) -> Result<(), RemoteError> {
    let mut file = BufWriter::new(File::create(partial_path)?);
    let written = session.retrieve(remote_path, &mut file, cancel)?;
    file.flush()?;
    file.get_ref().sync_all()?;

    if written != expected_size {
        return Err(RemoteError::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "File size mismatch for {}: expected {} bytes, got {} bytes",
                remote_path, expected_size, written
            ),
        )));
    }
    Ok(())
}

fn partial_path(local_path: &Path) -> PathBuf {
    let mut name = local_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(OsString::new);
    name.push(PARTIAL_SUFFIX);
    local_path.with_file_name(name)
}
