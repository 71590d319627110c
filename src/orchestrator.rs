//! Main orchestration logic: bounded-concurrency batches and the full sync run.

use crate::config::SyncConfig;
use crate::download::{fetch, FetchContext};
use crate::error::SyncError;
use crate::extract::{
    count_files_matching, extract_cover_zip, extract_zip, is_cover_extracted, ExtractStatus,
};
use crate::history::HistoryStore;
use crate::listing::list_collection;
use crate::remote::Connector;
use crate::types::{
    BatchReport, Collection, FailureReason, ListingFailure, RunOptions, RunSummary, TransferJob,
    TransferOutcome,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Subdirectory of the working directory that receives cover images.
const COVERS_DIR_NAME: &str = "covers";

/// Runs `jobs` on a pool of `max_workers` workers and returns one outcome
/// per job, in input order.
///
/// Each worker claims the next unclaimed job and runs [`fetch`] on the
/// blocking pool, so every in-flight transfer owns its own connection. A
/// failed job does not stop the batch. Once `cancel` fires no new job is
/// claimed; unclaimed jobs report [`FailureReason::Cancelled`].
///
/// # Errors
///
/// Returns [`SyncError::StoreUnavailable`] (after letting in-flight jobs
/// finish) if the history store fails, and [`SyncError::Worker`] if a
/// worker task panics.
pub async fn run_batch(
    jobs: Vec<TransferJob>,
    max_workers: usize,
    ctx: FetchContext,
    cancel: &CancellationToken,
    pb: &indicatif::ProgressBar,
) -> Result<Vec<TransferOutcome>, SyncError> {
    if max_workers == 0 {
        return Err(SyncError::Config(
            "max_workers must be greater than zero".to_string(),
        ));
    }

    let total = jobs.len();
    let jobs: Arc<[TransferJob]> = jobs.into();
    let next = Arc::new(AtomicUsize::new(0));
    // Stops the other workers when one hits a fatal error.
    let batch_cancel = cancel.child_token();

    let mut workers = Vec::with_capacity(max_workers.min(total));
    for _ in 0..max_workers.min(total) {
        let jobs = Arc::clone(&jobs);
        let next = Arc::clone(&next);
        let ctx = ctx.clone();
        let batch_cancel = batch_cancel.clone();
        let pb = pb.clone();

        workers.push(tokio::spawn(async move {
            let mut finished = Vec::new();
            loop {
                if batch_cancel.is_cancelled() {
                    break;
                }
                let index = next.fetch_add(1, Ordering::SeqCst);
                let Some(job) = jobs.get(index).cloned() else {
                    break;
                };

                pb.set_message(format!("| ⬇️  {}", job.remote_path));
                let ctx = ctx.clone();
                let job_cancel = batch_cancel.clone();
                let result = tokio::task::spawn_blocking(move || fetch(&ctx, &job, &job_cancel))
                    .await
                    .map_err(|e| SyncError::Worker(format!("Task join error: {}", e)))?;

                match result {
                    Ok(outcome) => {
                        pb.inc(1);
                        finished.push((index, outcome));
                    }
                    Err(e) => {
                        batch_cancel.cancel();
                        return Err(e);
                    }
                }
            }
            Ok::<_, SyncError>(finished)
        }));
    }

    let mut outcomes: Vec<Option<TransferOutcome>> = vec![None; total];
    let mut fatal = None;
    for result in futures_util::future::join_all(workers).await {
        match result {
            Ok(Ok(finished)) => {
                for (index, outcome) in finished {
                    outcomes[index] = Some(outcome);
                }
            }
            Ok(Err(e)) => {
                error!("Batch aborted: {}", e);
                fatal.get_or_insert(e);
            }
            Err(e) => {
                error!("Task join error: {}", e);
                fatal.get_or_insert(SyncError::Worker(format!("Task failed: {}", e)));
            }
        }
    }
    if let Some(e) = fatal {
        return Err(e);
    }

    Ok(outcomes
        .into_iter()
        .map(|outcome| outcome.unwrap_or(TransferOutcome::Failed(FailureReason::Cancelled)))
        .collect())
}

/// Mirrors every selected collection and unpacks the results.
///
/// Collections run as sequential batches in [`Collection::ALL`] order. A
/// collection whose listing fails is recorded in the summary and skipped.
///
/// # Errors
///
/// Fails before dispatching any job if the history store is not writable,
/// and aborts on any later history failure.
///
/// # Example
///
/// ```no_run
/// use ingram_sync::{run_sync, FtpConnector, RunOptions, SyncConfig};
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = SyncConfig::load("config.json".as_ref())?;
/// let connector = Arc::new(FtpConnector::new(config.credentials()));
/// let summary = run_sync(&config, connector, &RunOptions::default(), &CancellationToken::new()).await?;
/// println!("{} downloaded", summary.downloaded());
/// # Ok(())
/// # }
/// ```
pub async fn run_sync(
    config: &SyncConfig,
    connector: Arc<dyn Connector>,
    options: &RunOptions,
    cancel: &CancellationToken,
) -> Result<RunSummary, SyncError> {
    let started = Instant::now();
    let history = Arc::new(HistoryStore::open(&config.log_dir)?);
    info!("Download history: {}", history.path().display());

    let ctx = FetchContext {
        connector: Arc::clone(&connector),
        history,
        force: options.force,
    };
    let mut summary = RunSummary::default();

    for collection in Collection::ALL {
        if !options.collections.contains(&collection) {
            continue;
        }
        if cancel.is_cancelled() {
            warn!("Interrupted, not starting {} batch", collection);
            break;
        }

        let listing = {
            let connector = Arc::clone(&connector);
            let cover_folder = config.cover_folder.clone();
            tokio::task::spawn_blocking(move || {
                list_collection(connector.as_ref(), collection, &cover_folder)
            })
            .await
            .map_err(|e| SyncError::Worker(format!("Task join error: {}", e)))?
        };
        let remote_paths = match listing {
            Ok(paths) => paths,
            Err(e) => {
                error!("{}", e);
                summary.listing_failures.push(ListingFailure {
                    collection,
                    cause: e.to_string(),
                });
                continue;
            }
        };

        let jobs: Vec<TransferJob> = remote_paths
            .into_iter()
            .map(|path| TransferJob::new(path, &config.download_dir))
            .collect();

        info!(
            "📦 Processing {} {} file(s) with {} worker(s)",
            jobs.len(),
            collection,
            config.max_concurrent_downloads
        );
        let pb = batch_progress_bar(jobs.len() as u64, collection);
        let outcomes = run_batch(
            jobs.clone(),
            config.max_concurrent_downloads,
            ctx.clone(),
            cancel,
            &pb,
        )
        .await?;

        let report = BatchReport::from_outcomes(collection, &jobs, &outcomes);
        pb.finish_with_message(format!(
            "| ✅ {}: {} downloaded, {} skipped, {} failed",
            collection,
            report.downloaded,
            report.skipped,
            report.failures.len()
        ));
        for failure in &report.failures {
            warn!("❌ {}: {}", failure.remote_path, failure.reason);
        }
        summary.batches.push(report);

        if options.unpack && !cancel.is_cancelled() {
            let archives = archives_to_unpack(collection, &jobs, &outcomes, &config.working_dir);
            let (extracted, failed) =
                unpack_batch(collection, archives, &config.download_dir, &config.working_dir)
                    .await?;
            summary.extracted += extracted;
            summary.unpack_failures += failed;
        }
    }

    summary.cancelled = cancel.is_cancelled();
    summary.elapsed_secs = started.elapsed().as_secs_f64();
    Ok(summary)
}

/// Archives whose content should be unpacked after a batch.
///
/// Covers are unpacked when freshly downloaded, or when skipped but never
/// fully extracted (an earlier run without unpacking, interrupted or failed).
/// Catalog archives are unpacked whenever they are complete, relying on the
/// skip-if-extracted check.
fn archives_to_unpack(
    collection: Collection,
    jobs: &[TransferJob],
    outcomes: &[TransferOutcome],
    working_dir: &Path,
) -> Vec<PathBuf> {
    let covers_dir = working_dir.join(COVERS_DIR_NAME);
    jobs.iter()
        .zip(outcomes)
        .filter_map(|(job, outcome)| {
            let archive = job.local_path();
            let wanted = match (collection, outcome) {
                (Collection::Covers, TransferOutcome::Downloaded) => true,
                (Collection::Covers, TransferOutcome::Skipped) => {
                    !is_cover_extracted(&archive, &covers_dir)
                }
                (Collection::Catalog | Collection::Backlist, outcome) => outcome.is_complete(),
                _ => false,
            };
            wanted.then_some(archive)
        })
        .collect()
}

/// Extraction target for a catalog archive:
/// `working_dir/<archive dir relative to download_dir>/<archive stem>`.
pub fn catalog_target_dir(archive: &Path, download_dir: &Path, working_dir: &Path) -> PathBuf {
    let relative_dir = archive
        .parent()
        .and_then(|dir| dir.strip_prefix(download_dir).ok())
        .unwrap_or_else(|| Path::new(""));
    let stem = archive.file_stem().unwrap_or_default();
    working_dir.join(relative_dir).join(stem)
}

/// Unpacks one batch's archives sequentially; returns (extracted, failed).
async fn unpack_batch(
    collection: Collection,
    archives: Vec<PathBuf>,
    download_dir: &Path,
    working_dir: &Path,
) -> Result<(usize, usize), SyncError> {
    if archives.is_empty() && collection != Collection::Covers {
        return Ok((0, 0));
    }
    let download_dir = download_dir.to_path_buf();
    let working_dir = working_dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let mut extracted = 0;
        let mut failed = 0;
        let covers_dir = working_dir.join(COVERS_DIR_NAME);

        for archive in &archives {
            let result = match collection {
                Collection::Covers => extract_cover_zip(archive, &covers_dir),
                _ => extract_zip(
                    archive,
                    &catalog_target_dir(archive, &download_dir, &working_dir),
                ),
            };
            match result {
                Ok(ExtractStatus::Extracted(count)) => {
                    info!("📂 Extracted {} file(s) from {}", count, archive.display());
                    extracted += 1;
                }
                Ok(ExtractStatus::AlreadyExtracted) => {}
                Err(e) => {
                    error!("{}", e);
                    failed += 1;
                }
            }
        }

        if collection == Collection::Covers {
            info!(
                "Number of covers: {}",
                count_files_matching(&covers_dir, "jpg")
            );
        }
        (extracted, failed)
    })
    .await
    .map_err(|e| SyncError::Worker(format!("Task join error: {}", e)))
}

/// Progress bar for one batch; hidden when stderr is not a terminal.
fn batch_progress_bar(len: u64, collection: Collection) -> indicatif::ProgressBar {
    if !atty::is(atty::Stream::Stderr) {
        return indicatif::ProgressBar::hidden();
    }
    let pb = indicatif::ProgressBar::new(len);
    if let Ok(style) = indicatif::ProgressStyle::default_bar().template(
        "{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg} | {elapsed_precise} elapsed, ETA {eta_precise}",
    ) {
        pb.set_style(style.progress_chars("█▓▒░ "));
    }
    pb.set_message(format!("| 📦 {}", collection));
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryRemote;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    const MODIFIED: &str = "20240105083000";

    fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::FileOptions::default()
                .compression_method(zip::CompressionMethod::Stored);
            for (name, content) in files {
                writer.start_file(*name, options).unwrap();
                writer.write_all(content).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    fn test_config(dir: &TempDir, workers: usize) -> SyncConfig {
        SyncConfig {
            host: "memory".to_string(),
            download_dir: dir.path().join("downloads"),
            working_dir: dir.path().join("working"),
            log_dir: dir.path().join("logs"),
            max_concurrent_downloads: workers,
            ..Default::default()
        }
    }

    fn populated_remote() -> MemoryRemote {
        let remote = MemoryRemote::new();
        remote.add_file(
            "/Imageswk/J400w/covers_001.zip",
            &zip_bytes(&[("9780306406157.jpg", b"jpeg"), ("9781861972712.jpg", b"jpeg")]),
            MODIFIED,
        );
        remote.add_file(
            "/ONIX/Active/active_001.zip",
            &zip_bytes(&[("active_001.xml", b"<ONIXMessage/>")]),
            MODIFIED,
        );
        remote.add_file(
            "/ONIX/Extended/extended_001.zip",
            &zip_bytes(&[("extended_001.xml", b"<ONIXMessage/>")]),
            MODIFIED,
        );
        remote.add_dir("/ONIX/NotAvailable");
        remote.add_file(
            "/ONIX_BKLST/bklst_001.zip",
            &zip_bytes(&[("bklst_001.xml", b"<ONIXMessage/>")]),
            MODIFIED,
        );
        remote.add_file("/Reference_Files/lang.txt", b"eng|English", MODIFIED);
        remote.add_file("/Reference_Files/prodtp.txt", b"BK|Book", MODIFIED);
        remote
    }

    fn hidden() -> indicatif::ProgressBar {
        indicatif::ProgressBar::hidden()
    }

    #[tokio::test]
    async fn test_batch_skips_recorded_and_downloads_new() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("downloads");
        let remote = MemoryRemote::new().with_transfer_delay(Duration::from_millis(20));
        let history = Arc::new(HistoryStore::new(&dir.path().join("logs")));

        let mut jobs = Vec::new();
        for n in 0..10 {
            let path = format!("/ONIX/Active/active_{:03}.zip", n);
            let content = format!("payload {}", n);
            remote.add_file(&path, content.as_bytes(), MODIFIED);
            let job = TransferJob::new(path, &root);
            if n < 3 {
                history
                    .record_download(&job.local_path(), content.len() as u64, MODIFIED)
                    .unwrap();
            }
            jobs.push(job);
        }

        let ctx = FetchContext {
            connector: remote.connector(),
            history: Arc::clone(&history),
            force: false,
        };
        let outcomes = run_batch(jobs, 4, ctx, &CancellationToken::new(), &hidden())
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 10);
        let skipped = outcomes
            .iter()
            .filter(|o| **o == TransferOutcome::Skipped)
            .count();
        let downloaded = outcomes
            .iter()
            .filter(|o| **o == TransferOutcome::Downloaded)
            .count();
        assert_eq!(skipped, 3);
        assert_eq!(downloaded, 7);
        assert!(outcomes[..3].iter().all(|o| *o == TransferOutcome::Skipped));
        assert_eq!(history.records().unwrap().len(), 10);
        assert!(remote.peak_active() <= 4);
        assert_eq!(remote.connections(), 10);
    }

    #[tokio::test]
    async fn test_failed_job_does_not_abort_batch() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("downloads");
        let remote = MemoryRemote::new();
        remote.add_file("/ONIX_BKLST/a.zip", b"aaaa", MODIFIED);
        remote.add_file("/ONIX_BKLST/b.zip", b"bbbb", MODIFIED);
        remote.add_file("/ONIX_BKLST/c.zip", b"cccc", MODIFIED);
        remote.truncate_transfer("/ONIX_BKLST/b.zip", 2);

        let jobs = vec![
            TransferJob::new("/ONIX_BKLST/a.zip", &root),
            TransferJob::new("/ONIX_BKLST/b.zip", &root),
            TransferJob::new("/ONIX_BKLST/c.zip", &root),
        ];
        let ctx = FetchContext {
            connector: remote.connector(),
            history: Arc::new(HistoryStore::new(&dir.path().join("logs"))),
            force: false,
        };
        let outcomes = run_batch(jobs, 2, ctx, &CancellationToken::new(), &hidden())
            .await
            .unwrap();

        assert_eq!(outcomes[0], TransferOutcome::Downloaded);
        assert!(matches!(
            outcomes[1],
            TransferOutcome::Failed(FailureReason::TransferError(_))
        ));
        assert_eq!(outcomes[2], TransferOutcome::Downloaded);
    }

    #[tokio::test]
    async fn test_cancelled_batch_dispatches_nothing() {
        let dir = tempdir().unwrap();
        let remote = MemoryRemote::new();
        remote.add_file("/ONIX_BKLST/a.zip", b"aaaa", MODIFIED);
        let history = Arc::new(HistoryStore::new(&dir.path().join("logs")));
        let ctx = FetchContext {
            connector: remote.connector(),
            history: Arc::clone(&history),
            force: false,
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let jobs = vec![TransferJob::new("/ONIX_BKLST/a.zip", dir.path())];
        let outcomes = run_batch(jobs, 2, ctx, &cancel, &hidden()).await.unwrap();

        assert_eq!(outcomes, vec![TransferOutcome::Failed(FailureReason::Cancelled)]);
        assert_eq!(remote.connections(), 0);
        assert!(history.records().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_mid_batch_keeps_history_consistent() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("downloads");
        let remote = MemoryRemote::new().with_transfer_delay(Duration::from_millis(50));
        let history = Arc::new(HistoryStore::new(&dir.path().join("logs")));

        let jobs: Vec<TransferJob> = (0..20)
            .map(|n| {
                let path = format!("/ONIX/Extended/extended_{:03}.zip", n);
                remote.add_file(&path, format!("payload {}", n).as_bytes(), MODIFIED);
                TransferJob::new(path, &root)
            })
            .collect();
        let ctx = FetchContext {
            connector: remote.connector(),
            history: Arc::clone(&history),
            force: false,
        };

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(130)).await;
            trigger.cancel();
        });
        let outcomes = run_batch(jobs.clone(), 2, ctx, &cancel, &hidden())
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 20);
        let downloaded = outcomes
            .iter()
            .filter(|o| **o == TransferOutcome::Downloaded)
            .count();
        let cancelled = outcomes
            .iter()
            .filter(|o| **o == TransferOutcome::Failed(FailureReason::Cancelled))
            .count();
        assert_eq!(downloaded + cancelled, 20);
        assert!(cancelled > 0);
        assert!(remote.connections() < 20);

        // Every record is a committed file, and nothing half-written remains.
        assert_eq!(history.records().unwrap().len(), downloaded);
        assert_eq!(count_files_matching(&root, "part"), 0);
        for (job, outcome) in jobs.iter().zip(&outcomes) {
            assert_eq!(
                job.local_path().is_file(),
                *outcome == TransferOutcome::Downloaded,
                "{}",
                job.remote_path
            );
        }
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let dir = tempdir().unwrap();
        let ctx = FetchContext {
            connector: MemoryRemote::new().connector(),
            history: Arc::new(HistoryStore::new(dir.path())),
            force: false,
        };
        let outcomes = run_batch(Vec::new(), 4, ctx, &CancellationToken::new(), &hidden())
            .await
            .unwrap();
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_zero_workers_rejected() {
        let dir = tempdir().unwrap();
        let ctx = FetchContext {
            connector: MemoryRemote::new().connector(),
            history: Arc::new(HistoryStore::new(dir.path())),
            force: false,
        };
        let jobs = vec![TransferJob::new("/a.zip", dir.path())];
        let result = run_batch(jobs, 0, ctx, &CancellationToken::new(), &hidden()).await;
        assert!(matches!(result, Err(SyncError::Config(_))));
    }

    #[tokio::test]
    async fn test_store_failure_aborts_batch() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, b"file").unwrap();
        let remote = MemoryRemote::new();
        remote.add_file("/ONIX_BKLST/a.zip", b"aaaa", MODIFIED);
        let ctx = FetchContext {
            connector: remote.connector(),
            history: Arc::new(HistoryStore::new(&blocker)),
            force: false,
        };
        let jobs = vec![TransferJob::new("/ONIX_BKLST/a.zip", dir.path())];
        let result = run_batch(jobs, 1, ctx, &CancellationToken::new(), &hidden()).await;
        assert!(matches!(result, Err(SyncError::StoreUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_full_sync_is_idempotent() {
        let dir = tempdir().unwrap();
        let config = test_config(&dir, 3);
        let remote = populated_remote();
        let options = RunOptions::default();

        let first = run_sync(&config, remote.connector(), &options, &CancellationToken::new())
            .await
            .unwrap();
        assert!(first.is_success());
        assert_eq!(first.downloaded(), 6);
        assert_eq!(first.skipped(), 0);
        assert!(first.listing_failures.is_empty());
        assert_eq!(
            first.batches.iter().map(|b| b.collection).collect::<Vec<_>>(),
            Collection::ALL.to_vec()
        );

        let working = &config.working_dir;
        assert!(working.join("covers/6157/9780306406157.jpg").is_file());
        assert!(working.join("covers/2712/9781861972712.jpg").is_file());
        assert!(working
            .join("ONIX/Active/active_001/active_001.xml")
            .is_file());
        assert!(working.join("ONIX_BKLST/bklst_001/bklst_001.xml").is_file());
        assert!(config
            .download_dir
            .join("Reference_Files/lang.txt")
            .is_file());

        let second = run_sync(&config, remote.connector(), &options, &CancellationToken::new())
            .await
            .unwrap();
        assert!(second.is_success());
        assert_eq!(second.downloaded(), 0);
        assert_eq!(second.skipped(), 6);
        assert_eq!(second.extracted, 0);
    }

    #[tokio::test]
    async fn test_covers_extracted_after_run_without_unpacking() {
        let dir = tempdir().unwrap();
        let config = test_config(&dir, 2);
        let remote = populated_remote();
        let no_unpack = RunOptions {
            unpack: false,
            ..Default::default()
        };

        let first = run_sync(&config, remote.connector(), &no_unpack, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(first.downloaded(), 6);
        assert!(!config.working_dir.exists());

        let second = run_sync(
            &config,
            remote.connector(),
            &RunOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(second.downloaded(), 0);
        assert_eq!(second.extracted, 4);
        let working = &config.working_dir;
        assert!(working.join("covers/6157/9780306406157.jpg").is_file());
        assert!(working
            .join("ONIX/Active/active_001/active_001.xml")
            .is_file());

        let third = run_sync(
            &config,
            remote.connector(),
            &RunOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(third.extracted, 0);
    }

    #[test]
    fn test_archives_to_unpack_selects_unextracted_covers() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("downloads");
        let working = dir.path().join("working");
        let covers_dir = working.join(COVERS_DIR_NAME);
        std::fs::create_dir_all(root.join("Imageswk/J400w")).unwrap();

        let jobs: Vec<TransferJob> = ["done", "pending", "fresh", "broken"]
            .iter()
            .map(|name| TransferJob::new(format!("/Imageswk/J400w/{}.zip", name), &root))
            .collect();
        for job in &jobs[..3] {
            std::fs::write(
                job.local_path(),
                zip_bytes(&[("9780306406157.jpg", b"jpeg")]),
            )
            .unwrap();
        }
        extract_cover_zip(&jobs[0].local_path(), &covers_dir).unwrap();
        extract_cover_zip(&jobs[2].local_path(), &covers_dir).unwrap();

        let outcomes = vec![
            TransferOutcome::Skipped,
            TransferOutcome::Skipped,
            TransferOutcome::Downloaded,
            TransferOutcome::Failed(FailureReason::TransferError("reset".to_string())),
        ];
        let archives = archives_to_unpack(Collection::Covers, &jobs, &outcomes, &working);
        assert_eq!(archives, vec![jobs[1].local_path(), jobs[2].local_path()]);

        assert!(archives_to_unpack(Collection::Reference, &jobs, &outcomes, &working).is_empty());
    }

    #[tokio::test]
    async fn test_listing_failure_skips_only_that_collection() {
        let dir = tempdir().unwrap();
        let config = test_config(&dir, 2);
        let remote = MemoryRemote::new();
        remote.add_file("/ONIX_BKLST/bklst_001.zip", b"not really a zip", MODIFIED);
        remote.add_file("/Reference_Files/lang.txt", b"eng|English", MODIFIED);
        let options = RunOptions {
            unpack: false,
            ..Default::default()
        };

        let summary = run_sync(&config, remote.connector(), &options, &CancellationToken::new())
            .await
            .unwrap();

        let failed: Vec<Collection> = summary
            .listing_failures
            .iter()
            .map(|f| f.collection)
            .collect();
        assert_eq!(failed, vec![Collection::Covers, Collection::Catalog]);
        assert_eq!(summary.downloaded(), 2);
        assert!(summary.is_success());
    }

    #[tokio::test]
    async fn test_unwritable_log_dir_fails_before_dispatch() {
        let dir = tempdir().unwrap();
        let mut config = test_config(&dir, 2);
        config.log_dir = dir.path().join("blocked");
        std::fs::write(&config.log_dir, b"file").unwrap();
        let remote = populated_remote();

        let result = run_sync(
            &config,
            remote.connector(),
            &RunOptions::default(),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(SyncError::StoreUnavailable { .. })));
        assert_eq!(remote.connections(), 0);
    }

    #[tokio::test]
    async fn test_selected_collections_only() {
        let dir = tempdir().unwrap();
        let config = test_config(&dir, 2);
        let remote = populated_remote();
        let options = RunOptions {
            force: false,
            unpack: false,
            collections: vec![Collection::Reference, Collection::Backlist],
        };

        let summary = run_sync(&config, remote.connector(), &options, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            summary.batches.iter().map(|b| b.collection).collect::<Vec<_>>(),
            vec![Collection::Backlist, Collection::Reference]
        );
        assert!(!config.working_dir.exists());
    }

    #[test]
    fn test_catalog_target_dir() {
        let target = catalog_target_dir(
            Path::new("/data/downloads/ONIX/Active/active_001.zip"),
            Path::new("/data/downloads"),
            Path::new("/data/working"),
        );
        assert_eq!(target, PathBuf::from("/data/working/ONIX/Active/active_001"));
    }
}
