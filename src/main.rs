use anyhow::Context;
use clap::Parser;
use ingram_sync::config::{expand_home, DEFAULT_CONFIG_PATH};
use ingram_sync::{run_sync, Collection, FtpConnector, RunOptions, RunSummary, SyncConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "ingram-sync")]
#[command(about = "Mirror Ingram data feeds from FTP and unpack them", long_about = None)]
#[command(version)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Maximum concurrent downloads (overrides the configuration)
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,

    /// Download every file again, even if history says it is current
    #[arg(long)]
    force: bool,

    /// Skip unpacking archives after download
    #[arg(long)]
    no_unpack: bool,

    /// Collections to sync (comma-separated: covers,catalog,backlist,reference)
    #[arg(long, value_delimiter = ',')]
    only: Vec<Collection>,

    /// Write the run summary as JSON to this path
    #[arg(long)]
    summary_json: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize tracing
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("ingram_sync={}", log_level))
        .init();

    match run(args).await {
        Ok(summary) if summary.is_success() => {
            info!("✅ Sync completed successfully!");
        }
        Ok(summary) => {
            error!("❌ {} file(s) failed to download", summary.failed());
            std::process::exit(1);
        }
        Err(e) => {
            error!("❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run(args: Args) -> anyhow::Result<RunSummary> {
    let mut config = SyncConfig::load(&expand_home(&args.config))
        .with_context(|| format!("Failed to load configuration {}", args.config.display()))?;
    if let Some(concurrency) = args.concurrency {
        config.max_concurrent_downloads = concurrency;
        config.validate()?;
    }

    info!("🚀 Ingram Sync");
    info!("Host: {}", config.host);
    info!("Download directory: {:?}", config.download_dir);
    info!("Working directory: {:?}", config.working_dir);
    info!("Concurrent downloads: {}", config.max_concurrent_downloads);

    let options = RunOptions {
        force: args.force,
        unpack: !args.no_unpack,
        collections: if args.only.is_empty() {
            Collection::ALL.to_vec()
        } else {
            args.only
        },
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling in-flight transfers ...");
                cancel.cancel();
            }
        });
    }

    let connector = Arc::new(FtpConnector::new(config.credentials()));
    let summary = run_sync(&config, connector, &options, &cancel)
        .await
        .context("Sync aborted")?;

    log_summary(&summary);
    if let Some(path) = &args.summary_json {
        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write summary to {}", path.display()))?;
        info!("Persisted summary to {}", path.display());
    }
    Ok(summary)
}

fn log_summary(summary: &RunSummary) {
    for batch in &summary.batches {
        info!(
            "{}: {} downloaded, {} skipped, {} failed",
            batch.collection,
            batch.downloaded,
            batch.skipped,
            batch.failures.len()
        );
        for failure in &batch.failures {
            warn!("  {} ({})", failure.remote_path, failure.reason);
        }
    }
    for failure in &summary.listing_failures {
        warn!("{}: listing failed: {}", failure.collection, failure.cause);
    }
    if summary.unpack_failures > 0 {
        warn!("{} archive(s) failed to unpack", summary.unpack_failures);
    }
    if summary.cancelled {
        warn!("Run was interrupted");
    }
    info!(
        "📊 Total: {} downloaded, {} skipped, {} failed, {} archive(s) extracted in {}",
        summary.downloaded(),
        summary.skipped(),
        summary.failed(),
        summary.extracted,
        humantime::format_duration(Duration::from_secs(summary.elapsed_secs.round() as u64))
    );
}
