use chrono::Utc;
use clap::Parser;
use stale_sweep::config::{Settings, StorageBackend};
use stale_sweep::error::ConfigError;
use stale_sweep::prelude::*;
use stale_sweep::storage::{LocalStorage, RetryPolicy, S3Storage, Storage, StorageManager};
use stale_sweep::sweep::{ExecutorSettings, Sweeper};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Removes buckets whose newest object is older than the retention threshold.
#[derive(Debug, Parser)]
#[command(name = "stale_sweep", version)]
struct Cli {
    /// Directory holding default.toml and <RUN_MODE>.toml.
    #[arg(long, env = "SWEEP_CONFIG_DIR", default_value = "config")]
    config_dir: PathBuf,

    #[arg(long)]
    threshold_days: Option<u32>,

    #[arg(long)]
    concurrency: Option<usize>,

    /// Report what would be deleted without deleting anything.
    #[arg(long, conflicts_with = "execute")]
    dry_run: bool,

    /// Actually delete stale buckets.
    #[arg(long)]
    execute: bool,

    /// Sweep a local directory tree instead of S3.
    #[arg(long)]
    local_root: Option<PathBuf>,
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if let Some(days) = self.threshold_days {
            settings.sweep.threshold_days = days;
        }
        if let Some(concurrency) = self.concurrency {
            settings.sweep.concurrency = concurrency;
        }
        if self.dry_run {
            settings.sweep.dry_run = true;
        }
        if self.execute {
            settings.sweep.dry_run = false;
        }
        if let Some(root) = &self.local_root {
            settings.storage.backend = StorageBackend::Local;
            settings.storage.local_root = Some(root.clone());
        }
    }
}

async fn build_storage(settings: &Settings) -> Result<Arc<dyn Storage>> {
    let backend: Arc<dyn Storage> = match settings.storage.backend {
        StorageBackend::S3 => Arc::new(S3Storage::new(&settings.storage).await?),
        StorageBackend::Local => {
            let root = settings.storage.local_root.clone().ok_or_else(|| {
                ConfigError::InvalidValue("storage.local_root is required".into())
            })?;
            Arc::new(LocalStorage::new(root)?)
        }
    };
    Ok(Arc::new(StorageManager::new(
        backend,
        RetryPolicy::from(&settings.retry),
    )))
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::load(&cli.config_dir)?;
    cli.apply(&mut settings);
    settings.validate()?;

    info!(
        backend = ?settings.storage.backend,
        threshold_days = settings.sweep.threshold_days,
        dry_run = settings.sweep.dry_run,
        "Starting stale bucket sweep"
    );

    let storage = build_storage(&settings).await?;
    let sweeper = Sweeper::new(storage, ExecutorSettings::from(&settings));

    let interrupted = sweeper.interrupt_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing buckets already in progress");
            interrupted.store(true, Ordering::SeqCst);
        }
    });

    let summary = sweeper
        .run_sweep(
            Utc::now(),
            settings.sweep.threshold_days,
            settings.sweep.concurrency,
        )
        .await?;

    if summary.has_errors() {
        warn!("Sweep finished with {} error(s)", summary.errors.len());
    }
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
