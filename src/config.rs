use crate::error::ConfigError;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// S3 refuses bulk deletes above this many keys.
pub const MAX_DELETE_BATCH: usize = 1000;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub sweep: SweepSettings,
    pub retry: RetrySettings,
    pub storage: StorageSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepSettings {
    pub threshold_days: u32,
    pub concurrency: usize,
    pub dry_run: bool,
    pub purge_attempts: u32,
    pub delete_batch_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub request_timeout_secs: u64,
}

impl RetrySettings {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    S3,
    Local,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
    pub local_root: Option<PathBuf>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load(Path::new("config"))
    }

    /// Layers built-in defaults, `<dir>/default.toml`, `<dir>/<RUN_MODE>.toml`
    /// and `SWEEP__*` environment variables, in that order.
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let env = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .set_default("sweep.threshold_days", 180_i64)?
            .set_default("sweep.concurrency", 1_i64)?
            .set_default("sweep.dry_run", true)?
            .set_default("sweep.purge_attempts", 3_i64)?
            .set_default("sweep.delete_batch_size", MAX_DELETE_BATCH as i64)?
            .set_default("retry.max_attempts", 3_i64)?
            .set_default("retry.initial_backoff_ms", 200_i64)?
            .set_default("retry.request_timeout_secs", 30_i64)?
            .set_default("storage.backend", "s3")?
            .set_default("storage.force_path_style", false)?
            .add_source(
                File::new(&config_dir.join("default").to_string_lossy(), FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                File::new(&config_dir.join(&env).to_string_lossy(), FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix("SWEEP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = s.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep.concurrency == 0 {
            return Err(ConfigError::InvalidValue(
                "sweep.concurrency must be at least 1".into(),
            ));
        }
        if self.sweep.purge_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "sweep.purge_attempts must be at least 1".into(),
            ));
        }
        if self.sweep.delete_batch_size == 0 || self.sweep.delete_batch_size > MAX_DELETE_BATCH {
            return Err(ConfigError::InvalidValue(format!(
                "sweep.delete_batch_size must be between 1 and {}",
                MAX_DELETE_BATCH
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.storage.backend == StorageBackend::Local && self.storage.local_root.is_none() {
            return Err(ConfigError::InvalidValue(
                "storage.local_root is required for the local backend".into(),
            ));
        }
        Ok(())
    }
}
