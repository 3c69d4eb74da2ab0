//! Startup configuration.
//!
//! Settings are read once from `PDFDOCK_*` environment variables (after an
//! optional `.env` file) and are read-only afterwards.
//!
//! ```ignore
//! use pdfdock_jobs::Settings;
//!
//! pdfdock_jobs::settings::load_dotenv();
//! let settings = Settings::from_env()?;
//! println!("jobs live in {}", settings.jobs_dir.display());
//! ```

use crate::error::{JobError, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable prefix for every setting.
pub const ENV_PREFIX: &str = "PDFDOCK_";

/// Longest retention accepted for finished jobs (ten years).
pub const MAX_STORAGE_TTL_MINUTES: u64 = 10 * 365 * 24 * 60;

/// Secret used when none is configured. Fine for development only.
pub const DEV_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Root directory holding one workspace per job
    #[serde(default = "default_jobs_dir")]
    pub jobs_dir: PathBuf,

    /// Key for download tokens
    #[serde(default = "default_secret_key")]
    pub secret_key: String,

    /// Redis URL; the queue strategy is only considered when set
    #[serde(default)]
    pub redis_url: Option<String>,

    #[serde(default = "default_true")]
    pub use_queue: bool,

    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    #[serde(default = "default_local_workers")]
    pub local_workers: usize,

    #[serde(default = "default_local_queue_capacity")]
    pub local_queue_capacity: usize,

    /// Seconds a queue worker may go silent before its jobs are redelivered
    #[serde(default = "default_worker_lease_secs")]
    pub worker_lease_secs: u64,

    /// How long finished jobs are kept before the sweeper removes them
    #[serde(default = "default_storage_ttl_minutes")]
    pub storage_ttl_minutes: u64,

    #[serde(default)]
    pub job_timeout_secs: Option<u64>,

    /// Limit for a single external tool invocation
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,

    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

fn default_jobs_dir() -> PathBuf {
    std::env::temp_dir().join("pdfdock_jobs")
}

fn default_secret_key() -> String {
    DEV_SECRET.to_string()
}

fn default_true() -> bool {
    true
}

fn default_queue_name() -> String {
    "pdfdock".to_string()
}

fn default_local_workers() -> usize {
    4
}

fn default_local_queue_capacity() -> usize {
    256
}

fn default_worker_lease_secs() -> u64 {
    30
}

fn default_storage_ttl_minutes() -> u64 {
    60
}

fn default_tool_timeout_secs() -> u64 {
    300
}

fn default_max_upload_bytes() -> u64 {
    100 * 1024 * 1024
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            jobs_dir: default_jobs_dir(),
            secret_key: default_secret_key(),
            redis_url: None,
            use_queue: true,
            queue_name: default_queue_name(),
            local_workers: default_local_workers(),
            local_queue_capacity: default_local_queue_capacity(),
            worker_lease_secs: default_worker_lease_secs(),
            storage_ttl_minutes: default_storage_ttl_minutes(),
            job_timeout_secs: None,
            tool_timeout_secs: default_tool_timeout_secs(),
            max_upload_bytes: default_max_upload_bytes(),
            log_format: default_log_format(),
        }
    }
}

/// Load a `.env` file from the current directory or its parents, if any.
///
/// Returns the path that was loaded.
pub fn load_dotenv() -> Option<PathBuf> {
    dotenvy::dotenv().ok()
}

impl Settings {
    /// Read settings from `PDFDOCK_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let settings: Self = envy::prefixed(ENV_PREFIX)
            .from_env()
            .map_err(|e| JobError::ConfigError(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read settings from an explicit set of variables (names include the prefix).
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let settings: Self = envy::prefixed(ENV_PREFIX)
            .from_iter(vars)
            .map_err(|e| JobError::ConfigError(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.secret_key.is_empty() {
            return Err(JobError::ConfigError("secret_key must not be empty".into()));
        }
        if self.queue_name.is_empty() {
            return Err(JobError::ConfigError("queue_name must not be empty".into()));
        }
        if self.local_workers == 0 {
            return Err(JobError::ConfigError("local_workers must be at least 1".into()));
        }
        if self.local_queue_capacity == 0 {
            return Err(JobError::ConfigError(
                "local_queue_capacity must be at least 1".into(),
            ));
        }
        if self.worker_lease_secs == 0 {
            return Err(JobError::ConfigError("worker_lease_secs must be at least 1".into()));
        }
        if self.storage_ttl_minutes > MAX_STORAGE_TTL_MINUTES {
            return Err(JobError::ConfigError(format!(
                "storage_ttl_minutes must not exceed {}",
                MAX_STORAGE_TTL_MINUTES
            )));
        }
        if self.max_upload_bytes == 0 {
            return Err(JobError::ConfigError("max_upload_bytes must be at least 1".into()));
        }
        Ok(())
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.secret_key == DEV_SECRET
    }

    pub fn storage_ttl(&self) -> Duration {
        Duration::from_secs(self.storage_ttl_minutes.saturating_mul(60))
    }

    pub fn worker_lease(&self) -> Duration {
        Duration::from_secs(self.worker_lease_secs)
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}
