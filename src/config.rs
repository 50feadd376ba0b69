use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backoff::BackoffPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub backend: BackendConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub download: DownloadConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_true")]
    pub verify_tls: bool,
}

fn default_api_version() -> String {
    "v6.0".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_token_env() -> String {
    "NETASSURE_TOKEN".to_string()
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    #[serde(default = "default_max_stalled_pages")]
    pub max_stalled_pages: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_stalled_pages: default_max_stalled_pages(),
        }
    }
}

fn default_page_size() -> u64 {
    1000
}
fn default_max_stalled_pages() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobsConfig {
    #[serde(default = "default_retry")]
    pub retry: u32,
    #[serde(default = "default_job_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_backoff")]
    pub backoff: BackoffKind,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            retry: default_retry(),
            timeout_secs: default_job_timeout_secs(),
            backoff: default_backoff(),
            interval_ms: default_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
        }
    }
}

fn default_retry() -> u32 {
    5
}
fn default_job_timeout_secs() -> u64 {
    60
}
fn default_backoff() -> BackoffKind {
    BackoffKind::Exponential
}
fn default_interval_ms() -> u64 {
    1000
}
fn default_max_interval_ms() -> u64 {
    16_000
}

impl JobsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The polling schedule described by this section.
    pub fn backoff_policy(&self) -> BackoffPolicy {
        let interval = Duration::from_millis(self.interval_ms);
        match self.backoff {
            BackoffKind::Fixed => BackoffPolicy::Fixed { interval },
            BackoffKind::Exponential => BackoffPolicy::Exponential {
                initial: interval,
                max: Duration::from_millis(self.max_interval_ms),
            },
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LifecycleConfig {
    /// Poll the backend job table after load/unload until the job is done.
    /// When off, the record is left as it was and only `refresh` shows the
    /// new state.
    #[serde(default = "default_true")]
    pub wait_for_jobs: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            wait_for_jobs: default_true(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_snapshot_ref")]
    pub snapshot: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            snapshot: default_snapshot_ref(),
        }
    }
}

fn default_snapshot_ref() -> String {
    "$last".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DownloadConfig {
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Config {
    /// Configuration with every section at its default, for library use.
    pub fn default_for(base_url: &str) -> Self {
        Self {
            backend: BackendConfig {
                base_url: base_url.to_string(),
                api_version: default_api_version(),
                timeout_secs: default_timeout_secs(),
                token_env: default_token_env(),
                verify_tls: true,
            },
            query: QueryConfig::default(),
            jobs: JobsConfig::default(),
            lifecycle: LifecycleConfig::default(),
            session: SessionConfig::default(),
            download: DownloadConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate backend
    if config.backend.base_url.trim().is_empty() {
        anyhow::bail!("backend.base_url must not be empty");
    }
    if !config.backend.base_url.starts_with("http://")
        && !config.backend.base_url.starts_with("https://")
    {
        anyhow::bail!(
            "backend.base_url must start with http:// or https:// (got '{}')",
            config.backend.base_url
        );
    }

    // Validate query
    if config.query.page_size == 0 {
        anyhow::bail!("query.page_size must be > 0");
    }
    if config.query.max_stalled_pages == 0 {
        anyhow::bail!("query.max_stalled_pages must be > 0");
    }

    // Validate jobs
    if config.jobs.retry == 0 {
        anyhow::bail!("jobs.retry must be > 0");
    }
    if config.jobs.backoff == BackoffKind::Exponential
        && config.jobs.max_interval_ms < config.jobs.interval_ms
    {
        anyhow::bail!("jobs.max_interval_ms must be >= jobs.interval_ms");
    }

    if config.session.snapshot.trim().is_empty() {
        anyhow::bail!("session.snapshot must not be empty");
    }

    Ok(())
}
