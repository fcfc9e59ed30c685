use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::inference::TimeoutPolicy;
use crate::model::SeverityThresholds;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// Defaults to `~/.leakwatch/data/leakwatch.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub severity: SeverityThresholds,
    #[serde(default)]
    pub adapter: AdapterConfig,
    /// Jobs running longer than this are cancelled.
    #[serde(default)]
    pub job_deadline_secs: Option<u64>,
    /// Share of a job's rows that may be skipped before the job fails.
    #[serde(default = "default_max_skip_ratio")]
    pub max_skip_ratio: f64,
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: String,
    #[serde(default = "default_channel_capacity")]
    pub progress_channel_capacity: usize,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_batch_size() -> usize {
    100
}

fn default_max_skip_ratio() -> f64 {
    0.5
}

fn default_timestamp_field() -> String {
    "invoice_date".to_string()
}

fn default_channel_capacity() -> usize {
    100
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            database_path: None,
            worker_count: default_worker_count(),
            batch_size: default_batch_size(),
            severity: SeverityThresholds::default(),
            adapter: AdapterConfig::default(),
            job_deadline_secs: None,
            max_skip_ratio: default_max_skip_ratio(),
            timestamp_field: default_timestamp_field(),
            progress_channel_capacity: default_channel_capacity(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn job_deadline(&self) -> Option<Duration> {
        self.job_deadline_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    #[serde(default = "default_adapter_timeout")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub timeout_policy: TimeoutPolicy,
    /// Caps the worker count below what the adapter itself reports.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

fn default_adapter_timeout() -> u64 {
    30_000
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_adapter_timeout(),
            timeout_policy: TimeoutPolicy::default(),
            max_concurrency: None,
        }
    }
}

impl AdapterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directives. `RUST_LOG` takes precedence when set.
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}
