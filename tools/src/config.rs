//! Toolbox configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::monitor::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct ToolboxConfig {
    /// Root of the file store (toggle state, result snapshots)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

impl Default for ToolboxConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            monitor: MonitorConfig::default(),
            executor: ExecutorConfig::default(),
        }
    }
}

impl ToolboxConfig {
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Queue length per observer before updates are dropped for it
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            retries: default_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    /// Applied to strategies without their own timeout
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
        }
    }
}

impl ExecutorConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

fn default_data_dir() -> PathBuf { PathBuf::from("./data") }
fn default_interval_ms() -> u64 { 5000 }
fn default_retries() -> u32 { 3 }
fn default_retry_delay_ms() -> u64 { 1000 }
fn default_channel_capacity() -> usize { 32 }
fn default_timeout_ms() -> u64 { 30_000 }
