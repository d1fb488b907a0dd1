//! Configuration for the workflow status coordinator.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_MAX_ITERATIONS: u32 = 720;
pub const DEFAULT_IDLE_STOP_THRESHOLD: u32 = 12;
pub const DEFAULT_RESTART_SETTLE_MS: u64 = 250;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StatusConfig {
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub service: ServiceConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_ms: u64,
    /// Upper bound on ticks for one poll lifetime.
    pub max_iterations: u32,
    /// Consecutive empty results before polling stops itself. `0` disables.
    pub idle_stop_threshold: u32,
    pub restart_settle_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            idle_stop_threshold: DEFAULT_IDLE_STOP_THRESHOLD,
            restart_settle_ms: DEFAULT_RESTART_SETTLE_MS,
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn restart_settle(&self) -> Duration {
        Duration::from_millis(self.restart_settle_ms)
    }

    pub fn idle_stop_enabled(&self) -> bool {
        self.idle_stop_threshold > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Deadline around each call into the human input service. `0` waits forever.
    pub request_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl ServiceConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }
}

pub fn parse_status_config(contents: &str) -> Result<StatusConfig, toml::de::Error> {
    toml::from_str(contents)
}

pub fn load_status_config(path: impl AsRef<Path>) -> Result<StatusConfig, ConfigError> {
    let path_ref = path.as_ref();
    let body = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
        path: path_ref.to_path_buf(),
        source,
    })?;
    parse_status_config(&body).map_err(|source| ConfigError::Parse {
        path: path_ref.to_path_buf(),
        source,
    })
}
