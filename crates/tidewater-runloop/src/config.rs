//! Configuration for the run loop.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RunLoopError, RunLoopResult};

/// Run loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLoopConfig {
    /// OS wait configuration.
    #[serde(default)]
    pub poll: PollConfig,

    /// Cross-thread performer configuration.
    #[serde(default)]
    pub perform: PerformConfig,

    /// Watcher fairness configuration.
    #[serde(default)]
    pub fairness: FairnessConfig,

    /// Whether to collect metrics.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for RunLoopConfig {
    fn default() -> Self {
        Self {
            poll: PollConfig::default(),
            perform: PerformConfig::default(),
            fairness: FairnessConfig::default(),
            metrics_enabled: true,
        }
    }
}

impl RunLoopConfig {
    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> RunLoopResult<Self> {
        toml::from_str(content).map_err(|e| RunLoopError::ConfigError(e.to_string()))
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> RunLoopResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            RunLoopError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }
}

/// OS wait configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Consecutive failed waits tolerated before the failure is fatal.
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    /// Upper bound on any single wait in milliseconds (none = unbounded).
    #[serde(default)]
    pub max_wait_ms: Option<u64>,

    /// Initial capacity of the per-mode poll buffers and of the poller's
    /// descriptor index buffer.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

fn default_retry_limit() -> u32 {
    1
}

fn default_buffer_capacity() -> usize {
    64
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            retry_limit: default_retry_limit(),
            max_wait_ms: None,
            buffer_capacity: default_buffer_capacity(),
        }
    }
}

impl PollConfig {
    /// Get the wait cap as a Duration.
    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait_ms.map(Duration::from_millis)
    }
}

/// Cross-thread performer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformConfig {
    /// Bound on `perform_and_wait` when the caller gives none, in milliseconds.
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
}

fn default_wait_timeout_ms() -> u64 {
    30_000
}

impl Default for PerformConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: default_wait_timeout_ms(),
        }
    }
}

impl PerformConfig {
    /// Get the wait bound as a Duration.
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

/// Watcher fairness configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FairnessConfig {
    /// Maximum watcher callbacks per cycle (none = all ready watchers).
    #[serde(default)]
    pub max_watchers_per_cycle: Option<usize>,
}
