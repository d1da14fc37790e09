//! Configuration management for windowlimit.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::{Result, WindowLimitError};

/// Prefix for environment variable overrides, e.g.
/// `WINDOWLIMIT__LIMITER__THRESHOLD=10`.
pub const ENV_PREFIX: &str = "WINDOWLIMIT";

/// Main configuration for windowlimit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowLimitConfig {
    /// Limiter parameters
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Worker task configuration
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Window and threshold applied to every key.
///
/// Values are not validated: a non-positive window expires records on the
/// next access and a non-positive threshold admits only first hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// How long a record stays live after creation, in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: i64,

    /// Hits allowed per window before further hits are rejected
    #[serde(default = "default_threshold")]
    pub threshold: i64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            threshold: default_threshold(),
        }
    }
}

impl LimiterConfig {
    /// Create a limiter configuration.
    pub fn new(window_secs: i64, threshold: i64) -> Self {
        Self {
            window_secs,
            threshold,
        }
    }
}

fn default_window_secs() -> i64 {
    60
}

fn default_threshold() -> i64 {
    100
}

/// Worker task configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Capacity of the command channel feeding the worker
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_channel_capacity() -> usize {
    1024
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl WindowLimitConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| WindowLimitError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration from an optional file layered under environment
    /// variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, environment())
    }

    fn load_with_env(path: Option<&Path>, env: ::config::Environment) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration");
            builder = builder.add_source(::config::File::from(path).required(true));
        }

        let config = builder.add_source(env).build()?.try_deserialize()?;
        Ok(config)
    }
}

fn environment() -> ::config::Environment {
    ::config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}
