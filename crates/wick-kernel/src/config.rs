//! Run configuration.
//!
//! Loaded from `~/.config/wick/config.toml` (platform equivalent) when present;
//! the CLI overrides individual fields afterwards.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use wick_types::OutputFormat;

use crate::retry::RetryPolicy;
use crate::state::DEFAULT_ERROR_THRESHOLD;
use crate::template::DEFAULT_PLACEHOLDER;

/// Hard cap on concurrent workers.
pub const MAX_WORKERS: usize = 256;

/// Errors reading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("could not determine config directory")]
    NoConfigDir,
    #[error("failed to read config from {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config from {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Everything a run needs to know, from file, CLI, or defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Concurrent workers (clamped to 1..=MAX_WORKERS).
    pub threads: usize,
    /// Retries for transient module failures.
    pub retry: u32,
    /// Seconds between retries.
    pub retry_delay_secs: u64,
    /// Per-command timeout in seconds; 0 disables.
    pub timeout_secs: u64,
    /// Delay before each target starts, in milliseconds.
    pub delay_ms: u64,
    pub format: OutputFormat,
    /// Append-only results log.
    pub output: PathBuf,
    /// Append-only record of expanded values.
    pub last_file: PathBuf,
    pub proxy: Option<String>,
    /// Token replaced by each target (case-insensitive).
    pub placeholder: String,
    /// Identical errors logged before suppression.
    pub error_threshold: u32,
    /// Strip ANSI escapes and non-printables from command output.
    pub clean_output: bool,
    /// Extra options passed to every module.
    pub module_options: BTreeMap<String, String>,

    /// Module chain, `category:name[|category:name...]`.
    pub module: Option<String>,
    /// Run every chain position against the original target.
    pub fanout: bool,
    /// Only process targets containing this substring.
    pub filter: Option<String>,
    /// Helper results must contain this substring.
    pub iff: Option<String>,
    /// Module results must contain this substring.
    pub ifm: Option<String>,
    /// Command whose stdin receives the expanded command's stdout.
    pub pipe: Option<String>,
    /// Execute the expanded text as a command.
    pub execute: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            threads: 10,
            retry: 1,
            retry_delay_secs: 1,
            timeout_secs: 60,
            delay_ms: 0,
            format: OutputFormat::Text,
            output: PathBuf::from("wick-output.log"),
            last_file: PathBuf::from("wick-last.txt"),
            proxy: None,
            placeholder: DEFAULT_PLACEHOLDER.to_string(),
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            clean_output: false,
            module_options: BTreeMap::new(),
            module: None,
            fanout: false,
            filter: None,
            iff: None,
            ifm: None,
            pipe: None,
            execute: true,
        }
    }
}

impl RunConfig {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, returns default configuration.
    pub fn load() -> Result<Self, ConfigFileError> {
        let path = Self::config_path()?;

        if !path.exists() {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| ConfigFileError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Get the default config file path.
    pub fn config_path() -> Result<PathBuf, ConfigFileError> {
        let dirs = ProjectDirs::from("", "", "wick").ok_or(ConfigFileError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    pub fn workers(&self) -> usize {
        self.threads.clamp(1, MAX_WORKERS)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry, Duration::from_secs(self.retry_delay_secs))
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}
