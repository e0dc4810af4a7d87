//! Configuration module for VaultSpace.
//!
//! Provides typed configuration structs that map to the YAML configuration
//! file, with loading, validation and defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for VaultSpace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub cache: CacheConfig,
    pub streaming: StreamingConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

/// Reconciliation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between background sync cycles.
    pub poll_interval_secs: u64,
    /// Retries per remote call before a cycle gives up.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_backoff_ms: u64,
    /// Cap for the exponential backoff, in seconds.
    pub max_backoff_secs: u64,
    /// Capacity of the change-notification channel.
    pub event_buffer: usize,
}

/// Content cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory for persisted content ranges.
    pub dir: PathBuf,
    /// Total byte budget across all files.
    pub max_bytes: u64,
    /// Whether ranges are mirrored to disk.
    pub persist: bool,
}

/// Range fetcher settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Smallest remote fetch, in bytes.
    pub min_prefetch_bytes: u64,
    /// Largest remote fetch, in bytes.
    pub max_prefetch_bytes: u64,
    /// Seconds of playback to prefetch when a bitrate is known.
    pub prefetch_seconds: u64,
}

/// Metadata database settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file.
    pub path: PathBuf,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of trace, debug, info, warn, error.
    pub level: String,
    /// `text` or `json`.
    pub format: String,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/vaultspace/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("vaultspace")
            .join("config.yaml")
    }

    /// Retry policy derived from the `sync` section.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.sync.max_retries,
            base_delay: Duration::from_millis(self.sync.base_backoff_ms),
            max_delay: Duration::from_secs(self.sync.max_backoff_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            max_retries: 5,
            base_backoff_ms: 1000,
            max_backoff_secs: 60,
            event_buffer: 256,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("~/.cache"))
                .join("vaultspace"),
            max_bytes: 120 * 1024 * 1024,
            persist: true,
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            min_prefetch_bytes: 256 * 1024,
            max_prefetch_bytes: 8 * 1024 * 1024,
            prefetch_seconds: 5,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/share"))
                .join("vaultspace")
                .join("vault.db"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single validation problem found in a [`Config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.poll_interval_secs"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `logging.format`.
const VALID_LOG_FORMATS: &[&str] = &["text", "json"];

impl Config {
    /// Check every field and return all problems found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut push = |field: &str, message: &str| {
            errors.push(ValidationError {
                field: field.into(),
                message: message.into(),
            })
        };

        if self.sync.poll_interval_secs == 0 {
            push("sync.poll_interval_secs", "must be greater than 0");
        }
        if self.sync.base_backoff_ms == 0 {
            push("sync.base_backoff_ms", "must be greater than 0");
        }
        if self.sync.max_backoff_secs == 0 {
            push("sync.max_backoff_secs", "must be greater than 0");
        }
        if self.sync.event_buffer == 0 {
            push("sync.event_buffer", "must be greater than 0");
        }

        if self.cache.max_bytes == 0 {
            push("cache.max_bytes", "must be greater than 0");
        }

        if self.streaming.min_prefetch_bytes == 0 {
            push("streaming.min_prefetch_bytes", "must be greater than 0");
        }
        if self.streaming.min_prefetch_bytes > self.streaming.max_prefetch_bytes {
            push(
                "streaming.max_prefetch_bytes",
                "must not be smaller than streaming.min_prefetch_bytes",
            );
        }

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            push(
                "logging.level",
                &format!("must be one of: {}", VALID_LOG_LEVELS.join(", ")),
            );
        }
        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            push(
                "logging.format",
                &format!("must be one of: {}", VALID_LOG_FORMATS.join(", ")),
            );
        }

        errors
    }
}
