//! Application configuration with layered loading.
//!
//! Uses figment to merge, lowest precedence first:
//!
//! 1. Built-in defaults
//! 2. TOML config file (if HARVEST_CONFIG_FILE set)
//! 3. Environment variables (HARVEST_*)

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::cache::CachePolicy;
use crate::error::FailureKind;
use crate::retry::RetryPolicy;
use crate::wait::WaitCondition;

mod validation;

pub use validation::ConfigError;

/// Environment variable naming an optional TOML config file.
pub const CONFIG_FILE_ENV: &str = "HARVEST_CONFIG_FILE";

/// Prefix for per-field environment overrides.
pub const ENV_PREFIX: &str = "HARVEST_";

/// Application configuration with layered loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite cache database.
    ///
    /// Set via HARVEST_DB_PATH.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Records older than this many days are expired.
    ///
    /// Set via HARVEST_CACHE_EXPIRY_DAYS.
    #[serde(default = "default_cache_expiry_days")]
    pub cache_expiry_days: u32,

    /// How long a page may take to become ready, in milliseconds.
    ///
    /// Set via HARVEST_WAIT_TIMEOUT_MS.
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,

    /// Readiness poll interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Total attempts per live fetch, including the first.
    ///
    /// Set via HARVEST_MAX_RETRIES.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Multiplier applied to the delay on each further retry.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Add up to 25% random jitter to retry delays.
    #[serde(default)]
    pub retry_jitter: bool,

    /// Run the browser without a window (render feature).
    #[serde(default = "default_true")]
    pub headless: bool,

    /// Default destination for JSON exports.
    #[serde(default = "default_export_path")]
    pub export_path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./harvest-cache.sqlite")
}

fn default_cache_expiry_days() -> u32 {
    7
}

fn default_wait_timeout_ms() -> u64 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    2_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_export_path() -> PathBuf {
    PathBuf::from("./export.json")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            cache_expiry_days: default_cache_expiry_days(),
            wait_timeout_ms: default_wait_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            backoff_factor: default_backoff_factor(),
            retry_jitter: false,
            headless: true,
            export_path: default_export_path(),
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources with layered precedence.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the config file or an environment variable
    /// cannot be parsed, or if validation fails after loading.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var(CONFIG_FILE_ENV) {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed(ENV_PREFIX)
                .ignore(&["config_file"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cache_policy(&self) -> CachePolicy {
        CachePolicy::from_days(self.cache_expiry_days)
    }

    /// Retry policy with the default transient set as retryable.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_delay_ms))
            .with_backoff(self.backoff_factor)
            .with_retryable(FailureKind::ALL.into_iter().filter(|k| k.is_transient()))
            .with_jitter(self.retry_jitter)
    }

    pub fn wait_condition(&self) -> WaitCondition {
        WaitCondition::new(self.wait_timeout(), self.poll_interval())
    }
}
