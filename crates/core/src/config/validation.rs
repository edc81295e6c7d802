//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_expiry_days == 0 {
            return Err(invalid("cache_expiry_days", "must be at least 1"));
        }

        if self.wait_timeout_ms < 100 {
            return Err(invalid("wait_timeout_ms", "must be at least 100ms"));
        }
        if self.wait_timeout_ms > 300_000 {
            return Err(invalid("wait_timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        if self.poll_interval_ms < 10 {
            return Err(invalid("poll_interval_ms", "must be at least 10ms"));
        }
        if self.poll_interval_ms > self.wait_timeout_ms {
            return Err(invalid("poll_interval_ms", "must not exceed wait_timeout_ms"));
        }

        if self.max_retries == 0 {
            return Err(invalid("max_retries", "must be at least 1"));
        }
        if self.max_retries > 10 {
            return Err(invalid("max_retries", "must not exceed 10"));
        }

        if self.retry_delay_ms > 60_000 {
            return Err(invalid("retry_delay_ms", "must not exceed 1 minute (60000ms)"));
        }

        if !self.backoff_factor.is_finite() || !(1.0..=10.0).contains(&self.backoff_factor) {
            return Err(invalid("backoff_factor", "must be between 1.0 and 10.0"));
        }

        if self.export_path.as_os_str().is_empty() {
            return Err(invalid("export_path", "must not be empty"));
        }

        if self.retry_delay_ms == 0 && self.max_retries > 1 {
            tracing::warn!(max_retries = self.max_retries, "retry_delay_ms is 0; retries will not back off");
        }

        Ok(())
    }
}
