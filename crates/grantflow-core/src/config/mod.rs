//! Configuration parsing and management.
//!
//! Deployment tunables live in one TOML file. Every knob has a default, so
//! an empty file is a valid configuration; validation rejects values that
//! would disable an invariant (a zero verification radius, zero retry
//! budgets) rather than letting them fail somewhere deeper.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::evidence::CaptureConfig;

/// Errors that can occur loading configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// Failed to read the config file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid config: {0}")]
    Validation(String),
}

/// Top-level grantflow configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GrantflowConfig {
    /// Path to the SQLite database.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Site verification radius in metres. Strictly-less-than comparison.
    #[serde(default = "default_verification_radius_m")]
    pub verification_radius_m: f64,

    /// Bound on location acquisition, in milliseconds.
    #[serde(default = "default_location_timeout_ms")]
    pub location_timeout_ms: u64,

    /// Maximum evidence upload attempts.
    #[serde(default = "default_upload_max_attempts")]
    pub upload_max_attempts: u32,

    /// Base evidence upload backoff in milliseconds; doubles per retry.
    #[serde(default = "default_upload_backoff_ms")]
    pub upload_backoff_ms: u64,

    /// Maximum retries for ledger writes that hit a concurrency conflict.
    #[serde(default = "default_write_retry_max_attempts")]
    pub write_retry_max_attempts: u32,

    /// Capacity of the change-event broadcast channel.
    #[serde(default = "default_notifier_channel_capacity")]
    pub notifier_channel_capacity: usize,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("grantflow.db")
}

const fn default_verification_radius_m() -> f64 {
    crate::geo::SITE_VERIFICATION_RADIUS_M
}

const fn default_location_timeout_ms() -> u64 {
    10_000
}

const fn default_upload_max_attempts() -> u32 {
    3
}

const fn default_upload_backoff_ms() -> u64 {
    250
}

const fn default_write_retry_max_attempts() -> u32 {
    3
}

const fn default_notifier_channel_capacity() -> usize {
    256
}

impl Default for GrantflowConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            verification_radius_m: default_verification_radius_m(),
            location_timeout_ms: default_location_timeout_ms(),
            upload_max_attempts: default_upload_max_attempts(),
            upload_backoff_ms: default_upload_backoff_ms(),
            write_retry_max_attempts: default_write_retry_max_attempts(),
            notifier_channel_capacity: default_notifier_channel_capacity(),
        }
    }
}

impl GrantflowConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or a value is out of range.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] for values that would disable an
    /// invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.verification_radius_m.is_finite() || self.verification_radius_m <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "verification_radius_m must be positive, got {}",
                self.verification_radius_m
            )));
        }
        if self.location_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "location_timeout_ms must be positive".to_string(),
            ));
        }
        if self.upload_max_attempts == 0 {
            return Err(ConfigError::Validation(
                "upload_max_attempts must be at least 1".to_string(),
            ));
        }
        if self.write_retry_max_attempts == 0 {
            return Err(ConfigError::Validation(
                "write_retry_max_attempts must be at least 1".to_string(),
            ));
        }
        if self.notifier_channel_capacity == 0 {
            return Err(ConfigError::Validation(
                "notifier_channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Capture tunables derived from this configuration.
    #[must_use]
    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            location_timeout: Duration::from_millis(self.location_timeout_ms),
            verification_radius_m: self.verification_radius_m,
            upload_max_attempts: self.upload_max_attempts,
            upload_backoff: Duration::from_millis(self.upload_backoff_ms),
        }
    }
}
