//! Typed configuration from environment variables and an optional TOML file.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. Sensitive values wrapped in secrecy::SecretString to prevent
//! log leaks.

pub mod duration_millis;
pub mod secrets;

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::engine::{AutoscalerConfig, PoolConfig};
use crate::error::{Error, Result};
use crate::notify::DEFAULT_SERVICE;

/// Default simulated processing time per item.
pub const DEFAULT_PROCESSING_TIME: Duration = Duration::from_secs(3);

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// Label attached to completion notifications.
    pub notify_service: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this. Scaling knobs
    /// are resolved separately by [`ScalingFile::resolve`].
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            notify_service: std::env::var("AWS_SERVICE")
                .unwrap_or_else(|_| DEFAULT_SERVICE.to_string()),
        })
    }
}

/// Scaling knobs, as read from a TOML file.
///
/// ```toml
/// processing_ms = 3000
///
/// [pool]
/// min_workers = 1
/// max_workers = 5
/// join_timeout_ms = 2000
///
/// [autoscaler]
/// poll_interval_ms = 5000
/// oversubscription_ratio = 2.0
/// ```
///
/// Missing keys fall back to defaults. `TASKSCALE_*` environment variables
/// override the file, and the merged result is validated once.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScalingFile {
    pub pool: PoolConfig,
    pub autoscaler: AutoscalerConfig,
    #[serde(rename = "processing_ms", with = "duration_millis")]
    pub processing_time: Duration,
}

impl Default for ScalingFile {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            autoscaler: AutoscalerConfig::default(),
            processing_time: DEFAULT_PROCESSING_TIME,
        }
    }
}

impl ScalingFile {
    /// Layer `TASKSCALE_*` overrides over `path` (or the defaults) and
    /// validate the result.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        let file = base.with_env_overrides()?;
        file.validate()?;
        Ok(file)
    }

    /// Parse a TOML scaling file. Not validated: environment overrides may
    /// still change it.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read scaling file {}: {e}", path.display()))
        })?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("bad scaling file {}: {e}", path.display())))
    }

    /// Apply `TASKSCALE_*` environment overrides.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(n) = optional_var("TASKSCALE_MIN_WORKERS")? {
            self.pool.min_workers = n;
        }
        if let Some(n) = optional_var("TASKSCALE_MAX_WORKERS")? {
            self.pool.max_workers = n;
        }
        if let Some(ms) = optional_var("TASKSCALE_JOIN_TIMEOUT_MS")? {
            self.pool.join_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = optional_var("TASKSCALE_SHUTDOWN_TIMEOUT_MS")? {
            self.pool.shutdown_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = optional_var("TASKSCALE_POLL_INTERVAL_MS")? {
            self.autoscaler.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ratio) = optional_var("TASKSCALE_OVERSUBSCRIPTION_RATIO")? {
            self.autoscaler.oversubscription_ratio = ratio;
        }
        if let Some(ms) = optional_var("TASKSCALE_PROCESSING_MS")? {
            self.processing_time = Duration::from_millis(ms);
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        self.pool.validate()?;
        self.autoscaler.validate()
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn optional_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("invalid value for {name} ({raw:?}): {e}"))),
        Err(_) => Ok(None),
    }
}
