//! Configuration loaded from `ZEDBOX_*` environment variables.
//!
//! Nested keys use `__`, e.g. `ZEDBOX_LOG__LEVEL=debug` or
//! `ZEDBOX_LOG__FORMAT=json`. Anything unset keeps its default.

use crate::error::ConfigError;
use ::config::{Config, Environment};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "ZEDBOX";

/// Process-wide settings shared by the dispatcher and every agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZedboxConfig {
    /// Root of the bus socket tree
    #[serde(default = "default_run_dir")]
    pub run_dir: PathBuf,

    /// Certificate directory prepared by the supervisor
    #[serde(default = "default_cert_dir")]
    pub cert_dir: PathBuf,

    /// Logging settings
    #[serde(default)]
    pub log: LogConfig,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

/// Log record format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Text,
    /// One JSON object per record
    Json,
}

fn default_run_dir() -> PathBuf {
    PathBuf::from(zedbox_pubsub::socket::DEFAULT_RUN_DIR)
}

fn default_cert_dir() -> PathBuf {
    PathBuf::from("/persist/certs")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl Default for ZedboxConfig {
    fn default() -> Self {
        Self {
            run_dir: default_run_dir(),
            cert_dir: default_cert_dir(),
            log: LogConfig::default(),
        }
    }
}

impl ZedboxConfig {
    /// Load from the process environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Environment::with_prefix(ENV_PREFIX))
    }

    /// Load from an explicit environment source
    pub fn load_from(environment: Environment) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(
                environment
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(config.try_deserialize()?)
    }
}
