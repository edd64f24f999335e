//! Configuration parameters for the telemetry agent.

use config::{ConfigBuilder, Environment, File, FileFormat};
use getset::{CopyGetters, Getters, Setters};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use typed_builder::TypedBuilder;
use url::Url;

/// How often the collector samples the host (1 second).
pub const DEFAULT_COLLECT_INTERVAL_MS: u64 = 1_000;

/// How often the forwarder drains the store (10 seconds).
pub const DEFAULT_FORWARD_INTERVAL_MS: u64 = 10_000;

/// Upper bound on a single delivery attempt. Keeps an unresponsive endpoint
/// from holding the forwarder past its next tick indefinitely.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Local sample database, relative to the working directory.
pub const DEFAULT_DB_PATH: &str = "./telemetry.db";

/// Prefix for environment overrides, e.g. `TELEMETRY__ENDPOINT`.
pub const ENV_PREFIX: &str = "TELEMETRY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("`{0}` must be greater than zero")]
    ZeroInterval(&'static str),

    #[error("Invalid endpoint `{endpoint}`: {source}")]
    InvalidEndpoint {
        endpoint: String,
        source: url::ParseError,
    },

    #[error("Database path cannot be empty")]
    EmptyDbPath,
}

#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Getters,
    CopyGetters,
    Setters,
    TypedBuilder,
)]
#[serde(default)]
pub struct AgentConfig {
    /// Address of the remote server receiving sample batches. `None` means no
    /// remote is configured; batches are still snapshotted but never sent.
    #[getset(get = "pub", set = "pub")]
    #[builder(default)]
    endpoint: Option<String>,
    /// Path of the local sample database.
    #[getset(get = "pub", set = "pub")]
    #[builder(default = PathBuf::from(DEFAULT_DB_PATH))]
    db_path: PathBuf,
    #[getset(get_copy = "pub", set = "pub")]
    #[builder(default = DEFAULT_COLLECT_INTERVAL_MS)]
    collect_interval_ms: u64,
    #[getset(get_copy = "pub", set = "pub")]
    #[builder(default = DEFAULT_FORWARD_INTERVAL_MS)]
    forward_interval_ms: u64,
    #[getset(get_copy = "pub", set = "pub")]
    #[builder(default = DEFAULT_REQUEST_TIMEOUT_MS)]
    request_timeout_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig::builder().build()
    }
}

impl AgentConfig {
    /// Load configuration from an optional TOML file and the environment.
    /// Environment variables (`TELEMETRY__*`) take precedence over the file.
    pub fn load_from_file_and_env(file_path: Option<&Path>) -> Result<Self, ConfigError> {
        let defaults = AgentConfig::default();
        let mut builder = ConfigBuilder::<config::builder::DefaultState>::default()
            .set_default("db_path", DEFAULT_DB_PATH)?
            .set_default("collect_interval_ms", defaults.collect_interval_ms)?
            .set_default("forward_interval_ms", defaults.forward_interval_ms)?
            .set_default("request_timeout_ms", defaults.request_timeout_ms)?;

        if let Some(path) = file_path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }

        let config = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize::<AgentConfig>()?;

        config.validated()
    }

    /// Checks the configuration for values the agent cannot run with, and
    /// normalizes an empty endpoint to "not configured".
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        if self.collect_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval("collect_interval_ms"));
        }
        if self.forward_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval("forward_interval_ms"));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::ZeroInterval("request_timeout_ms"));
        }
        if self.db_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyDbPath);
        }

        self.endpoint = match self.endpoint.take().map(|e| e.trim().to_string()) {
            Some(endpoint) if endpoint.is_empty() => None,
            Some(endpoint) => {
                Url::parse(&endpoint).map_err(|source| ConfigError::InvalidEndpoint {
                    endpoint: endpoint.clone(),
                    source,
                })?;
                Some(endpoint)
            }
            None => None,
        };

        Ok(self)
    }

    pub fn collect_interval(&self) -> Duration {
        Duration::from_millis(self.collect_interval_ms)
    }

    pub fn forward_interval(&self) -> Duration {
        Duration::from_millis(self.forward_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
