//! Configuration management for querygate.
//!
//! Handles loading configuration from TOML files and environment variables.
//! The only runtime-configurable inputs are the environment map, the default
//! environment, and pool sizing; row caps are engine constants.

use crate::db::{DatabaseBackend, PoolSettings, DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_MAX_CONNECTIONS};
use crate::error::{GateError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Prefix for environment variables that define environments,
/// e.g. `QUERYGATE_ENV_PROD=postgres://...` defines `prod`.
pub const ENV_VAR_PREFIX: &str = "QUERYGATE_ENV_";

/// Environment variable naming the default environment.
pub const DEFAULT_ENV_VAR: &str = "QUERYGATE_DEFAULT_ENV";

/// Main configuration structure for querygate.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Environment selected at startup and reverted to after the dwell window.
    #[serde(default)]
    pub default_environment: Option<String>,

    /// Pool sizing shared by every environment.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Environment name to connection string.
    #[serde(default)]
    pub environments: BTreeMap<String, String>,
}

/// Pool sizing configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_acquire_timeout_secs() -> u64 {
    DEFAULT_ACQUIRE_TIMEOUT.as_secs()
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }
}

impl PoolConfig {
    /// Converts to the store layer's pool settings.
    pub fn settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.max_connections.max(1),
            acquire_timeout: Duration::from_secs(self.acquire_timeout_secs.max(1)),
        }
    }
}

impl Config {
    /// Returns the default config file path for the current platform.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("querygate")
            .join("config.toml")
    }

    /// Loads configuration from a TOML file. A missing file yields the default.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| GateError::config(format!("Failed to read config file: {e}")))?;

        Self::parse_toml(&content, path)
    }

    /// Parses configuration from a TOML string.
    fn parse_toml(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            GateError::config(format!(
                "Configuration error in {}:\n  {}",
                path.display(),
                e
            ))
        })
    }

    /// Applies `QUERYGATE_ENV_*` and `QUERYGATE_DEFAULT_ENV` from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_vars(std::env::vars());
    }

    /// Applies overrides from an explicit variable list.
    pub fn apply_vars(&mut self, vars: impl IntoIterator<Item = (String, String)>) {
        for (key, value) in vars {
            if key == DEFAULT_ENV_VAR {
                self.default_environment = Some(value);
            } else if let Some(name) = key.strip_prefix(ENV_VAR_PREFIX) {
                if !name.is_empty() {
                    self.environments.insert(name.to_lowercase(), value);
                }
            }
        }
    }

    /// Resolves the default environment name.
    ///
    /// Uses `default_environment` if set, otherwise an environment literally
    /// named `default`, otherwise the only environment if there is exactly one.
    pub fn default_environment(&self) -> Result<String> {
        if let Some(name) = &self.default_environment {
            return if self.environments.contains_key(name) {
                Ok(name.clone())
            } else {
                Err(GateError::config(format!(
                    "Default environment '{name}' is not defined"
                )))
            };
        }

        if self.environments.contains_key("default") {
            return Ok("default".to_string());
        }

        match self.environments.keys().collect::<Vec<_>>().as_slice() {
            [only] => Ok((*only).clone()),
            [] => Err(GateError::config("No environments configured")),
            _ => Err(GateError::config(
                "Multiple environments configured; set default_environment",
            )),
        }
    }

    /// Checks every connection string before any pool is built.
    pub fn validate(&self) -> Result<()> {
        for (name, url) in &self.environments {
            if DatabaseBackend::from_url(url).is_none() {
                return Err(GateError::config(format!(
                    "Environment '{name}' has an unsupported connection string: {}",
                    redact_url(url)
                )));
            }
        }
        self.default_environment().map(|_| ())
    }
}

/// Returns a display-safe form of a connection string (password masked).
pub fn redact_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("****"));
            }
            url.to_string()
        }
        Err(_) => "<invalid connection string>".to_string(),
    }
}
