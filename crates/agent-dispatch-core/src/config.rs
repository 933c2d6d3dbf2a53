//! Configuration loading.
//!
//! Values come from, in increasing precedence: built-in defaults, a TOML file,
//! and `AGENT_DISPATCH_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorKind;

const APP_DIR: &str = "agent-dispatch";

pub const ENV_BASE_URL: &str = "AGENT_DISPATCH_BASE_URL";
pub const ENV_IDLE_TIMEOUT: &str = "AGENT_DISPATCH_IDLE_TIMEOUT_SECS";
pub const ENV_STATE_DIR: &str = "AGENT_DISPATCH_STATE_DIR";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

impl ConfigError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Read { .. } => ErrorKind::Io,
            Self::Parse(_) | Self::InvalidEnv { .. } => ErrorKind::InvalidInput,
        }
    }
}

/// Remote service connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Timeout for single-shot requests. The event stream is bounded by the
    /// monitor's idle timeout instead.
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/api".to_string(),
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            user_agent: format!("{APP_DIR}/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ApiConfig {
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Session monitor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// A stream read that yields nothing for this long fails the session.
    pub idle_timeout_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 300,
        }
    }
}

impl MonitorConfig {
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Artifact materialization settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    /// Leading path segment stripped from artifact paths before writing.
    pub output_prefix: String,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            output_prefix: "output".to_string(),
        }
    }
}

/// When the execution context is disposed after a session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisposePolicy {
    /// After any terminal outcome, unless artifact retrieval failed.
    #[default]
    AfterTerminal,
    /// Only after a completed session whose artifacts were retrieved.
    AfterCompletion,
    /// Only after a completed session that produced at least one artifact.
    AfterArtifacts,
    /// Never; only explicit cleanup disposes.
    Never,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub api: ApiConfig,
    pub monitor: MonitorConfig,
    pub artifacts: ArtifactConfig,
    pub dispose_policy: DisposePolicy,
    /// Directory for persisted workspace state and credentials.
    pub state_dir: Option<PathBuf>,
}

impl DispatchConfig {
    /// Default config file location (`<config dir>/agent-dispatch/config.toml`).
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
    }

    /// Load from `path` (or the default location), then apply environment overrides.
    ///
    /// A missing file yields defaults.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed, or an override is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(Path::to_path_buf).or_else(Self::default_path);
        let mut config = match path {
            Some(path) => match std::fs::read_to_string(&path) {
                Ok(raw) => {
                    tracing::debug!(path = %path.display(), "loaded config file");
                    Self::from_toml_str(&raw)?
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(path = %path.display(), "no config file, using defaults");
                    Self::default()
                }
                Err(source) => return Err(ConfigError::Read { path, source }),
            },
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Parse a TOML document.
    ///
    /// # Errors
    /// Returns error if the document is not valid config TOML.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply overrides from an environment lookup.
    ///
    /// # Errors
    /// Returns error if a numeric override does not parse.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_BASE_URL) {
            self.api.base_url = url;
        }
        if let Some(raw) = lookup(ENV_IDLE_TIMEOUT) {
            self.monitor.idle_timeout_secs = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name: ENV_IDLE_TIMEOUT,
                value: raw.clone(),
            })?;
        }
        if let Some(dir) = lookup(ENV_STATE_DIR) {
            self.state_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    /// Resolved state directory (`<data dir>/agent-dispatch` when unset).
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR)
        })
    }
}
