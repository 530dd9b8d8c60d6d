//! Push configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use apn_core::Environment;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config file not found at {0}")]
    NotFound(PathBuf),
}

/// A host and port to connect to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Default gateway for `environment`.
    pub fn gateway(environment: Environment) -> Self {
        match environment {
            Environment::Production => Self::new("gateway.push.apple.com", 2195),
            Environment::Sandbox => Self::new("gateway.sandbox.push.apple.com", 2195),
        }
    }

    /// Default feedback service for `environment`.
    pub fn feedback(environment: Environment) -> Self {
        match environment {
            Environment::Production => Self::new("feedback.push.apple.com", 2196),
            Environment::Sandbox => Self::new("feedback.sandbox.push.apple.com", 2196),
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// What to do with a notification whose payload does not fit a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OversizedPolicy {
    /// Fail the batch before the notification is written.
    #[default]
    Abort,
    /// Leave the notification pending and carry on with the rest.
    Skip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApnConfig {
    #[serde(default)]
    pub environment: Environment,
    /// Overrides the environment's gateway.
    #[serde(default)]
    pub gateway: Option<Endpoint>,
    /// Overrides the environment's feedback service.
    #[serde(default)]
    pub feedback: Option<Endpoint>,
    /// PEM bundle used for apps without a certificate of their own.
    #[serde(default)]
    pub certificate_path: Option<PathBuf>,
    /// Extra trust anchors, as a PEM bundle.
    #[serde(default)]
    pub ca_bundle: Option<PathBuf>,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Attempt cap per batch; defaults to the number of pending notifications.
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub oversized: OversizedPolicy,
}

fn default_poll_timeout_ms() -> u64 {
    1000
}

impl Default for ApnConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            gateway: None,
            feedback: None,
            certificate_path: None,
            ca_bundle: None,
            poll_timeout_ms: default_poll_timeout_ms(),
            max_attempts: None,
            oversized: OversizedPolicy::default(),
        }
    }
}

impl ApnConfig {
    /// Load from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("apn")
            .join("config.toml")
    }

    pub fn gateway_endpoint(&self) -> Endpoint {
        self.gateway
            .clone()
            .unwrap_or_else(|| Endpoint::gateway(self.environment))
    }

    pub fn feedback_endpoint(&self) -> Endpoint {
        self.feedback
            .clone()
            .unwrap_or_else(|| Endpoint::feedback(self.environment))
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}
