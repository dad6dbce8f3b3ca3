//! Controller configuration
//!
//! Defaults match a daemon running locally. Values can come from a TOML file
//! and are then overridden by `NORTHSTAR_*` environment variables.

use northstar_shared::{protocol, UnknownCommandPolicy};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const ENV_HOST: &str = "NORTHSTAR_HOST";
pub const ENV_PORT: &str = "NORTHSTAR_PORT";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "NORTHSTAR_CONNECT_TIMEOUT_MS";
pub const ENV_EXCHANGE_TIMEOUT_MS: &str = "NORTHSTAR_EXCHANGE_TIMEOUT_MS";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },
}

/// Configuration for the command controller
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
    /// Agent daemon host
    pub host: String,
    /// Agent daemon port
    pub port: u16,
    /// Connection timeout in milliseconds (0 = wait indefinitely)
    pub connect_timeout_ms: u64,
    /// Whole-exchange timeout in milliseconds (0 = wait indefinitely)
    pub exchange_timeout_ms: u64,
    /// Handling of by-name commands with an unrecognised action
    pub unknown_commands: UnknownCommandPolicy,
    /// Exchange events buffered per subscriber before it starts lagging
    pub event_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            host: protocol::DEFAULT_HOST.into(),
            port: protocol::DEFAULT_PORT,
            connect_timeout_ms: protocol::CONNECT_TIMEOUT_MS,
            exchange_timeout_ms: protocol::EXCHANGE_TIMEOUT_MS,
            unknown_commands: UnknownCommandPolicy::default(),
            event_capacity: 256,
        }
    }
}

fn millis(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_millis(value))
}

impl ControllerConfig {
    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load a TOML config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Apply `NORTHSTAR_*` overrides from the process environment
    pub fn with_env(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_HOST) {
            self.host = host;
        }
        if let Some(value) = lookup(ENV_PORT) {
            self.port = parse_env(ENV_PORT, value)?;
        }
        if let Some(value) = lookup(ENV_CONNECT_TIMEOUT_MS) {
            self.connect_timeout_ms = parse_env(ENV_CONNECT_TIMEOUT_MS, value)?;
        }
        if let Some(value) = lookup(ENV_EXCHANGE_TIMEOUT_MS) {
            self.exchange_timeout_ms = parse_env(ENV_EXCHANGE_TIMEOUT_MS, value)?;
        }
        Ok(self)
    }

    /// `host:port` of the agent daemon
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        millis(self.connect_timeout_ms)
    }

    pub fn exchange_timeout(&self) -> Option<Duration> {
        millis(self.exchange_timeout_ms)
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { key, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.address(), "127.0.0.1:7777");
        assert_eq!(config.connect_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.exchange_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.unknown_commands, UnknownCommandPolicy::Reject);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ControllerConfig::from_toml_str(
            r#"
            host = "10.0.0.5"
            exchange_timeout_ms = 0
            unknown_commands = "passthrough"
            "#,
        )
        .expect("config should parse");

        assert_eq!(config.address(), "10.0.0.5:7777");
        assert_eq!(config.exchange_timeout(), None);
        assert_eq!(config.unknown_commands, UnknownCommandPolicy::Passthrough);
        assert_eq!(config.connect_timeout_ms, protocol::CONNECT_TIMEOUT_MS);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let result = ControllerConfig::from_toml_str("hots = \"typo\"");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [(ENV_PORT, "9000"), (ENV_CONNECT_TIMEOUT_MS, "250")]
            .into_iter()
            .collect();

        let config = ControllerConfig::default()
            .with_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.connect_timeout(), Some(Duration::from_millis(250)));

        let err = ControllerConfig::default()
            .with_overrides(|key| (key == ENV_PORT).then(|| "seventy".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { key: ENV_PORT, .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = ControllerConfig::load(Path::new("/nonexistent/northstar.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
