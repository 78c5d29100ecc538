//! Configuration management for peerchat.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/peerchat/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use protocol::negotiate::is_valid_protocol_id;
use protocol::{User, CHAT_PROTOCOL};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("connect_timeout_secs must be between 1 and 300, got {0}")]
    InvalidConnectTimeout(u64),

    #[error("negotiate_timeout_secs must be between 1 and 300, got {0}")]
    InvalidNegotiateTimeout(u64),

    #[error("protocol must start with '/' and contain no control characters, got {0:?}")]
    InvalidProtocol(String),

    #[error("user name must not be empty")]
    EmptyUserName,

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Allowed range for timeouts, in seconds.
const TIMEOUT_RANGE_SECS: std::ops::RangeInclusive<u64> = 1..=300;

/// Main configuration structure for a chat peer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Endpoint and session settings.
    pub network: NetworkConfig,

    /// Identity shown to the remote peer.
    pub user: UserConfig,

    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Endpoint and session settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// UDP port to listen on (0 picks any free port).
    pub port: u16,

    /// Use relay servers and discovery for NAT traversal.
    pub relay_enabled: bool,

    /// Timeout for establishing the QUIC connection.
    pub connect_timeout_secs: u64,

    /// Timeout for opening the chat stream and negotiating the sub-protocol.
    pub negotiate_timeout_secs: u64,

    /// Sub-protocol identifier both peers must agree on.
    pub protocol: String,
}

/// Local user metadata attached to outgoing messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UserConfig {
    /// Display name.
    pub name: String,

    /// Opaque user id.
    pub id: String,

    /// Opaque pass-through value, never checked by anyone.
    pub password_hash: String,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: 0,
            relay_enabled: false,
            connect_timeout_secs: 30,
            negotiate_timeout_secs: 10,
            protocol: CHAT_PROTOCOL.to_string(),
        }
    }
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            name: "User".to_string(),
            id: "abc".to_string(),
            password_hash: "0".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl NetworkConfig {
    /// Connection timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Negotiation timeout as a [`Duration`].
    pub fn negotiate_timeout(&self) -> Duration {
        Duration::from_secs(self.negotiate_timeout_secs)
    }
}

impl UserConfig {
    /// Builds the envelope user for outgoing messages.
    pub fn to_user(&self) -> User {
        User::new(&self.name, &self.id, &self.password_hash)
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("peerchat")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - PEERCHAT_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - PEERCHAT_USER_NAME: Override the display name
    /// - PEERCHAT_PORT: Override the listening port
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("PEERCHAT_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.logging.log_level = level;
            }
        }

        if let Ok(name) = std::env::var("PEERCHAT_USER_NAME") {
            if !name.is_empty() {
                tracing::info!("Overriding user name from environment: {}", name);
                self.user.name = name;
            }
        }

        if let Ok(port) = std::env::var("PEERCHAT_PORT") {
            if !port.is_empty() {
                match port.parse::<u16>() {
                    Ok(port) => {
                        tracing::info!("Overriding port from environment: {}", port);
                        self.network.port = port;
                    }
                    Err(e) => {
                        tracing::warn!("Ignoring invalid PEERCHAT_PORT {:?}: {}", port, e);
                    }
                }
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !TIMEOUT_RANGE_SECS.contains(&self.network.connect_timeout_secs) {
            return Err(ConfigError::InvalidConnectTimeout(
                self.network.connect_timeout_secs,
            ));
        }

        if !TIMEOUT_RANGE_SECS.contains(&self.network.negotiate_timeout_secs) {
            return Err(ConfigError::InvalidNegotiateTimeout(
                self.network.negotiate_timeout_secs,
            ));
        }

        if !is_valid_protocol_id(&self.network.protocol) {
            return Err(ConfigError::InvalidProtocol(self.network.protocol.clone()));
        }

        if self.user.name.trim().is_empty() {
            return Err(ConfigError::EmptyUserName);
        }

        let level = self.logging.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
