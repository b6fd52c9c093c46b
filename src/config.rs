//! Service configuration loaded from TOML
//!
//! Broker credentials may be given inline or through an environment variable;
//! environment variables are resolved when the MQTT options are built, not at load time.

use crate::domain::Focus;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Top-level configuration for the ingestion service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    #[serde(default)]
    pub service: ServiceSection,
    pub mqtt: MqttSection,
    pub storage: StorageSection,
    #[serde(default)]
    pub ingest: IngestSection,
    /// Focus activated at startup (optional)
    pub focus: Option<FocusSection>,
}

/// Service identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceSection {
    /// Prefix for the MQTT client id; a unique suffix is appended per connection
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
        }
    }
}

fn default_client_id() -> String {
    "smarthome-backend".to_string()
}

/// Broker transport protocol
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BrokerProtocol {
    Mqtt,
    Mqtts,
}

impl BrokerProtocol {
    pub fn default_port(self) -> u16 {
        match self {
            BrokerProtocol::Mqtt => 1883,
            BrokerProtocol::Mqtts => 8883,
        }
    }
}

/// MQTT broker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    pub host: String,
    /// Broker port (defaults to the protocol's well-known port)
    pub port: Option<u16>,
    #[serde(default = "default_protocol")]
    pub protocol: BrokerProtocol,
    pub username: Option<String>,
    /// Inline password; `password_env` takes precedence when the variable is set
    pub password: Option<String>,
    /// Environment variable containing the password
    pub password_env: Option<String>,
    /// Delay between reconnection attempts in milliseconds
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    /// Give up after this many failed reconnection attempts; unset retries forever
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Upper bound for a single subscribe, unsubscribe or publish call
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
}

fn default_protocol() -> BrokerProtocol {
    BrokerProtocol::Mqtts
}

fn default_reconnect_interval_ms() -> u64 {
    1000
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_operation_timeout_ms() -> u64 {
    5000
}

impl MqttSection {
    /// Effective broker port
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.protocol.default_port())
    }

    /// Resolve the broker password, preferring the environment variable
    pub fn resolve_password(&self) -> Option<String> {
        self.password_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
            .or_else(|| self.password.clone())
    }
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

/// Storage section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageSection {
    pub backend: StorageBackend,
    /// Database file path (sqlite backend only)
    pub path: Option<PathBuf>,
}

/// Ingestion worker tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestSection {
    /// Depth of the inbound message queue between the event loop and the worker
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for IngestSection {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_channel_capacity() -> usize {
    256
}

/// Startup focus
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FocusSection {
    pub user_id: i64,
    pub home_id: i64,
}

impl From<FocusSection> for Focus {
    fn from(section: FocusSection) -> Self {
        Focus::new(section.user_id, section.home_id)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ServiceConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.client_id.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "service.client_id must not be empty".to_string(),
            ));
        }
        if self.mqtt.host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "mqtt.host must not be empty".to_string(),
            ));
        }
        if self.mqtt.reconnect_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.reconnect_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.mqtt.max_reconnect_attempts == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "mqtt.max_reconnect_attempts must be greater than 0 or left unset".to_string(),
            ));
        }
        if self.mqtt.operation_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.operation_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.ingest.channel_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "ingest.channel_capacity must be greater than 0".to_string(),
            ));
        }
        if self.storage.backend == StorageBackend::Sqlite && self.storage.path.is_none() {
            return Err(ConfigError::InvalidConfig(
                "storage.path is required for the sqlite backend".to_string(),
            ));
        }
        Ok(())
    }

    /// Require the password environment variable to be present when one is configured
    pub fn require_password_env(&self) -> Result<(), ConfigError> {
        match &self.mqtt.password_env {
            Some(name) if std::env::var(name).is_err() && self.mqtt.password.is_none() => {
                Err(ConfigError::EnvVarNotFound(name.clone()))
            }
            _ => Ok(()),
        }
    }

    /// Copy of the configuration with secrets blanked, for display
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.mqtt.password.is_some() {
            copy.mqtt.password = Some("***".to_string());
        }
        copy
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[service]
client_id = "test-backend"

[mqtt]
host = "localhost"
protocol = "mqtt"

[storage]
backend = "memory"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}
