//! Pure connection state management for the MQTT client
//!
//! Connection state, reconnect policy, transport errors and option building live
//! here so they can be tested without a broker.

use crate::config::{BrokerProtocol, MqttSection};
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Connection state for the MQTT client
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// No connection has been requested yet
    Idle,
    /// Waiting for the broker's ConnAck
    Connecting,
    /// Connected and ready for operations
    Connected,
    /// Disconnected with reason
    Disconnected(String),
    /// Waiting to retry the connection (attempt count)
    Reconnecting(u32),
    /// Reconnection budget exhausted
    PermanentlyDisconnected(String),
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => f.write_str("idle"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Disconnected(reason) => write!(f, "disconnected ({reason})"),
            ConnectionState::Reconnecting(attempt) => write!(f, "reconnecting (attempt {attempt})"),
            ConnectionState::PermanentlyDisconnected(reason) => {
                write!(f, "permanently disconnected ({reason})")
            }
        }
    }
}

/// Reconnection policy
///
/// The broker connection is retried at a fixed interval; `max_attempts` of `None`
/// retries forever.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    pub max_attempts: Option<u32>,
    pub interval_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            interval_ms: 1000,
        }
    }
}

impl ReconnectConfig {
    pub fn from_section(config: &MqttSection) -> Self {
        Self {
            max_attempts: config.max_reconnect_attempts,
            interval_ms: config.reconnect_interval_ms,
        }
    }

    /// Maximum total time spent waiting across all attempts, if bounded
    pub fn calculate_max_total_time(&self) -> Option<u64> {
        self.max_attempts
            .map(|max_attempts| u64::from(max_attempts) * self.interval_ms)
    }

    /// Delay before the given attempt
    pub fn calculate_backoff_delay(&self, _attempt: u32) -> u64 {
        self.interval_ms
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Publishing to '{topic}' failed: {reason}")]
    PublishFailed { topic: String, reason: String },
    #[error("Subscribing to '{topic}' failed: {reason}")]
    SubscribeFailed { topic: String, reason: String },
    #[error("Unsubscribing from '{topic}' failed: {reason}")]
    UnsubscribeFailed { topic: String, reason: String },
    #[error("{operation} on '{topic}' timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        topic: String,
        timeout_ms: u64,
    },
    #[error("Serialization error")]
    SerializationError(#[source] serde_json::Error),
    #[error("Invalid broker configuration: {0}")]
    InvalidConfig(String),
    #[error("Not connected - current state: {state}")]
    NotConnected { state: ConnectionState },
}

impl MqttError {
    /// Topic the failed operation targeted, if any
    pub fn topic(&self) -> Option<&str> {
        match self {
            MqttError::PublishFailed { topic, .. }
            | MqttError::SubscribeFailed { topic, .. }
            | MqttError::UnsubscribeFailed { topic, .. }
            | MqttError::Timeout { topic, .. } => Some(topic),
            _ => None,
        }
    }
}

/// Build a unique client id for one connection attempt
pub fn build_client_id(prefix: &str) -> Result<String, MqttError> {
    let prefix = prefix.trim();
    if prefix.is_empty() {
        return Err(MqttError::InvalidConfig(
            "client id prefix must not be empty".to_string(),
        ));
    }
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    Ok(format!("{prefix}-{}", &suffix[..8]))
}

/// Build MQTT options from the broker section
pub fn configure_mqtt_options(
    client_id_prefix: &str,
    config: &MqttSection,
) -> Result<MqttOptions, MqttError> {
    let host = config.host.trim();
    if host.is_empty() {
        return Err(MqttError::InvalidConfig(
            "broker host must not be empty".to_string(),
        ));
    }

    let client_id = build_client_id(client_id_prefix)?;
    let mut mqtt_options = MqttOptions::new(client_id, host, config.port());

    if config.protocol == BrokerProtocol::Mqtts {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = &config.username {
        let password = config.resolve_password().unwrap_or_default();
        mqtt_options.set_credentials(username, &password);
    }

    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    mqtt_options.set_clean_start(true);

    Ok(mqtt_options)
}
