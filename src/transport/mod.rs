//! Transport layer for broker communication
//!
//! This module provides the broker abstraction used by the reconciler and the
//! command publisher, and its MQTT implementation.

use tokio::sync::watch;

pub mod mqtt;

pub use mqtt::{ConnectionState, MqttError};

/// A message delivered by the broker on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

/// Broker trait for publish/subscribe access
///
/// Abstracts over the live MQTT client so that reconciliation and command
/// publishing can be exercised against a recording mock.
#[async_trait::async_trait]
pub trait Broker: Send + Sync {
    /// Subscribe to a single topic; succeeds only once the broker accepted the request
    async fn subscribe(&self, topic: &str) -> Result<(), MqttError>;

    /// Unsubscribe from a single topic
    async fn unsubscribe(&self, topic: &str) -> Result<(), MqttError>;

    /// Publish a payload to a topic
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), MqttError>;

    /// Current connection state
    fn connection_state(&self) -> ConnectionState;

    /// Watch connection state transitions
    fn subscribe_state(&self) -> watch::Receiver<ConnectionState>;

    /// Check if the broker connection is currently usable
    fn is_connected(&self) -> bool {
        matches!(self.connection_state(), ConnectionState::Connected)
    }
}

/// Type alias for the MQTT broker transport
pub type MqttTransport = mqtt::MqttClient;
