//! MQTT client implementation for the smart-home broker
//!
//! This module separates pure functions from I/O operations.
//!
//! # Architecture
//!
//! - [`acks`] - Matching broker acknowledgements to pending requests
//! - [`connection`] - Pure connection state, reconnect policy and option building
//! - [`message_handler`] - Pure event routing and the inbound forwarder
//! - [`health_monitor`] - Pure reconnection decisions and state transitions
//! - [`client`] - Impure I/O operations and coordination
//!
//! # Usage
//!
//! ```rust,no_run
//! use smarthome_ingest::config::ServiceConfig;
//! use smarthome_ingest::transport::mqtt::MqttClient;
//! use smarthome_ingest::transport::Broker;
//! use std::path::Path;
//!
//! # tokio_test::block_on(async {
//! let config = ServiceConfig::load_from_file(Path::new("smarthome.toml"))?;
//! let (inbound_tx, _inbound_rx) = tokio::sync::mpsc::channel(256);
//!
//! let client = MqttClient::new(&config.service.client_id, config.mqtt.clone(), inbound_tx)?;
//! client.connect().await?;
//! client.subscribe("a1b2c3").await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod acks;
pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

pub use acks::{AckKind, AckOutcome, AckTracker};
pub use client::MqttClient;
pub use connection::{configure_mqtt_options, ConnectionState, MqttError, ReconnectConfig};
pub use health_monitor::{
    ConnectionEvent, HealthMonitor, LinkTransition, ReconnectionDecision,
};
pub use message_handler::{EventRoute, MessageForwarder, MessageHandler};
