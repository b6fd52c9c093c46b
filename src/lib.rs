//! Smart-home ingestion core
//!
//! Routes MQTT traffic from a fleet of home devices and sensors into storage,
//! keeps the broker subscription set aligned with the focused home, and
//! publishes control commands back to devices.
//!
//! # Overview
//!
//! - [`subscription`] - focus switching and subscription reconciliation
//! - [`routing`] - classification of inbound messages into sensor or device events
//! - [`ingest`] - persistence of readings, activity logs and notifications
//! - [`commands`] - outbound device commands and their stored side effects
//! - [`transport`] - broker abstraction and the MQTT client
//! - [`storage`] - the persistence boundary with SQLite and in-memory stores
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use smarthome_ingest::{Focus, ServiceConfig, SmartHomeService};
//! use std::path::Path;
//!
//! # tokio_test::block_on(async {
//! let config = ServiceConfig::load_from_file(Path::new("smarthome.toml"))?;
//! let service = SmartHomeService::start(&config).await?;
//!
//! // Follow user 7's home 3
//! service.switch_focus(Focus::new(7, 3)).await?;
//!
//! // Turn a device off
//! service.commands().manual_control(12, false).await?;
//!
//! service.shutdown().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod commands;
pub mod config;
pub mod domain;
pub mod error;
pub mod ingest;
pub mod observability;
pub mod routing;
pub mod service;
pub mod storage;
pub mod subscription;
pub mod testing;
pub mod transport;

pub use commands::{DeviceCommand, DeviceCommandService};
pub use config::{ConfigError, ServiceConfig};
pub use domain::Focus;
pub use error::{IngestError, IngestResult};
pub use service::SmartHomeService;
pub use storage::{MemoryStore, SqliteStore, Store};
pub use transport::mqtt::MqttClient;
pub use transport::Broker;
