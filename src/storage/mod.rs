//! Persistence boundary
//!
//! The core reads and writes device, sensor, reading, activity log, notification
//! and mode records through [`Store`]. It assumes nothing about the engine beyond
//! point lookups and inserts that return generated identifiers.

use crate::domain::{
    ControlMode, DeviceId, DeviceRecord, Focus, HomeId, NewActivityLog, NewNotification,
    NewSensorReading, RoomId, SensorId, SensorKind, SensorProfile, Topic, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod memory;
mod migrations;
pub mod sqlite;

pub use memory::{MemoryStore, SensorSeed};
pub use sqlite::SqliteStore;

/// Storage failures
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    #[error("Invalid stored data: {0}")]
    InvalidData(String),
    #[error("Schema migration failed: {0}")]
    Migration(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Storage interface used by routing, ingestion, reconciliation and commands
#[async_trait]
pub trait Store: Send + Sync {
    /// Sensor owning the given topic
    async fn find_sensor_by_topic(&self, topic: &str) -> StorageResult<Option<SensorId>>;

    /// Device owning the given topic
    async fn find_device_by_topic(&self, topic: &str) -> StorageResult<Option<DeviceRecord>>;

    /// First device with the given type label (static bring-up topics)
    async fn find_device_by_type(&self, device_type: &str) -> StorageResult<Option<DeviceRecord>>;

    async fn find_device(&self, device_id: DeviceId) -> StorageResult<Option<DeviceRecord>>;

    /// Name, type, edge threshold and owner of a sensor
    async fn sensor_profile(&self, sensor_id: SensorId) -> StorageResult<Option<SensorProfile>>;

    /// Device and sensor topics of the focused home, if the user owns it
    async fn focus_topics(&self, focus: Focus) -> StorageResult<Vec<Topic>>;

    async fn home_owner(&self, home_id: HomeId) -> StorageResult<Option<UserId>>;

    /// Most recently assigned mode, `None` when the device never had one
    async fn current_mode(&self, device_id: DeviceId) -> StorageResult<Option<ControlMode>>;

    /// Append a mode assignment and advance the current-mode projection atomically
    async fn record_mode(
        &self,
        device_id: DeviceId,
        mode: ControlMode,
        user_id: UserId,
        time: DateTime<Utc>,
    ) -> StorageResult<i64>;

    async fn insert_sensor_reading(&self, reading: &NewSensorReading) -> StorageResult<i64>;

    async fn insert_activity_log(&self, entry: &NewActivityLog) -> StorageResult<i64>;

    async fn insert_notification(&self, notification: &NewNotification) -> StorageResult<i64>;

    /// Sensor of the given kind installed in the same home and room as a device
    async fn find_sensor_for_device(
        &self,
        home_id: HomeId,
        room_id: Option<RoomId>,
        kind: SensorKind,
    ) -> StorageResult<Option<SensorId>>;

    async fn update_sensor_edge(&self, sensor_id: SensorId, edge: &str) -> StorageResult<()>;

    async fn update_device_parameter(&self, device_id: DeviceId, value: &str)
        -> StorageResult<()>;
}
