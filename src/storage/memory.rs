//! In-memory store
//!
//! Backs the `memory` storage backend and the test suite. Tables are plain
//! vectors behind one tokio mutex; identifiers are generated per table.

use super::{StorageError, StorageResult, Store};
use crate::domain::{
    ControlMode, DeviceId, DeviceRecord, Focus, HomeId, NewActivityLog, NewNotification,
    NewSensorReading, RoomId, SensorId, SensorKind, SensorProfile, Stored, Topic, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Sensor row as seeded into the store
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSeed {
    pub id: SensorId,
    pub name: String,
    pub display_type: String,
    pub topic: Topic,
    pub edge: Option<String>,
    pub home_id: HomeId,
    pub room_id: Option<RoomId>,
}

impl SensorSeed {
    pub fn new(id: SensorId, name: &str, display_type: &str, topic: &str, home_id: HomeId) -> Self {
        Self {
            id,
            name: name.to_string(),
            display_type: display_type.to_string(),
            topic: topic.to_string(),
            edge: None,
            home_id,
            room_id: None,
        }
    }

    pub fn with_edge(mut self, edge: &str) -> Self {
        self.edge = Some(edge.to_string());
        self
    }

    pub fn in_room(mut self, room_id: RoomId) -> Self {
        self.room_id = Some(room_id);
        self
    }
}

/// A mode assignment: the Mode row plus its ModeDevice link
#[derive(Debug, Clone, PartialEq)]
pub struct ModeAssignment {
    pub device_id: DeviceId,
    pub mode: ControlMode,
    pub user_id: UserId,
    pub time: DateTime<Utc>,
}

#[derive(Default)]
struct Tables {
    homes: HashMap<HomeId, UserId>,
    devices: Vec<DeviceRecord>,
    sensors: Vec<SensorSeed>,
    device_parameters: HashMap<DeviceId, String>,
    modes: Vec<Stored<ModeAssignment>>,
    current_modes: HashMap<DeviceId, ControlMode>,
    readings: Vec<Stored<NewSensorReading>>,
    activity_logs: Vec<Stored<NewActivityLog>>,
    notifications: Vec<Stored<NewNotification>>,
}

fn next_id<T>(rows: &[Stored<T>]) -> i64 {
    rows.last().map_or(1, |row| row.id + 1)
}

/// In-memory implementation of [`Store`]
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    fail_writes: Arc<AtomicBool>,
    fail_focus_lookups: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_home(&self, home_id: HomeId, owner: UserId) {
        self.tables.lock().await.homes.insert(home_id, owner);
    }

    pub async fn add_device(&self, device: DeviceRecord) {
        self.tables.lock().await.devices.push(device);
    }

    pub async fn add_sensor(&self, sensor: SensorSeed) {
        self.tables.lock().await.sensors.push(sensor);
    }

    /// Make every subsequent write fail, to exercise persistence error paths
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make focus topic lookups fail
    pub fn set_fail_focus_lookups(&self, fail: bool) {
        self.fail_focus_lookups.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes since creation
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn readings(&self) -> Vec<Stored<NewSensorReading>> {
        self.tables.lock().await.readings.clone()
    }

    pub async fn activity_logs(&self) -> Vec<Stored<NewActivityLog>> {
        self.tables.lock().await.activity_logs.clone()
    }

    pub async fn notifications(&self) -> Vec<Stored<NewNotification>> {
        self.tables.lock().await.notifications.clone()
    }

    pub async fn mode_history(&self) -> Vec<Stored<ModeAssignment>> {
        self.tables.lock().await.modes.clone()
    }

    pub async fn sensor_edge(&self, sensor_id: SensorId) -> Option<String> {
        let tables = self.tables.lock().await;
        tables
            .sensors
            .iter()
            .find(|sensor| sensor.id == sensor_id)
            .and_then(|sensor| sensor.edge.clone())
    }

    pub async fn device_parameter(&self, device_id: DeviceId) -> Option<String> {
        self.tables
            .lock()
            .await
            .device_parameters
            .get(&device_id)
            .cloned()
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(
                "writes disabled for this store".to_string(),
            ));
        }
        Ok(())
    }

    fn count_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_sensor_by_topic(&self, topic: &str) -> StorageResult<Option<SensorId>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .sensors
            .iter()
            .find(|sensor| sensor.topic == topic)
            .map(|sensor| sensor.id))
    }

    async fn find_device_by_topic(&self, topic: &str) -> StorageResult<Option<DeviceRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .devices
            .iter()
            .find(|device| device.topic == topic)
            .cloned())
    }

    async fn find_device_by_type(&self, device_type: &str) -> StorageResult<Option<DeviceRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .devices
            .iter()
            .filter(|device| device.device_type == device_type)
            .min_by_key(|device| device.id)
            .cloned())
    }

    async fn find_device(&self, device_id: DeviceId) -> StorageResult<Option<DeviceRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .devices
            .iter()
            .find(|device| device.id == device_id)
            .cloned())
    }

    async fn sensor_profile(&self, sensor_id: SensorId) -> StorageResult<Option<SensorProfile>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .sensors
            .iter()
            .find(|sensor| sensor.id == sensor_id)
            .map(|sensor| SensorProfile {
                id: sensor.id,
                name: sensor.name.clone(),
                display_type: sensor.display_type.clone(),
                edge: sensor.edge.clone(),
                owner: tables.homes.get(&sensor.home_id).copied(),
            }))
    }

    async fn focus_topics(&self, focus: Focus) -> StorageResult<Vec<Topic>> {
        if self.fail_focus_lookups.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(
                "focus lookups disabled for this store".to_string(),
            ));
        }
        let tables = self.tables.lock().await;
        if tables.homes.get(&focus.home_id) != Some(&focus.user_id) {
            return Ok(Vec::new());
        }

        let devices = tables
            .devices
            .iter()
            .filter(|device| device.home_id == focus.home_id)
            .map(|device| device.topic.clone());
        let sensors = tables
            .sensors
            .iter()
            .filter(|sensor| sensor.home_id == focus.home_id)
            .map(|sensor| sensor.topic.clone());
        Ok(devices.chain(sensors).collect())
    }

    async fn home_owner(&self, home_id: HomeId) -> StorageResult<Option<UserId>> {
        Ok(self.tables.lock().await.homes.get(&home_id).copied())
    }

    async fn current_mode(&self, device_id: DeviceId) -> StorageResult<Option<ControlMode>> {
        Ok(self
            .tables
            .lock()
            .await
            .current_modes
            .get(&device_id)
            .copied())
    }

    async fn record_mode(
        &self,
        device_id: DeviceId,
        mode: ControlMode,
        user_id: UserId,
        time: DateTime<Utc>,
    ) -> StorageResult<i64> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        let id = next_id(&tables.modes);
        tables.modes.push(Stored {
            id,
            record: ModeAssignment {
                device_id,
                mode,
                user_id,
                time,
            },
        });
        tables.current_modes.insert(device_id, mode);
        self.count_write();
        Ok(id)
    }

    async fn insert_sensor_reading(&self, reading: &NewSensorReading) -> StorageResult<i64> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        let id = next_id(&tables.readings);
        tables.readings.push(Stored {
            id,
            record: reading.clone(),
        });
        self.count_write();
        Ok(id)
    }

    async fn insert_activity_log(&self, entry: &NewActivityLog) -> StorageResult<i64> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        let id = next_id(&tables.activity_logs);
        tables.activity_logs.push(Stored {
            id,
            record: entry.clone(),
        });
        self.count_write();
        Ok(id)
    }

    async fn insert_notification(&self, notification: &NewNotification) -> StorageResult<i64> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        let id = next_id(&tables.notifications);
        tables.notifications.push(Stored {
            id,
            record: notification.clone(),
        });
        self.count_write();
        Ok(id)
    }

    async fn find_sensor_for_device(
        &self,
        home_id: HomeId,
        room_id: Option<RoomId>,
        kind: SensorKind,
    ) -> StorageResult<Option<SensorId>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .sensors
            .iter()
            .find(|sensor| {
                sensor.home_id == home_id
                    && sensor.room_id == room_id
                    && sensor.name == kind.canonical_name()
            })
            .map(|sensor| sensor.id))
    }

    async fn update_sensor_edge(&self, sensor_id: SensorId, edge: &str) -> StorageResult<()> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        let sensor = tables
            .sensors
            .iter_mut()
            .find(|sensor| sensor.id == sensor_id)
            .ok_or_else(|| StorageError::InvalidData(format!("sensor {sensor_id} does not exist")))?;
        sensor.edge = Some(edge.to_string());
        self.count_write();
        Ok(())
    }

    async fn update_device_parameter(
        &self,
        device_id: DeviceId,
        value: &str,
    ) -> StorageResult<()> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        if !tables.devices.iter().any(|device| device.id == device_id) {
            return Err(StorageError::InvalidData(format!(
                "device {device_id} does not exist"
            )));
        }
        tables
            .device_parameters
            .insert(device_id, value.to_string());
        self.count_write();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: DeviceId, device_type: &str, topic: &str, home_id: HomeId) -> DeviceRecord {
        DeviceRecord {
            id,
            name: format!("device-{id}"),
            device_type: device_type.to_string(),
            topic: topic.to_string(),
            home_id,
            room_id: Some(1),
        }
    }

    #[tokio::test]
    async fn test_focus_topics_require_ownership() {
        let store = MemoryStore::new();
        store.add_home(1, 10).await;
        store.add_device(device(1, "Led", "d1", 1)).await;
        store
            .add_sensor(SensorSeed::new(1, "Light Sensor", "Light", "s1", 1))
            .await;

        let topics = store.focus_topics(Focus::new(10, 1)).await.unwrap();
        assert_eq!(topics, vec!["d1".to_string(), "s1".to_string()]);

        let topics = store.focus_topics(Focus::new(11, 1)).await.unwrap();
        assert!(topics.is_empty());
    }

    #[tokio::test]
    async fn test_record_mode_updates_projection() {
        let store = MemoryStore::new();
        store.add_device(device(4, "Mini fan", "fan-key", 1)).await;
        assert_eq!(store.current_mode(4).await.unwrap(), None);

        store
            .record_mode(4, ControlMode::Auto, 10, Utc::now())
            .await
            .unwrap();
        store
            .record_mode(4, ControlMode::Schedule, 10, Utc::now())
            .await
            .unwrap();

        assert_eq!(
            store.current_mode(4).await.unwrap(),
            Some(ControlMode::Schedule)
        );
        assert_eq!(store.mode_history().await.len(), 2);
    }

    #[tokio::test]
    async fn test_find_device_by_type_picks_lowest_id() {
        let store = MemoryStore::new();
        store.add_device(device(9, "Door", "door-b", 1)).await;
        store.add_device(device(3, "Door", "door-a", 2)).await;

        let found = store.find_device_by_type("Door").await.unwrap().unwrap();
        assert_eq!(found.id, 3);
        assert!(store.find_device_by_type("Kettle").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fail_writes() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        let reading = NewSensorReading {
            sensor_id: 1,
            time: Utc::now(),
            value: crate::domain::ReadingValue::Number(1.0),
        };
        assert!(matches!(
            store.insert_sensor_reading(&reading).await,
            Err(StorageError::Unavailable(_))
        ));
        assert_eq!(store.write_count(), 0);

        store.set_fail_writes(false);
        assert_eq!(store.insert_sensor_reading(&reading).await.unwrap(), 1);
        assert_eq!(store.insert_sensor_reading(&reading).await.unwrap(), 2);
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_find_sensor_for_device_matches_room() {
        let store = MemoryStore::new();
        store
            .add_sensor(
                SensorSeed::new(5, "Temperature Sensor", "Temperature", "t-1", 1).in_room(2),
            )
            .await;

        let found = store
            .find_sensor_for_device(1, Some(2), SensorKind::Temperature)
            .await
            .unwrap();
        assert_eq!(found, Some(5));

        let other_room = store
            .find_sensor_for_device(1, Some(3), SensorKind::Temperature)
            .await
            .unwrap();
        assert_eq!(other_room, None);
    }
}
