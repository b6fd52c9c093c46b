//! SQLite store
//!
//! All database work runs on one dedicated thread that owns the connection.
//! Callers send boxed tasks over a channel and await the result on a oneshot.

use super::migrations::run_migrations;
use super::{StorageError, StorageResult, Store};
use crate::domain::{
    ControlMode, DeviceId, DeviceRecord, Focus, HomeId, NewActivityLog, NewNotification,
    NewSensorReading, NotificationTarget, RoomId, SensorId, SensorKind, SensorProfile, Topic,
    UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use tokio::sync::oneshot;
use tracing::{error, info};

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct StoreInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to storage thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join storage thread: {join_err:?}");
            }
        }
    }
}

const DEVICE_COLUMNS: &str = "ID, DName, DType, APIKey, HomeID, RoomID";

fn device_from_row(row: &Row<'_>) -> rusqlite::Result<DeviceRecord> {
    Ok(DeviceRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        device_type: row.get(2)?,
        topic: row.get(3)?,
        home_id: row.get(4)?,
        room_id: row.get(5)?,
    })
}

/// SQLite implementation of [`Store`]
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<StoreInner>,
    db_path: Arc<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) the database and bring its schema up to date
    pub fn open(db_path: PathBuf) -> StorageResult<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<StorageResult<()>>();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("smarthome-db".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(StorageError::Sqlite(err)));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }
                if let Err(err) = conn.pragma_update(None, "foreign_keys", "ON") {
                    error!("Failed to enable foreign keys: {err}");
                }

                let init_result = run_migrations(&mut conn);
                let init_failed = init_result.is_err();
                if ready_tx.send(init_result).is_err() || init_failed {
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => task(&mut conn),
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Storage thread shutting down");
            })?;

        ready_rx.recv().map_err(|_| {
            StorageError::Unavailable("storage thread exited before signaling readiness".to_string())
        })??;

        info!(path = %db_path.display(), "SQLite store initialized");

        Ok(Self {
            inner: Arc::new(StoreInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    /// Run a task on the storage thread
    pub async fn execute<F, T>(&self, task: F) -> StorageResult<T>
    where
        F: FnOnce(&mut Connection) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("Storage caller dropped before receiving result");
            }
        }));

        self.inner.sender.send(command).map_err(|err| {
            StorageError::Unavailable(format!("failed to send command to storage thread: {err}"))
        })?;

        reply_rx.await.map_err(|_| {
            StorageError::Unavailable("storage thread terminated unexpectedly".to_string())
        })?
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn find_sensor_by_topic(&self, topic: &str) -> StorageResult<Option<SensorId>> {
        let topic = topic.to_string();
        self.execute(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT ID FROM Sensors WHERE APIKey = ?1",
                    params![topic],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }

    async fn find_device_by_topic(&self, topic: &str) -> StorageResult<Option<DeviceRecord>> {
        let topic = topic.to_string();
        self.execute(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {DEVICE_COLUMNS} FROM Device WHERE APIKey = ?1"),
                    params![topic],
                    device_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn find_device_by_type(&self, device_type: &str) -> StorageResult<Option<DeviceRecord>> {
        let device_type = device_type.to_string();
        self.execute(move |conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {DEVICE_COLUMNS} FROM Device WHERE DType = ?1 ORDER BY ID LIMIT 1"
                    ),
                    params![device_type],
                    device_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn find_device(&self, device_id: DeviceId) -> StorageResult<Option<DeviceRecord>> {
        self.execute(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {DEVICE_COLUMNS} FROM Device WHERE ID = ?1"),
                    params![device_id],
                    device_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn sensor_profile(&self, sensor_id: SensorId) -> StorageResult<Option<SensorProfile>> {
        self.execute(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT s.ID, s.SName, s.SType, s.DataEdge, h.UserID
                     FROM Sensors s
                     LEFT JOIN Home h ON s.HomeID = h.ID
                     WHERE s.ID = ?1",
                    params![sensor_id],
                    |row| {
                        Ok(SensorProfile {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            display_type: row.get(2)?,
                            edge: row.get(3)?,
                            owner: row.get(4)?,
                        })
                    },
                )
                .optional()?)
        })
        .await
    }

    async fn focus_topics(&self, focus: Focus) -> StorageResult<Vec<Topic>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT d.APIKey FROM Device d
                 JOIN Home h ON d.HomeID = h.ID
                 WHERE d.HomeID = ?1 AND h.UserID = ?2
                 UNION ALL
                 SELECT s.APIKey FROM Sensors s
                 JOIN Home h ON s.HomeID = h.ID
                 WHERE s.HomeID = ?1 AND h.UserID = ?2",
            )?;
            let topics = stmt
                .query_map(params![focus.home_id, focus.user_id], |row| row.get(0))?
                .collect::<Result<Vec<Topic>, _>>()?;
            Ok(topics)
        })
        .await
    }

    async fn home_owner(&self, home_id: HomeId) -> StorageResult<Option<UserId>> {
        self.execute(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT UserID FROM Home WHERE ID = ?1",
                    params![home_id],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }

    async fn current_mode(&self, device_id: DeviceId) -> StorageResult<Option<ControlMode>> {
        let label: Option<String> = self
            .execute(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT m.MType FROM DeviceCurrentMode c
                         JOIN Mode m ON m.ID = c.ModeID
                         WHERE c.DeviceID = ?1",
                        params![device_id],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;

        label
            .map(|label| {
                ControlMode::parse(&label).ok_or_else(|| {
                    StorageError::InvalidData(format!(
                        "device {device_id} has unknown mode '{label}'"
                    ))
                })
            })
            .transpose()
    }

    async fn record_mode(
        &self,
        device_id: DeviceId,
        mode: ControlMode,
        user_id: UserId,
        time: DateTime<Utc>,
    ) -> StorageResult<i64> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO Mode (MType, MTime, UserID) VALUES (?1, ?2, ?3)",
                params![mode.as_str(), time.to_rfc3339(), user_id],
            )?;
            let mode_id = tx.last_insert_rowid();
            tx.execute(
                "INSERT INTO ModeDevice (ModeID, DeviceID) VALUES (?1, ?2)",
                params![mode_id, device_id],
            )?;
            tx.execute(
                "INSERT INTO DeviceCurrentMode (DeviceID, ModeID) VALUES (?1, ?2)
                 ON CONFLICT(DeviceID) DO UPDATE SET ModeID = excluded.ModeID",
                params![device_id, mode_id],
            )?;
            tx.commit()?;
            Ok(mode_id)
        })
        .await
    }

    async fn insert_sensor_reading(&self, reading: &NewSensorReading) -> StorageResult<i64> {
        let reading = reading.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO SensorData (STime, DataType, NumData, TextData, SensorID)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    reading.time.to_rfc3339(),
                    reading.value.data_type().as_str(),
                    reading.value.num_data(),
                    reading.value.text_data(),
                    reading.sensor_id,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn insert_activity_log(&self, entry: &NewActivityLog) -> StorageResult<i64> {
        let entry = entry.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO ActivityLog (AMode, ADescription, ATime, DeviceID)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    entry.mode_label(),
                    entry.status.as_str(),
                    entry.time.to_rfc3339(),
                    entry.device_id,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn insert_notification(&self, notification: &NewNotification) -> StorageResult<i64> {
        let notification = notification.clone();
        self.execute(move |conn| {
            let (sensor_id, device_id) = match notification.target {
                NotificationTarget::Sensor(id) => (Some(id), None),
                NotificationTarget::Device(id) => (None, Some(id)),
            };
            conn.execute(
                "INSERT INTO Notification (Message, NTime, UserID, SensorID, DeviceID, NType, isRead)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    notification.message,
                    notification.time.to_rfc3339(),
                    notification.user_id,
                    sensor_id,
                    device_id,
                    notification.target.kind(),
                    notification.is_read,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn find_sensor_for_device(
        &self,
        home_id: HomeId,
        room_id: Option<RoomId>,
        kind: SensorKind,
    ) -> StorageResult<Option<SensorId>> {
        self.execute(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT ID FROM Sensors
                     WHERE SName = ?1 AND HomeID = ?2 AND RoomID IS ?3
                     ORDER BY ID LIMIT 1",
                    params![kind.canonical_name(), home_id, room_id],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }

    async fn update_sensor_edge(&self, sensor_id: SensorId, edge: &str) -> StorageResult<()> {
        let edge = edge.to_string();
        self.execute(move |conn| {
            let updated = conn.execute(
                "UPDATE Sensors SET DataEdge = ?1 WHERE ID = ?2",
                params![edge, sensor_id],
            )?;
            if updated == 0 {
                return Err(StorageError::InvalidData(format!(
                    "sensor {sensor_id} does not exist"
                )));
            }
            Ok(())
        })
        .await
    }

    async fn update_device_parameter(
        &self,
        device_id: DeviceId,
        value: &str,
    ) -> StorageResult<()> {
        let value = value.to_string();
        self.execute(move |conn| {
            let updated = conn.execute(
                "UPDATE Device SET Parameter = ?1 WHERE ID = ?2",
                params![value, device_id],
            )?;
            if updated == 0 {
                return Err(StorageError::InvalidData(format!(
                    "device {device_id} does not exist"
                )));
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DeviceStatus, ReadingValue};
    use tempfile::TempDir;

    async fn seeded_store() -> (SqliteStore, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("smarthome.db")).unwrap();
        store
            .execute(|conn| {
                conn.execute_batch(
                    "INSERT INTO Home (ID, UserID, HName) VALUES (1, 10, 'Home');
                     INSERT INTO Room (ID, HomeID, RName) VALUES (1, 1, 'Living');
                     INSERT INTO Device (ID, DName, DType, APIKey, HomeID, RoomID)
                         VALUES (1, 'Ceiling fan', 'Mini fan', 'd1', 1, 1);
                     INSERT INTO Sensors (ID, SName, SType, APIKey, DataEdge, HomeID, RoomID)
                         VALUES (1, 'Temperature Sensor', 'Temperature', 's1', '30', 1, 1);",
                )?;
                Ok(())
            })
            .await
            .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_lookups() {
        let (store, _dir) = seeded_store().await;

        assert_eq!(store.find_sensor_by_topic("s1").await.unwrap(), Some(1));
        assert_eq!(store.find_sensor_by_topic("nope").await.unwrap(), None);

        let device = store.find_device_by_topic("d1").await.unwrap().unwrap();
        assert_eq!(device.name, "Ceiling fan");
        assert_eq!(device.room_id, Some(1));

        let profile = store.sensor_profile(1).await.unwrap().unwrap();
        assert_eq!(profile.display_type, "Temperature");
        assert_eq!(profile.edge_threshold(), Some(30.0));
        assert_eq!(profile.owner, Some(10));

        let mut topics = store.focus_topics(Focus::new(10, 1)).await.unwrap();
        topics.sort();
        assert_eq!(topics, vec!["d1".to_string(), "s1".to_string()]);
        assert!(store.focus_topics(Focus::new(11, 1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reading_columns_match_type() {
        let (store, _dir) = seeded_store().await;
        let now = Utc::now();

        store
            .insert_sensor_reading(&NewSensorReading {
                sensor_id: 1,
                time: now,
                value: ReadingValue::Number(35.0),
            })
            .await
            .unwrap();
        store
            .insert_sensor_reading(&NewSensorReading {
                sensor_id: 1,
                time: now,
                value: ReadingValue::Text("door open".to_string()),
            })
            .await
            .unwrap();

        let rows = store
            .execute(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT DataType, NumData, TextData FROM SensorData ORDER BY ID",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, Option<f64>>(1)?,
                            row.get::<_, Option<String>>(2)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .unwrap();

        assert_eq!(rows[0], ("Number".to_string(), Some(35.0), None));
        assert_eq!(
            rows[1],
            ("Text".to_string(), None, Some("door open".to_string()))
        );
    }

    #[tokio::test]
    async fn test_mode_projection_follows_latest_assignment() {
        let (store, _dir) = seeded_store().await;
        assert_eq!(store.current_mode(1).await.unwrap(), None);

        store
            .record_mode(1, ControlMode::Manual, 10, Utc::now())
            .await
            .unwrap();
        store
            .record_mode(1, ControlMode::Auto, 10, Utc::now())
            .await
            .unwrap();
        assert_eq!(store.current_mode(1).await.unwrap(), Some(ControlMode::Auto));

        let history: i64 = store
            .execute(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM ModeDevice WHERE DeviceID = 1",
                    [],
                    |row| row.get(0),
                )?)
            })
            .await
            .unwrap();
        assert_eq!(history, 2);
    }

    #[tokio::test]
    async fn test_activity_log_and_notification() {
        let (store, _dir) = seeded_store().await;
        let now = Utc::now();

        let log_id = store
            .insert_activity_log(&NewActivityLog {
                device_id: 1,
                mode: Some(ControlMode::Auto),
                status: DeviceStatus::Off,
                time: now,
            })
            .await
            .unwrap();
        assert!(log_id > 0);

        store
            .insert_notification(&NewNotification::unread(
                10,
                NotificationTarget::Device(1),
                "Device \"Ceiling fan\" changed to OFF".to_string(),
                now,
            ))
            .await
            .unwrap();

        let (mode, description, kind, is_read): (String, String, String, bool) = store
            .execute(|conn| {
                Ok(conn.query_row(
                    "SELECT a.AMode, a.ADescription, n.NType, n.isRead
                     FROM ActivityLog a JOIN Notification n ON n.DeviceID = a.DeviceID",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )?)
            })
            .await
            .unwrap();
        assert_eq!(mode, "AUTO");
        assert_eq!(description, "OFF");
        assert_eq!(kind, "Device");
        assert!(!is_read);
    }

    #[tokio::test]
    async fn test_unassigned_mode_column_value() {
        let (store, _dir) = seeded_store().await;
        store
            .insert_activity_log(&NewActivityLog {
                device_id: 1,
                mode: None,
                status: DeviceStatus::On,
                time: Utc::now(),
            })
            .await
            .unwrap();

        let mode: String = store
            .execute(|conn| {
                Ok(conn.query_row("SELECT AMode FROM ActivityLog WHERE DeviceID = 1", [], |row| {
                    row.get(0)
                })?)
            })
            .await
            .unwrap();
        assert_eq!(mode, "Manual");
    }

    #[tokio::test]
    async fn test_threshold_and_parameter_updates() {
        let (store, _dir) = seeded_store().await;

        let sensor = store
            .find_sensor_for_device(1, Some(1), SensorKind::Temperature)
            .await
            .unwrap();
        assert_eq!(sensor, Some(1));
        assert_eq!(
            store
                .find_sensor_for_device(1, None, SensorKind::Temperature)
                .await
                .unwrap(),
            None
        );

        store.update_sensor_edge(1, "28").await.unwrap();
        let profile = store.sensor_profile(1).await.unwrap().unwrap();
        assert_eq!(profile.edge.as_deref(), Some("28"));

        store.update_device_parameter(1, "3").await.unwrap();
        assert!(matches!(
            store.update_device_parameter(99, "3").await,
            Err(StorageError::InvalidData(_))
        ));
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("smarthome.db");
        {
            let store = SqliteStore::open(path.clone()).unwrap();
            store
                .execute(|conn| {
                    conn.execute("INSERT INTO Home (ID, UserID) VALUES (5, 50)", [])?;
                    Ok(())
                })
                .await
                .unwrap();
        }

        let store = SqliteStore::open(path).unwrap();
        assert_eq!(store.home_owner(5).await.unwrap(), Some(50));
    }
}
