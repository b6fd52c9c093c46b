//! Device status transitions and activity logging

use super::IngestOutcome;
use crate::domain::{
    DeviceRecord, DeviceStatus, NewActivityLog, NewNotification, NotificationTarget,
};
use crate::error::{IngestError, IngestResult, Stage};
use crate::observability::IngestMetrics;
use crate::storage::Store;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

pub fn transition_message(device: &DeviceRecord, status: DeviceStatus) -> String {
    format!("Device \"{}\" changed to {}", device.name, status)
}

pub struct DeviceIngestor {
    store: Arc<dyn Store>,
    metrics: Arc<IngestMetrics>,
}

impl DeviceIngestor {
    pub fn new(store: Arc<dyn Store>, metrics: Arc<IngestMetrics>) -> Self {
        Self { store, metrics }
    }

    pub async fn ingest(
        &self,
        device: &DeviceRecord,
        status: DeviceStatus,
    ) -> IngestResult<IngestOutcome> {
        let mode = self
            .store
            .current_mode(device.id)
            .await
            .map_err(|e| IngestError::persistence(Stage::LoadMode, e))?;

        let now = Utc::now();
        let entry = NewActivityLog {
            device_id: device.id,
            mode,
            status,
            time: now,
        };
        let log_id = self
            .store
            .insert_activity_log(&entry)
            .await
            .map_err(|e| IngestError::persistence(Stage::StoreActivityLog, e))?;
        self.metrics.activity_log_stored();
        debug!(
            device_id = device.id,
            mode = entry.mode_label(),
            %status,
            log_id,
            "Stored activity log"
        );

        let owner = self
            .store
            .home_owner(device.home_id)
            .await
            .map_err(|e| IngestError::persistence(Stage::ResolveOwner, e))?;

        let notification_id = match owner {
            Some(user_id) => {
                let notification = NewNotification::unread(
                    user_id,
                    NotificationTarget::Device(device.id),
                    transition_message(device, status),
                    now,
                );
                let id = self
                    .store
                    .insert_notification(&notification)
                    .await
                    .map_err(|e| IngestError::persistence(Stage::StoreNotification, e))?;
                self.metrics.notification_created();
                Some(id)
            }
            None => {
                warn!(
                    device_id = device.id,
                    home_id = device.home_id,
                    "Home has no owner, skipping device notification"
                );
                None
            }
        };

        Ok(IngestOutcome::DeviceStatus {
            log_id,
            mode,
            notification_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ControlMode;
    use crate::storage::MemoryStore;

    fn fan(home_id: i64) -> DeviceRecord {
        DeviceRecord {
            id: 1,
            name: "Ceiling fan".to_string(),
            device_type: "Mini fan".to_string(),
            topic: "d1".to_string(),
            home_id,
            room_id: None,
        }
    }

    async fn setup() -> (DeviceIngestor, MemoryStore) {
        let store = MemoryStore::new();
        store.add_home(1, 7).await;
        store.add_device(fan(1)).await;
        let ingestor = DeviceIngestor::new(Arc::new(store.clone()), Arc::new(IngestMetrics::new()));
        (ingestor, store)
    }

    #[test]
    fn test_transition_message() {
        assert_eq!(
            transition_message(&fan(1), DeviceStatus::On),
            "Device \"Ceiling fan\" changed to ON"
        );
    }

    #[tokio::test]
    async fn test_unassigned_mode_is_labelled_manual() {
        let (ingestor, store) = setup().await;

        let outcome = ingestor.ingest(&fan(1), DeviceStatus::On).await.unwrap();
        assert!(matches!(
            outcome,
            IngestOutcome::DeviceStatus {
                mode: None,
                notification_id: Some(_),
                ..
            }
        ));

        let logs = store.activity_logs().await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].record.mode, None);
        assert_eq!(logs[0].record.mode_label(), "Manual");
        assert_eq!(logs[0].record.status, DeviceStatus::On);
    }

    #[tokio::test]
    async fn test_uses_latest_mode() {
        let (ingestor, store) = setup().await;
        store
            .record_mode(1, ControlMode::Schedule, 7, Utc::now())
            .await
            .unwrap();
        store
            .record_mode(1, ControlMode::Auto, 7, Utc::now())
            .await
            .unwrap();

        ingestor.ingest(&fan(1), DeviceStatus::Off).await.unwrap();
        let logs = store.activity_logs().await;
        assert_eq!(logs[0].record.mode, Some(ControlMode::Auto));
        assert_eq!(logs[0].record.mode_label(), "AUTO");

        let notifications = store.notifications().await;
        assert_eq!(notifications[0].record.user_id, 7);
        assert_eq!(notifications[0].record.target, NotificationTarget::Device(1));
    }

    #[tokio::test]
    async fn test_ownerless_home_still_logs() {
        let (ingestor, store) = setup().await;

        let outcome = ingestor.ingest(&fan(99), DeviceStatus::On).await.unwrap();
        assert!(matches!(
            outcome,
            IngestOutcome::DeviceStatus {
                notification_id: None,
                ..
            }
        ));
        assert_eq!(store.activity_logs().await.len(), 1);
        assert!(store.notifications().await.is_empty());
    }
}
