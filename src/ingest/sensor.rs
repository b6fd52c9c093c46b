//! Sensor readings and threshold alerting

use super::IngestOutcome;
use crate::domain::{
    DecodedPayload, NewNotification, NewSensorReading, NotificationTarget, SensorId,
    SensorProfile,
};
use crate::error::{IngestError, IngestResult, Stage};
use crate::observability::IngestMetrics;
use crate::storage::Store;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Strictly greater-than; a reading equal to the edge does not alert
pub fn threshold_exceeded(value: f64, edge: f64) -> bool {
    value > edge
}

/// Alert text, e.g. "Temperature is high: 35°C"
pub fn alert_message(profile: &SensorProfile, value: f64) -> String {
    format!(
        "{} is high: {}{}",
        profile.display_type,
        value,
        profile.kind().unit()
    )
}

/// Edge to compare against, or `None` when the sensor does not alert
fn alert_edge(profile: &SensorProfile) -> Option<f64> {
    if !profile.kind().supports_alerting() {
        return None;
    }
    profile.edge_threshold()
}

pub struct SensorIngestor {
    store: Arc<dyn Store>,
    metrics: Arc<IngestMetrics>,
}

impl SensorIngestor {
    pub fn new(store: Arc<dyn Store>, metrics: Arc<IngestMetrics>) -> Self {
        Self { store, metrics }
    }

    pub async fn ingest(
        &self,
        sensor_id: SensorId,
        topic: &str,
        payload: &DecodedPayload,
    ) -> IngestResult<IngestOutcome> {
        let value = payload
            .reading_value()
            .ok_or_else(|| IngestError::unroutable(topic, "structured payload on sensor topic"))?;

        let reading = NewSensorReading {
            sensor_id,
            time: Utc::now(),
            value,
        };
        let reading_id = self
            .store
            .insert_sensor_reading(&reading)
            .await
            .map_err(|e| IngestError::persistence(Stage::StoreReading, e))?;
        self.metrics.sensor_reading_stored();
        debug!(
            sensor_id,
            reading_id,
            data_type = reading.value.data_type().as_str(),
            "Stored sensor reading"
        );

        let DecodedPayload::Numeric(value) = payload else {
            return Ok(IngestOutcome::SensorReading {
                reading_id,
                notification_id: None,
            });
        };

        let notification_id = self.evaluate_threshold(sensor_id, *value).await?;
        Ok(IngestOutcome::SensorReading {
            reading_id,
            notification_id,
        })
    }

    async fn evaluate_threshold(&self, sensor_id: SensorId, value: f64) -> IngestResult<Option<i64>> {
        let profile = self
            .store
            .sensor_profile(sensor_id)
            .await
            .map_err(|e| IngestError::persistence(Stage::LoadSensorProfile, e))?;
        let Some(profile) = profile else {
            warn!(sensor_id, "Sensor vanished before threshold check");
            return Ok(None);
        };

        let Some(edge) = alert_edge(&profile) else {
            return Ok(None);
        };
        if !threshold_exceeded(value, edge) {
            return Ok(None);
        }

        let Some(owner) = profile.owner else {
            warn!(sensor_id, value, edge, "Threshold exceeded but sensor has no owner");
            return Ok(None);
        };

        let notification = NewNotification::unread(
            owner,
            NotificationTarget::Sensor(sensor_id),
            alert_message(&profile, value),
            Utc::now(),
        );
        let id = self
            .store
            .insert_notification(&notification)
            .await
            .map_err(|e| IngestError::persistence(Stage::StoreNotification, e))?;
        self.metrics.notification_created();
        info!(sensor_id, value, edge, user_id = owner, "Threshold alert raised");

        Ok(Some(id))
    }
}
