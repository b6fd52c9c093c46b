//! Ingestion pipelines
//!
//! A message flows classifier -> sensor or device pipeline -> store. Each step
//! returns a `Result`; the first failing step ends that message's handling.

pub mod device;
pub mod sensor;
pub mod worker;

use crate::domain::ControlMode;
use crate::error::IngestResult;
use crate::observability::IngestMetrics;
use crate::routing::{IngestEvent, MessageClassifier};
use crate::storage::Store;
use crate::transport::InboundMessage;
use serde::Serialize;
use std::sync::Arc;

pub use device::DeviceIngestor;
pub use sensor::SensorIngestor;
pub use worker::IngestWorker;

/// What a successfully handled message produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngestOutcome {
    SensorReading {
        reading_id: i64,
        notification_id: Option<i64>,
    },
    DeviceStatus {
        log_id: i64,
        mode: Option<ControlMode>,
        notification_id: Option<i64>,
    },
}

/// Classifier plus both handlers
pub struct IngestPipeline {
    classifier: MessageClassifier,
    sensors: SensorIngestor,
    devices: DeviceIngestor,
}

impl IngestPipeline {
    pub fn new(store: Arc<dyn Store>, metrics: Arc<IngestMetrics>) -> Self {
        Self {
            classifier: MessageClassifier::new(Arc::clone(&store)),
            sensors: SensorIngestor::new(Arc::clone(&store), Arc::clone(&metrics)),
            devices: DeviceIngestor::new(store, metrics),
        }
    }

    pub async fn process(&self, message: &InboundMessage) -> IngestResult<IngestOutcome> {
        let event = self.classifier.classify(message).await?;
        self.dispatch(&event).await
    }

    pub async fn dispatch(&self, event: &IngestEvent) -> IngestResult<IngestOutcome> {
        match event {
            IngestEvent::Sensor {
                sensor_id,
                topic,
                payload,
            } => self.sensors.ingest(*sensor_id, topic, payload).await,
            IngestEvent::DeviceStatus { device, status, .. } => {
                self.devices.ingest(device, *status).await
            }
        }
    }
}
