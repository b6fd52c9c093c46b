//! Message classification
//!
//! The classifier decides which ingestion pipeline a message belongs to. It
//! performs lookups but never persists anything.

pub mod classifier;

use crate::domain::{DecodedPayload, DeviceRecord, DeviceStatus, SensorId, Topic};

pub use classifier::MessageClassifier;

/// A classified inbound message, ready for exactly one ingestion handler
#[derive(Debug, Clone, PartialEq)]
pub enum IngestEvent {
    Sensor {
        sensor_id: SensorId,
        topic: Topic,
        payload: DecodedPayload,
    },
    DeviceStatus {
        device: DeviceRecord,
        topic: Topic,
        status: DeviceStatus,
    },
}

impl IngestEvent {
    pub fn topic(&self) -> &str {
        match self {
            IngestEvent::Sensor { topic, .. } | IngestEvent::DeviceStatus { topic, .. } => topic,
        }
    }
}
