//! Topic classification
//!
//! Turns an inbound (topic, payload) pair into a typed [`IngestEvent`]. The
//! payload is decoded once here; handlers never look at raw bytes.

use super::IngestEvent;
use crate::domain::{DecodedPayload, DeviceRecord, Domain, StaticTopic};
use crate::error::{IngestError, IngestResult, Stage};
use crate::storage::Store;
use crate::transport::InboundMessage;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct MessageClassifier {
    store: Arc<dyn Store>,
}

impl MessageClassifier {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Classify a message
    ///
    /// Order: sensor key lookup, device key lookup, then the static
    /// `<app>/devices/<kind>` shape. Anything else is unroutable.
    pub async fn classify(&self, message: &InboundMessage) -> IngestResult<IngestEvent> {
        let topic = message.topic.as_str();

        let sensor = self
            .store
            .find_sensor_by_topic(topic)
            .await
            .map_err(|e| IngestError::persistence(Stage::ResolveSensor, e))?;
        if let Some(sensor_id) = sensor {
            debug!(topic, sensor_id, "Classified as sensor reading");
            return Ok(IngestEvent::Sensor {
                sensor_id,
                topic: topic.to_string(),
                payload: DecodedPayload::sensor(&message.payload),
            });
        }

        let device = self
            .store
            .find_device_by_topic(topic)
            .await
            .map_err(|e| IngestError::persistence(Stage::ResolveDevice, e))?;
        if let Some(device) = device {
            debug!(topic, device_id = device.id, "Classified as device status");
            return device_event(device, message);
        }

        if let Some(device) = self.resolve_static_device(topic).await? {
            debug!(topic, device_id = device.id, "Classified as static device topic");
            return device_event(device, message);
        }

        Err(IngestError::unroutable(topic, "no sensor or device owns this topic"))
    }

    async fn resolve_static_device(&self, topic: &str) -> IngestResult<Option<DeviceRecord>> {
        let Some(parsed) = StaticTopic::parse(topic) else {
            return Ok(None);
        };
        if parsed.domain != Domain::Devices {
            return Ok(None);
        }
        let Some(device_type) = parsed.device_type() else {
            return Err(IngestError::unroutable(
                topic,
                format!("unknown device kind '{}'", parsed.leaf),
            ));
        };

        let device = self
            .store
            .find_device_by_type(device_type)
            .await
            .map_err(|e| IngestError::persistence(Stage::ResolveDevice, e))?;

        device.map(Some).ok_or_else(|| {
            IngestError::unroutable(topic, format!("no device of type '{device_type}' registered"))
        })
    }
}

fn device_event(device: DeviceRecord, message: &InboundMessage) -> IngestResult<IngestEvent> {
    let status = DecodedPayload::device(&message.payload)
        .and_then(|payload| payload.device_status())
        .map_err(|source| IngestError::MalformedPayload {
            topic: message.topic.clone(),
            source,
        })?;

    Ok(IngestEvent::DeviceStatus {
        device,
        topic: message.topic.clone(),
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DeviceStatus, PayloadError};
    use crate::storage::{MemoryStore, SensorSeed};

    fn message(topic: &str, payload: &[u8]) -> InboundMessage {
        InboundMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            retain: false,
        }
    }

    async fn classifier() -> MessageClassifier {
        let store = MemoryStore::new();
        store.add_home(1, 1).await;
        store
            .add_sensor(SensorSeed::new(7, "Temperature Sensor", "Temperature", "s1", 1))
            .await;
        store
            .add_device(DeviceRecord {
                id: 3,
                name: "Desk fan".to_string(),
                device_type: "Mini fan".to_string(),
                topic: "d1".to_string(),
                home_id: 1,
                room_id: None,
            })
            .await;
        MessageClassifier::new(Arc::new(store))
    }

    #[tokio::test]
    async fn test_sensor_topic() {
        let event = classifier().await.classify(&message("s1", b"35")).await.unwrap();
        assert_eq!(
            event,
            IngestEvent::Sensor {
                sensor_id: 7,
                topic: "s1".to_string(),
                payload: DecodedPayload::Numeric(35.0),
            }
        );
    }

    #[tokio::test]
    async fn test_device_topic() {
        let event = classifier()
            .await
            .classify(&message("d1", br#"{"status":"on"}"#))
            .await
            .unwrap();
        match event {
            IngestEvent::DeviceStatus { device, status, .. } => {
                assert_eq!(device.id, 3);
                assert_eq!(status, DeviceStatus::On);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_static_device_topic_resolves_by_type() {
        let event = classifier()
            .await
            .classify(&message("home/devices/fan", br#"{"status":false}"#))
            .await
            .unwrap();
        assert_eq!(event.topic(), "home/devices/fan");
        match event {
            IngestEvent::DeviceStatus { device, status, .. } => {
                assert_eq!(device.id, 3);
                assert_eq!(status, DeviceStatus::Off);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unroutable_topics() {
        let classifier = classifier().await;
        for topic in ["unknown/x/y", "home/devices/kettle", "home/devices/led", "zzz"] {
            let err = classifier.classify(&message(topic, b"1")).await.unwrap_err();
            assert!(
                matches!(err, IngestError::Unroutable { .. }),
                "{topic} should be unroutable, got {err}"
            );
        }
    }

    #[tokio::test]
    async fn test_malformed_device_payload() {
        let err = classifier()
            .await
            .classify(&message("d1", br#"{"status":"dim"}"#))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IngestError::MalformedPayload {
                source: PayloadError::InvalidStatus(_),
                ..
            }
        ));
        assert!(err.is_soft_miss());
    }
}
