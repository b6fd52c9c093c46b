//! Outbound command publishing
//!
//! Refuses to publish while the broker is not connected and never retries;
//! the caller decides what to do with a failure.

use crate::domain::{validate_entity_topic, Topic};
use crate::error::{IngestError, IngestResult};
use crate::observability::IngestMetrics;
use crate::transport::{Broker, MqttError};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// A command that reached the broker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandOutcome {
    pub topic: Topic,
    pub payload: Value,
}

#[derive(Clone)]
pub struct CommandPublisher {
    broker: Arc<dyn Broker>,
    metrics: Arc<IngestMetrics>,
}

impl CommandPublisher {
    pub fn new(broker: Arc<dyn Broker>, metrics: Arc<IngestMetrics>) -> Self {
        Self { broker, metrics }
    }

    pub fn is_connected(&self) -> bool {
        self.broker.is_connected()
    }

    /// Publish any JSON-serializable payload on a device topic
    pub async fn publish<T>(&self, topic: &str, payload: &T) -> IngestResult<CommandOutcome>
    where
        T: Serialize + ?Sized,
    {
        validate_entity_topic(topic)
            .map_err(|e| IngestError::invalid_command(format!("invalid topic '{topic}': {e}")))?;

        let result = self.try_publish(topic, payload).await;
        match &result {
            Ok(_) => {
                self.metrics.command_published();
                info!(topic, "Command published");
            }
            Err(e) => {
                self.metrics.command_failed();
                warn!(topic, error = %e.public_message(), "Command not published");
            }
        }
        result
    }

    async fn try_publish<T>(&self, topic: &str, payload: &T) -> IngestResult<CommandOutcome>
    where
        T: Serialize + ?Sized,
    {
        if !self.broker.is_connected() {
            return Err(MqttError::NotConnected {
                state: self.broker.connection_state(),
            }
            .into());
        }

        let value = serde_json::to_value(payload).map_err(MqttError::SerializationError)?;
        let bytes = serde_json::to_vec(&value).map_err(MqttError::SerializationError)?;
        self.broker.publish(topic, bytes).await?;

        Ok(CommandOutcome {
            topic: topic.to_string(),
            payload: value,
        })
    }
}
