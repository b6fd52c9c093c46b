//! Pure routing of MQTT events plus the inbound message forwarder
//!
//! The event loop turns every rumqttc event into an [`EventRoute`]; only
//! publishes leave the transport, through the [`MessageForwarder`].

use super::acks::{puback_outcome, suback_outcome, unsuback_outcome, AckKind, AckOutcome};
use crate::transport::InboundMessage;
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::Event;
use rumqttc::Outgoing;
use tokio::sync::mpsc;
use tracing::debug;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route an MQTT event to the appropriate handler
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived(InboundMessage {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.to_vec(),
                    retain: publish.retain,
                }),
                Packet::Disconnect(_) => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::Acknowledged {
                    kind: AckKind::Subscribe,
                    packet_id: suback.pkid,
                    outcome: suback_outcome(&suback.return_codes),
                },
                Packet::UnsubAck(unsuback) => EventRoute::Acknowledged {
                    kind: AckKind::Unsubscribe,
                    packet_id: unsuback.pkid,
                    outcome: unsuback_outcome(&unsuback.reasons),
                },
                Packet::PubAck(puback) => EventRoute::Acknowledged {
                    kind: AckKind::Publish,
                    packet_id: puback.pkid,
                    outcome: puback_outcome(puback.reason),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(outgoing) => match *outgoing {
                Outgoing::Subscribe(packet_id) => EventRoute::RequestWritten {
                    kind: AckKind::Subscribe,
                    packet_id,
                },
                Outgoing::Unsubscribe(packet_id) => EventRoute::RequestWritten {
                    kind: AckKind::Unsubscribe,
                    packet_id,
                },
                // Packet id 0 is a QoS 0 publish, which is never acknowledged
                Outgoing::Publish(packet_id) if packet_id != 0 => EventRoute::RequestWritten {
                    kind: AckKind::Publish,
                    packet_id,
                },
                Outgoing::AwaitAck(packet_id) => EventRoute::PublishCollided { packet_id },
                _ => EventRoute::OutgoingEvent,
            },
        }
    }

    /// Retained messages are processed: a retained device state is valid telemetry
    pub fn should_process_message(message: &InboundMessage) -> bool {
        if message.retain {
            debug!(topic = %message.topic, "Processing retained message");
        }
        !message.topic.is_empty()
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    ConnectionAcknowledged,
    MessageReceived(InboundMessage),
    Disconnected,
    /// A subscribe, unsubscribe or QoS 1 publish went out under `packet_id`
    RequestWritten { kind: AckKind, packet_id: u16 },
    /// A publish is held back until `packet_id` is acknowledged
    PublishCollided { packet_id: u16 },
    /// The broker answered a request
    Acknowledged {
        kind: AckKind,
        packet_id: u16,
        outcome: AckOutcome,
    },
    /// PingResp and similar
    InfrastructureEvent(String),
    OutgoingEvent,
}

/// Hands inbound publishes to the ingestion channel
#[derive(Clone)]
pub struct MessageForwarder {
    sender: mpsc::Sender<InboundMessage>,
}

impl MessageForwarder {
    pub fn new(sender: mpsc::Sender<InboundMessage>) -> Self {
        Self { sender }
    }

    /// Forward a message, waiting for queue space
    pub async fn forward(&self, message: InboundMessage) -> Result<(), String> {
        debug!(topic = %message.topic, bytes = message.payload.len(), "Forwarding inbound message");
        self.sender
            .send(message)
            .await
            .map_err(|e| format!("Ingestion channel closed: {e}"))
    }
}
