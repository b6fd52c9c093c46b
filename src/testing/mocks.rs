//! Mock broker for exercising reconciliation and command publishing without MQTT

use crate::transport::{Broker, ConnectionState, MqttError};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

pub type PublishedMessage = (String, Vec<u8>);

/// One call made against the mock, in the order it was made
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerCall {
    Subscribe(String),
    Unsubscribe(String),
    Publish(String, Vec<u8>),
}

/// Recording broker
///
/// Starts connected. Topics registered with [`MockBroker::fail_topic`] are
/// rejected for every operation; while disconnected every operation fails
/// with [`MqttError::NotConnected`].
#[derive(Debug, Clone)]
pub struct MockBroker {
    calls: Arc<Mutex<Vec<BrokerCall>>>,
    active: Arc<Mutex<BTreeSet<String>>>,
    failing_topics: Arc<Mutex<HashSet<String>>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBroker {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Connected);
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            active: Arc::new(Mutex::new(BTreeSet::new())),
            failing_topics: Arc::new(Mutex::new(HashSet::new())),
            state_tx: Arc::new(state_tx),
        }
    }

    pub fn disconnected() -> Self {
        let broker = Self::new();
        broker.set_state(ConnectionState::Disconnected("mock offline".to_string()));
        broker
    }

    /// Drive a connection state transition, as the live client's event loop would
    pub fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    pub fn set_connected(&self, connected: bool) {
        if connected {
            self.set_state(ConnectionState::Connected);
        } else {
            self.set_state(ConnectionState::Disconnected("mock offline".to_string()));
        }
    }

    /// Drop broker-side subscriptions, as a fresh (clean start) session would
    pub async fn drop_session(&self) {
        self.active.lock().await.clear();
    }

    pub async fn fail_topic(&self, topic: &str) {
        self.failing_topics.lock().await.insert(topic.to_string());
    }

    pub async fn clear_failures(&self) {
        self.failing_topics.lock().await.clear();
    }

    pub async fn calls(&self) -> Vec<BrokerCall> {
        self.calls.lock().await.clone()
    }

    pub async fn subscribe_calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|call| match call {
                BrokerCall::Subscribe(topic) => Some(topic.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn unsubscribe_calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|call| match call {
                BrokerCall::Unsubscribe(topic) => Some(topic.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|call| match call {
                BrokerCall::Publish(topic, payload) => Some((topic.clone(), payload.clone())),
                _ => None,
            })
            .collect()
    }

    /// Published payloads decoded as JSON, for asserting on command bodies
    pub async fn published_json(&self) -> Vec<(String, serde_json::Value)> {
        self.published()
            .await
            .into_iter()
            .filter_map(|(topic, payload)| {
                serde_json::from_slice(&payload)
                    .ok()
                    .map(|value| (topic, value))
            })
            .collect()
    }

    /// Topics the broker currently holds a subscription for
    pub async fn active_topics(&self) -> BTreeSet<String> {
        self.active.lock().await.clone()
    }

    pub async fn clear_history(&self) {
        self.calls.lock().await.clear();
    }

    async fn check(&self, topic: &str) -> Result<(), String> {
        let state = self.connection_state();
        if !matches!(state, ConnectionState::Connected) {
            return Err(state.to_string());
        }
        if self.failing_topics.lock().await.contains(topic) {
            return Err("mock rejection".to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn subscribe(&self, topic: &str) -> Result<(), MqttError> {
        if !self.is_connected() {
            return Err(MqttError::NotConnected {
                state: self.connection_state(),
            });
        }
        self.calls
            .lock()
            .await
            .push(BrokerCall::Subscribe(topic.to_string()));
        self.check(topic)
            .await
            .map_err(|reason| MqttError::SubscribeFailed {
                topic: topic.to_string(),
                reason,
            })?;
        self.active.lock().await.insert(topic.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), MqttError> {
        if !self.is_connected() {
            return Err(MqttError::NotConnected {
                state: self.connection_state(),
            });
        }
        self.calls
            .lock()
            .await
            .push(BrokerCall::Unsubscribe(topic.to_string()));
        self.check(topic)
            .await
            .map_err(|reason| MqttError::UnsubscribeFailed {
                topic: topic.to_string(),
                reason,
            })?;
        self.active.lock().await.remove(topic);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), MqttError> {
        if !self.is_connected() {
            return Err(MqttError::NotConnected {
                state: self.connection_state(),
            });
        }
        self.calls
            .lock()
            .await
            .push(BrokerCall::Publish(topic.to_string(), payload));
        self.check(topic)
            .await
            .map_err(|reason| MqttError::PublishFailed {
                topic: topic.to_string(),
                reason,
            })
    }

    fn connection_state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }
}
