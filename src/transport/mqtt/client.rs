//! Impure I/O operations for the MQTT client
//!
//! This module owns the rumqttc client and event loop: connection lifecycle,
//! the reconnection supervisor, and subscribe/unsubscribe/publish calls that
//! complete only when the broker acknowledged them.

use super::acks::{AckKind, AckTracker};
use super::connection::{configure_mqtt_options, ConnectionState, MqttError, ReconnectConfig};
use super::health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
use super::message_handler::{EventRoute, MessageForwarder, MessageHandler};
use crate::config::MqttSection;
use crate::transport::{Broker, InboundMessage};
use async_trait::async_trait;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, ClientError, ConnectionError, EventLoop};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of rumqttc's outgoing request queue
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// A live broker session: the request handle plus the supervisor driving its event loop
struct Session {
    client: AsyncClient,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// State shared between the client and its event loop supervisor
#[derive(Clone)]
struct EventLoopContext {
    client_id: String,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    forwarder: MessageForwarder,
    reconnect_config: ReconnectConfig,
    acks: AckTracker,
    submit_lock: Arc<Mutex<()>>,
}

/// MQTT broker client with a single owned session
pub struct MqttClient {
    client_id: String,
    config: MqttSection,
    reconnect_config: ReconnectConfig,
    operation_timeout: Duration,
    session: Mutex<Option<Session>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    forwarder: MessageForwarder,
    acks: AckTracker,
    /// Held while a request is handed to rumqttc, keeping ack waiters in channel order
    submit_lock: Arc<Mutex<()>>,
}

impl MqttClient {
    /// Create a client; inbound publishes are forwarded to `inbound_tx`
    pub fn new(
        client_id: &str,
        config: MqttSection,
        inbound_tx: mpsc::Sender<InboundMessage>,
    ) -> Result<Self, MqttError> {
        // Fail fast on unusable broker settings
        configure_mqtt_options(client_id, &config)?;

        let reconnect_config = ReconnectConfig::from_section(&config);
        HealthMonitor::validate_reconnect_config(&reconnect_config)
            .map_err(MqttError::InvalidConfig)?;

        let (state_tx, _) = watch::channel(ConnectionState::Idle);

        Ok(Self {
            client_id: client_id.to_string(),
            operation_timeout: Duration::from_millis(config.operation_timeout_ms),
            config,
            reconnect_config,
            session: Mutex::new(None),
            state_tx: Arc::new(state_tx),
            forwarder: MessageForwarder::new(inbound_tx),
            acks: AckTracker::new(),
            submit_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Wait for connection confirmation (ConnAck) with timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let timeout_result = tokio::time::timeout(timeout, async {
            loop {
                let state = state_rx.borrow_and_update().clone();
                match state {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected(reason) => {
                        return Err(MqttError::ConnectionFailed(reason));
                    }
                    ConnectionState::PermanentlyDisconnected(reason) => {
                        return Err(MqttError::ConnectionFailed(format!(
                            "Permanently disconnected: {reason}"
                        )));
                    }
                    ConnectionState::Idle
                    | ConnectionState::Connecting
                    | ConnectionState::Reconnecting(_) => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailed(
                        "State channel closed".to_string(),
                    ));
                }
            }
        })
        .await;

        match timeout_result {
            Ok(result) => result,
            Err(_) => Err(MqttError::ConnectionFailed(
                "ConnAck timeout - no connection confirmation received".to_string(),
            )),
        }
    }

    /// Connect to the broker, tearing down any existing session first
    ///
    /// Returns once the broker acknowledged the connection or the first attempt
    /// failed. On failure the supervisor keeps retrying in the background.
    pub async fn connect(&self) -> Result<(), MqttError> {
        let mut session = self.session.lock().await;
        if let Some(existing) = session.take() {
            info!("Tearing down existing MQTT session before reconnecting");
            Self::close_session(existing).await;
            self.acks.close("session replaced");
        }

        let mqtt_options = configure_mqtt_options(&self.client_id, &self.config)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        self.set_state(ConnectionState::Connecting);
        let state_rx = self.state_tx.subscribe();

        let context = EventLoopContext {
            client_id: self.client_id.clone(),
            state_tx: self.state_tx.clone(),
            forwarder: self.forwarder.clone(),
            reconnect_config: self.reconnect_config.clone(),
            acks: self.acks.clone(),
            submit_lock: Arc::clone(&self.submit_lock),
        };
        let handle = tokio::spawn(Self::run_event_loop(event_loop, context, shutdown_rx));

        *session = Some(Session {
            client,
            shutdown_tx,
            handle,
        });
        drop(session);

        info!(
            host = %self.config.host,
            port = self.config.port(),
            "Connecting to MQTT broker"
        );
        let connection_timeout =
            HealthMonitor::calculate_connection_timeout(&self.reconnect_config);
        Self::wait_for_connection_confirmation(state_rx, connection_timeout).await
    }

    /// Reconnection supervisor: polls the event loop until shutdown
    async fn run_event_loop(
        mut event_loop: EventLoop,
        context: EventLoopContext,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        info!(client_id = %context.client_id, "Starting MQTT event loop");
        let mut reconnect_attempts = 0u32;

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping MQTT event loop");
                        break;
                    }
                }

                event_result = event_loop.poll() => {
                    match event_result {
                        Ok(event) => {
                            let route = MessageHandler::route_mqtt_event(&event);
                            Self::process_event_route(route, &context, &mut reconnect_attempts).await;
                        }
                        Err(e) => {
                            Self::abandon_requests(&mut event_loop, &context, &e).await;
                            if !Self::handle_event_loop_error(
                                e,
                                &context,
                                &mut reconnect_attempts,
                                shutdown_rx.clone(),
                            )
                            .await
                            {
                                break;
                            }
                        }
                    }
                }
            }
        }
        info!(client_id = %context.client_id, "MQTT event loop stopped");
    }

    /// Process a routed MQTT event
    async fn process_event_route(
        route: EventRoute,
        context: &EventLoopContext,
        reconnect_attempts: &mut u32,
    ) {
        match route {
            EventRoute::ConnectionAcknowledged => {
                *reconnect_attempts = 0;
                Self::transition(
                    &context.state_tx,
                    HealthMonitor::determine_next_state(ConnectionEvent::ConnAckReceived),
                );
            }
            EventRoute::MessageReceived(message) => {
                if !MessageHandler::should_process_message(&message) {
                    return;
                }
                let topic = message.topic.clone();
                if let Err(e) = context.forwarder.forward(message).await {
                    error!(topic = %topic, error = %e, "Failed to forward inbound message");
                }
            }
            EventRoute::Disconnected => {
                Self::transition(
                    &context.state_tx,
                    HealthMonitor::determine_next_state(ConnectionEvent::DisconnectedByBroker),
                );
            }
            EventRoute::RequestWritten { kind, packet_id } => {
                if !context.acks.bind(kind, packet_id) {
                    debug!(target: "mqtt_transport", ?kind, packet_id, "Request written without a waiter");
                }
            }
            EventRoute::PublishCollided { packet_id } => {
                debug!(target: "mqtt_transport", packet_id, "Publish waiting on packet id collision");
                context.acks.defer_publish(packet_id);
            }
            EventRoute::Acknowledged {
                kind,
                packet_id,
                outcome,
            } => {
                debug!(target: "mqtt_transport", ?kind, packet_id, ?outcome, "Broker acknowledgement");
                if !context.acks.resolve(kind, packet_id, outcome) {
                    debug!(target: "mqtt_transport", ?kind, packet_id, "Acknowledgement without a waiter");
                }
            }
            EventRoute::InfrastructureEvent(event_str) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
            }
            EventRoute::OutgoingEvent => {}
        }
    }

    /// Fail the waiters of a broken session and drop its unsent requests
    ///
    /// Their callers already saw the failure, so nothing is replayed on the
    /// next session. Submissions are held off meanwhile so no request slips
    /// into the channel between failing the waiters and draining it.
    async fn abandon_requests(
        event_loop: &mut EventLoop,
        context: &EventLoopContext,
        error: &ConnectionError,
    ) {
        let _order = context.submit_lock.lock().await;
        let failed = context.acks.abandon(error);
        event_loop.clean();
        let dropped = event_loop.pending.len();
        event_loop.pending.clear();
        if failed > 0 || dropped > 0 {
            warn!(
                error = %error,
                failed,
                dropped,
                "Outstanding broker requests failed with the session"
            );
        }
    }

    /// Handle an event loop error; returns false when the supervisor should stop
    async fn handle_event_loop_error(
        error: rumqttc::v5::ConnectionError,
        context: &EventLoopContext,
        reconnect_attempts: &mut u32,
        shutdown_rx: watch::Receiver<bool>,
    ) -> bool {
        Self::transition(
            &context.state_tx,
            HealthMonitor::determine_next_state(ConnectionEvent::NetworkError(error.to_string())),
        );

        let decision = HealthMonitor::should_attempt_reconnection(
            *reconnect_attempts,
            &context.reconnect_config,
            *shutdown_rx.borrow(),
        );

        match decision {
            ReconnectionDecision::Proceed { attempt, delay_ms } => {
                *reconnect_attempts = attempt;
                Self::transition(
                    &context.state_tx,
                    HealthMonitor::determine_next_state(ConnectionEvent::ReconnectionStarted(
                        attempt,
                    )),
                );
                // The next poll re-establishes the connection
                Self::interruptible_sleep(shutdown_rx, delay_ms).await
            }
            ReconnectionDecision::AbortShutdownRequested => {
                info!("Shutdown signal received, stopping reconnection");
                false
            }
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                let reason = format!("Max reconnection attempts ({reconnect_attempts}) exceeded");
                Self::transition(
                    &context.state_tx,
                    HealthMonitor::determine_next_state(ConnectionEvent::PermanentFailure(reason)),
                );
                false
            }
        }
    }

    /// Perform interruptible sleep with shutdown monitoring
    /// Returns true if sleep completed, false if shutdown requested
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Shutdown signal received during reconnection delay, stopping");
                    return false;
                }
                true
            }
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
        }
    }

    fn transition(state_tx: &watch::Sender<ConnectionState>, next: ConnectionState) {
        let previous = state_tx.send_replace(next.clone());
        HealthMonitor::log_state_transition(&previous, &next);
    }

    fn set_state(&self, next: ConnectionState) {
        Self::transition(&self.state_tx, next);
    }

    /// Stop a session's supervisor and wait briefly for it to finish
    async fn close_session(session: Session) {
        match tokio::time::timeout(Duration::from_secs(1), session.client.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "MQTT disconnect request not delivered"),
            Err(_) => debug!("MQTT disconnect request timed out"),
        }

        let _ = session.shutdown_tx.send(true);

        match tokio::time::timeout(Duration::from_secs(2), session.handle).await {
            Ok(Ok(())) => info!("Event loop task shut down gracefully"),
            Ok(Err(e)) if !e.is_cancelled() => warn!("Event loop task ended with error: {}", e),
            Ok(Err(_)) => {}
            Err(_) => warn!("Event loop task didn't shut down gracefully"),
        }
    }

    /// Disconnect from the broker
    pub async fn disconnect(&self) -> Result<(), MqttError> {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            Self::close_session(session).await;
            self.acks.close("client disconnected");
            self.set_state(HealthMonitor::determine_next_state(
                ConnectionEvent::ClientClosed,
            ));
            info!("MQTT client disconnected");
        }
        Ok(())
    }

    /// Check if the reconnection budget is exhausted
    pub fn is_permanently_disconnected(&self) -> bool {
        matches!(
            *self.state_tx.borrow(),
            ConnectionState::PermanentlyDisconnected(_)
        )
    }

    /// Request handle for the live session, if connected
    async fn connected_handle(&self) -> Result<AsyncClient, MqttError> {
        let state = self.state_tx.borrow().clone();
        if !HealthMonitor::can_publish(&state) {
            return Err(MqttError::NotConnected { state });
        }
        let session = self.session.lock().await;
        session
            .as_ref()
            .map(|session| session.client.clone())
            .ok_or(MqttError::NotConnected {
                state: ConnectionState::Idle,
            })
    }

    /// Run a broker request bounded by the operation timeout
    async fn bounded<T, F>(&self, operation: &'static str, topic: &str, request: F) -> Result<T, MqttError>
    where
        F: Future<Output = Result<T, MqttError>>,
    {
        tokio::time::timeout(self.operation_timeout, request)
            .await
            .map_err(|_| MqttError::Timeout {
                operation,
                topic: topic.to_string(),
                timeout_ms: self.operation_timeout.as_millis() as u64,
            })?
    }

    /// Hand a request to rumqttc and wait for the broker's acknowledgement
    async fn acknowledged<F, Fut>(
        &self,
        kind: AckKind,
        operation: &'static str,
        topic: &str,
        send: F,
    ) -> Result<(), MqttError>
    where
        F: FnOnce(AsyncClient) -> Fut,
        Fut: Future<Output = Result<(), ClientError>>,
    {
        let client = self.connected_handle().await?;
        self.bounded(operation, topic, async {
            let ack = {
                let _order = self.submit_lock.lock().await;
                let (reservation, ack) = self.acks.reserve(kind);
                send(client)
                    .await
                    .map_err(|e| kind.failure(topic, e.to_string()))?;
                reservation.submitted();
                ack
            };
            let outcome = ack
                .await
                .map_err(|_| kind.failure(topic, "acknowledgement tracking stopped"))?;
            outcome.into_result(kind, topic)
        })
        .await
    }
}

#[async_trait]
impl Broker for MqttClient {
    async fn subscribe(&self, topic: &str) -> Result<(), MqttError> {
        let filter = topic.to_string();
        self.acknowledged(AckKind::Subscribe, "subscribe", topic, |client| async move {
            client.subscribe(filter, QoS::AtLeastOnce).await
        })
        .await?;
        debug!(target: "mqtt_transport", topic, "Subscription acknowledged");
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), MqttError> {
        let filter = topic.to_string();
        self.acknowledged(AckKind::Unsubscribe, "unsubscribe", topic, |client| async move {
            client.unsubscribe(filter).await
        })
        .await?;
        debug!(target: "mqtt_transport", topic, "Unsubscription acknowledged");
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), MqttError> {
        let name = topic.to_string();
        self.acknowledged(AckKind::Publish, "publish", topic, |client| async move {
            client.publish(name, QoS::AtLeastOnce, false, payload).await
        })
        .await
    }

    fn connection_state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        // No async in Drop: stop the supervisor and abort it, callers wanting a
        // clean DISCONNECT call disconnect() first
        if let Some(session) = self.session.get_mut().take() {
            let _ = session.shutdown_tx.send(true);
            session.handle.abort();
        }
    }
}
