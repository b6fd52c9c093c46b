//! Service object owning the broker connection, store, reconciler and workers
//!
//! Nothing here is global: the connection handle, the active focus and the
//! subscription set all live in fields of [`SmartHomeService`] and change only
//! through its methods.

use crate::commands::{CommandPublisher, DeviceCommandService};
use crate::config::{ServiceConfig, StorageBackend, StorageSection};
use crate::domain::{Focus, Topic};
use crate::error::{IngestError, IngestResult, Stage};
use crate::ingest::{IngestPipeline, IngestWorker};
use crate::observability::{IngestMetrics, MetricsSnapshot};
use crate::storage::{MemoryStore, SqliteStore, StorageError, Store};
use crate::subscription::{ReconcileReport, SubscriptionReconciler};
use crate::transport::mqtt::{HealthMonitor, LinkTransition, MqttClient};
use crate::transport::{Broker, ConnectionState, InboundMessage, MqttError};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub struct SmartHomeService {
    broker: Arc<dyn Broker>,
    /// Live MQTT client, when the broker is one; owns connect/disconnect
    mqtt: Option<Arc<MqttClient>>,
    reconciler: Arc<SubscriptionReconciler>,
    commands: DeviceCommandService,
    metrics: Arc<IngestMetrics>,
    worker_shutdown: Option<oneshot::Sender<()>>,
    watcher_shutdown: Option<oneshot::Sender<()>>,
    tasks: Vec<JoinHandle<()>>,
}

/// Open the configured storage backend
pub fn open_store(section: &StorageSection) -> IngestResult<Arc<dyn Store>> {
    match section.backend {
        StorageBackend::Memory => {
            warn!("Using in-memory storage; nothing will be persisted across restarts");
            Ok(Arc::new(MemoryStore::new()))
        }
        StorageBackend::Sqlite => {
            let path = section.path.clone().ok_or_else(|| {
                IngestError::persistence(
                    Stage::OpenStore,
                    StorageError::Unavailable("no database path configured".to_string()),
                )
            })?;
            let store = SqliteStore::open(path)
                .map_err(|e| IngestError::persistence(Stage::OpenStore, e))?;
            Ok(Arc::new(store))
        }
    }
}

impl SmartHomeService {
    /// Build the full service from configuration and connect to the broker
    ///
    /// A failed first connection attempt is logged, not returned: the client
    /// keeps retrying in the background and the watcher re-asserts the focus
    /// once it succeeds.
    pub async fn start(config: &ServiceConfig) -> IngestResult<Self> {
        let store = open_store(&config.storage)?;
        let (inbound_tx, inbound_rx) = mpsc::channel(config.ingest.channel_capacity);
        let client = Arc::new(MqttClient::new(
            &config.service.client_id,
            config.mqtt.clone(),
            inbound_tx,
        )?);

        let broker: Arc<dyn Broker> = client.clone();
        let mut service = Self::with_broker(broker, store, inbound_rx);
        service.mqtt = Some(Arc::clone(&client));

        // Recorded as pending while still disconnected; applied on ConnAck
        if let Some(section) = config.focus {
            let focus = Focus::from(section);
            match service.switch_focus(focus).await {
                Ok(_) | Err(IngestError::Transport(MqttError::NotConnected { .. })) => {
                    debug!(%focus, "Startup focus registered");
                }
                Err(e) => warn!(%focus, error = %e, "Startup focus not applied"),
            }
        }

        if let Err(e) = client.connect().await {
            warn!(error = %e, "Initial broker connection failed, retrying in background");
        }

        info!(client_id = %config.service.client_id, "Smart-home ingestion service started");
        Ok(service)
    }

    /// Assemble the service around an existing broker and inbound channel
    ///
    /// Spawns the ingestion worker and the connection watcher. The broker's
    /// current state is taken as the starting point; only later transitions
    /// trigger re-assertion.
    pub fn with_broker(
        broker: Arc<dyn Broker>,
        store: Arc<dyn Store>,
        inbound: mpsc::Receiver<InboundMessage>,
    ) -> Self {
        let metrics = Arc::new(IngestMetrics::new());
        let reconciler = Arc::new(SubscriptionReconciler::new(
            Arc::clone(&broker),
            Arc::clone(&store),
            Arc::clone(&metrics),
        ));
        let publisher = CommandPublisher::new(Arc::clone(&broker), Arc::clone(&metrics));
        let commands = DeviceCommandService::new(Arc::clone(&store), publisher);

        let pipeline = Arc::new(IngestPipeline::new(store, Arc::clone(&metrics)));
        let (worker_shutdown, worker_shutdown_rx) = oneshot::channel();
        let worker = IngestWorker::new(pipeline, Arc::clone(&metrics)).spawn(inbound, worker_shutdown_rx);

        let mut state_rx = broker.subscribe_state();
        let initial = state_rx.borrow_and_update().clone();
        if matches!(initial, ConnectionState::Connected) {
            metrics.connection_established();
        }
        let (watcher_shutdown, watcher_shutdown_rx) = oneshot::channel();
        let watcher = tokio::spawn(watch_connection(
            state_rx,
            initial,
            Arc::clone(&reconciler),
            Arc::clone(&metrics),
            watcher_shutdown_rx,
        ));

        Self {
            broker,
            mqtt: None,
            reconciler,
            commands,
            metrics,
            worker_shutdown: Some(worker_shutdown),
            watcher_shutdown: Some(watcher_shutdown),
            tasks: vec![worker, watcher],
        }
    }

    /// Make `focus` the active focus and reconcile subscriptions to it
    pub async fn switch_focus(&self, focus: Focus) -> IngestResult<ReconcileReport> {
        self.reconciler.switch_focus(focus).await
    }

    pub async fn focus(&self) -> Option<Focus> {
        self.reconciler.focus().await
    }

    pub async fn subscribed_topics(&self) -> BTreeSet<Topic> {
        self.reconciler.current_topics().await
    }

    pub fn commands(&self) -> &DeviceCommandService {
        &self.commands
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.broker.connection_state()
    }

    pub fn is_permanently_disconnected(&self) -> bool {
        matches!(
            self.broker.connection_state(),
            ConnectionState::PermanentlyDisconnected(_)
        )
    }

    /// Resolve once the broker gives up reconnecting
    pub async fn wait_for_permanent_disconnect(&self) {
        let mut state_rx = self.broker.subscribe_state();
        loop {
            if matches!(
                *state_rx.borrow_and_update(),
                ConnectionState::PermanentlyDisconnected(_)
            ) {
                return;
            }
            if state_rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Stop the workers and disconnect from the broker
    pub async fn shutdown(mut self) -> IngestResult<()> {
        info!("Shutting down smart-home ingestion service");

        if let Some(tx) = self.watcher_shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(tx) = self.worker_shutdown.take() {
            let _ = tx.send(());
        }

        if let Some(client) = self.mqtt.take() {
            client.disconnect().await?;
        }

        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!(error = %e, "Service task ended abnormally");
                }
            }
        }

        info!("Service shutdown complete");
        Ok(())
    }
}

impl Drop for SmartHomeService {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Re-assert the focus on every (re)connect and clear the set on loss
async fn watch_connection(
    mut state_rx: watch::Receiver<ConnectionState>,
    mut previous: ConnectionState,
    reconciler: Arc<SubscriptionReconciler>,
    metrics: Arc<IngestMetrics>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let current = state_rx.borrow_and_update().clone();
        match HealthMonitor::classify_transition(&previous, &current) {
            // Connected -> Connected means intermediate states were coalesced
            LinkTransition::Established => {
                metrics.connection_established();
                match reconciler.reassert().await {
                    Ok(Some(report)) => info!(
                        subscribed = report.subscribed.len(),
                        "Focus re-asserted after connect"
                    ),
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Focus re-assertion incomplete"),
                }
            }
            LinkTransition::Lost => {
                metrics.connection_lost();
                reconciler.on_connection_lost().await;
            }
            LinkTransition::Unchanged => {}
        }
        previous = current;
    }
    debug!("Connection watcher stopped");
}
