//! Focus reconciliation
//!
//! Holds the single active focus and the set of topics the broker is known to
//! be subscribed to. Every mutation goes through one async mutex, so focus
//! switches and reconnect re-assertions are serialized.

use crate::domain::{validate_entity_topic, Focus, Topic};
use crate::error::{IngestError, IngestResult, Stage};
use crate::observability::IngestMetrics;
use crate::storage::Store;
use crate::transport::{Broker, MqttError};
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn, Instrument};

/// Result of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub focus: Option<Focus>,
    pub subscribed: Vec<Topic>,
    pub unsubscribed: Vec<Topic>,
    pub unchanged: Vec<Topic>,
    /// Topics that did not reach their desired state
    pub failed: Vec<Topic>,
}

impl ReconcileReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Turn a partial reconciliation into an error naming the failed topics
    pub fn into_result(self) -> IngestResult<Self> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(IngestError::Reconciliation {
                failed: self.failed,
            })
        }
    }
}

#[derive(Debug, Default)]
struct SubscriptionState {
    focus: Option<Focus>,
    current: BTreeSet<Topic>,
}

pub struct SubscriptionReconciler {
    broker: Arc<dyn Broker>,
    store: Arc<dyn Store>,
    metrics: Arc<IngestMetrics>,
    state: Mutex<SubscriptionState>,
}

impl SubscriptionReconciler {
    pub fn new(broker: Arc<dyn Broker>, store: Arc<dyn Store>, metrics: Arc<IngestMetrics>) -> Self {
        Self {
            broker,
            store,
            metrics,
            state: Mutex::new(SubscriptionState::default()),
        }
    }

    pub async fn focus(&self) -> Option<Focus> {
        self.state.lock().await.focus
    }

    pub async fn current_topics(&self) -> BTreeSet<Topic> {
        self.state.lock().await.current.clone()
    }

    /// Make the focus active and bring subscriptions in line with it
    ///
    /// While disconnected the focus is recorded as pending and the call fails
    /// with `NotConnected`; the next re-assertion applies it. When the focus
    /// topics cannot be loaded the previous focus stays active.
    pub async fn switch_focus(&self, focus: Focus) -> IngestResult<ReconcileReport> {
        let mut state = self.state.lock().await;
        let previous = state.focus;
        if previous != Some(focus) {
            info!(%focus, previous = ?previous, "Switching subscription focus");
        }

        if !self.broker.is_connected() {
            state.focus = Some(focus);
            warn!(%focus, "Broker not connected, focus stored as pending");
            return Err(IngestError::Transport(MqttError::NotConnected {
                state: self.broker.connection_state(),
            }));
        }

        async {
            let desired = self.desired_topics(focus).await?;
            state.focus = Some(focus);
            Ok::<_, IngestError>(self.reconcile_locked(&mut state, focus, desired).await)
        }
        .instrument(crate::reconcile_span!(user_id = focus.user_id, home_id = focus.home_id))
        .await
        .and_then(ReconcileReport::into_result)
    }

    /// Re-subscribe the active focus from scratch after a (re)connect
    ///
    /// Subscriptions are not assumed to survive a reconnect, so the current
    /// set is cleared before diffing. Returns `None` when no focus is active.
    pub async fn reassert(&self) -> IngestResult<Option<ReconcileReport>> {
        let mut state = self.state.lock().await;
        state.current.clear();

        let Some(focus) = state.focus else {
            debug!("No active focus to re-assert");
            return Ok(None);
        };

        info!(%focus, "Re-asserting subscriptions for active focus");
        async {
            let desired = self.desired_topics(focus).await?;
            Ok::<_, IngestError>(self.reconcile_locked(&mut state, focus, desired).await)
        }
        .instrument(crate::reconcile_span!(user_id = focus.user_id, home_id = focus.home_id))
        .await
        .and_then(ReconcileReport::into_result)
        .map(Some)
    }

    /// Forget broker-side subscriptions; the focus itself stays active
    pub async fn on_connection_lost(&self) {
        let mut state = self.state.lock().await;
        if !state.current.is_empty() {
            debug!(
                topics = state.current.len(),
                "Connection lost, clearing subscription set"
            );
        }
        state.current.clear();
    }

    async fn desired_topics(&self, focus: Focus) -> IngestResult<BTreeSet<Topic>> {
        let topics = self
            .store
            .focus_topics(focus)
            .await
            .map_err(|e| IngestError::persistence(Stage::LoadFocusTopics, e))?;

        Ok(topics
            .into_iter()
            .filter(|topic| match validate_entity_topic(topic) {
                Ok(()) => true,
                Err(e) => {
                    warn!(topic = %topic, error = %e, "Skipping entity with unusable topic");
                    false
                }
            })
            .collect())
    }

    async fn reconcile_locked(
        &self,
        state: &mut SubscriptionState,
        focus: Focus,
        desired: BTreeSet<Topic>,
    ) -> ReconcileReport {
        if desired.is_empty() {
            warn!(%focus, "Focus has no devices or sensors; no topics will be subscribed");
        }

        let to_unsubscribe: Vec<Topic> = state.current.difference(&desired).cloned().collect();
        let to_subscribe: Vec<Topic> = desired.difference(&state.current).cloned().collect();
        let unchanged: Vec<Topic> = state.current.intersection(&desired).cloned().collect();

        debug!(
            subscribe = to_subscribe.len(),
            unsubscribe = to_unsubscribe.len(),
            unchanged = unchanged.len(),
            "Computed subscription diff"
        );

        let broker = &self.broker;
        let unsubscribes = join_all(to_unsubscribe.iter().map(|topic| async move {
            (topic, broker.unsubscribe(topic).await)
        }));
        let subscribes = join_all(
            to_subscribe
                .iter()
                .map(|topic| async move { (topic, broker.subscribe(topic).await) }),
        );
        let (unsubscribe_results, subscribe_results) =
            futures::future::join(unsubscribes, subscribes).await;

        let mut report = ReconcileReport {
            focus: Some(focus),
            unchanged,
            ..ReconcileReport::default()
        };

        for (topic, result) in unsubscribe_results {
            match result {
                Ok(()) => {
                    state.current.remove(topic);
                    report.unsubscribed.push(topic.clone());
                }
                Err(e) => {
                    warn!(topic = %topic, error = %e, "Unsubscribe failed");
                    self.metrics.unsubscribe_failed();
                    report.failed.push(topic.clone());
                }
            }
        }

        for (topic, result) in subscribe_results {
            match result {
                Ok(()) => {
                    state.current.insert(topic.clone());
                    report.subscribed.push(topic.clone());
                }
                Err(e) => {
                    warn!(topic = %topic, error = %e, "Subscribe failed");
                    self.metrics.subscribe_failed();
                    report.failed.push(topic.clone());
                }
            }
        }

        self.metrics.reconciliation_run();
        info!(
            %focus,
            subscribed = report.subscribed.len(),
            unsubscribed = report.unsubscribed.len(),
            unchanged = report.unchanged.len(),
            failed = report.failed.len(),
            "Reconciliation finished"
        );

        report
    }
}
