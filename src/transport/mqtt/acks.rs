//! Broker acknowledgement tracking
//!
//! rumqttc assigns packet ids only when the event loop writes a request, so a
//! waiter is queued per request kind in submission order and bound to its
//! packet id when the matching `Outgoing` event shows up. The broker's
//! SubAck/UnsubAck/PubAck then resolves it.
//!
//! rumqttc reports a negative acknowledgement as an event loop error without
//! the packet id and drops the connection. Every waiter of that kind still in
//! flight is rejected and the rest are failed as lost.

use super::connection::MqttError;
use rumqttc::v5::mqttbytes::v5::{PubAckReason, SubscribeReasonCode, UnsubAckReason};
use rumqttc::v5::{ConnectionError, StateError};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

/// Request kinds the broker acknowledges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckKind {
    Subscribe,
    Unsubscribe,
    Publish,
}

impl AckKind {
    /// Transport error for a failed request of this kind
    pub fn failure(self, topic: &str, reason: impl Into<String>) -> MqttError {
        let topic = topic.to_string();
        let reason = reason.into();
        match self {
            AckKind::Subscribe => MqttError::SubscribeFailed { topic, reason },
            AckKind::Unsubscribe => MqttError::UnsubscribeFailed { topic, reason },
            AckKind::Publish => MqttError::PublishFailed { topic, reason },
        }
    }
}

/// How the broker answered a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    Accepted,
    Rejected(String),
    /// The session ended before the broker answered
    Lost(String),
}

impl AckOutcome {
    pub fn into_result(self, kind: AckKind, topic: &str) -> Result<(), MqttError> {
        match self {
            AckOutcome::Accepted => Ok(()),
            AckOutcome::Rejected(reason) => {
                Err(kind.failure(topic, format!("rejected by broker: {reason}")))
            }
            AckOutcome::Lost(reason) => Err(kind.failure(
                topic,
                format!("no acknowledgement before the session ended: {reason}"),
            )),
        }
    }
}

pub fn suback_outcome(codes: &[SubscribeReasonCode]) -> AckOutcome {
    match codes
        .iter()
        .find(|code| !matches!(code, SubscribeReasonCode::Success(_)))
    {
        Some(code) => AckOutcome::Rejected(format!("{code:?}")),
        None => AckOutcome::Accepted,
    }
}

/// A topic that was not subscribed is already in the desired state
pub fn unsuback_outcome(reasons: &[UnsubAckReason]) -> AckOutcome {
    match reasons.iter().find(|reason| {
        !matches!(
            reason,
            UnsubAckReason::Success | UnsubAckReason::NoSubscriptionExisted
        )
    }) {
        Some(reason) => AckOutcome::Rejected(format!("{reason:?}")),
        None => AckOutcome::Accepted,
    }
}

pub fn puback_outcome(reason: PubAckReason) -> AckOutcome {
    match reason {
        PubAckReason::Success | PubAckReason::NoMatchingSubscribers => AckOutcome::Accepted,
        other => AckOutcome::Rejected(format!("{other:?}")),
    }
}

/// Kind and reason of a negative acknowledgement reported as an event loop error
pub fn rejection_in(error: &ConnectionError) -> Option<(AckKind, String)> {
    match error {
        ConnectionError::MqttState(StateError::SubFail { reason }) => {
            Some((AckKind::Subscribe, format!("{reason:?}")))
        }
        ConnectionError::MqttState(StateError::UnsubFail { reason }) => {
            Some((AckKind::Unsubscribe, format!("{reason:?}")))
        }
        ConnectionError::MqttState(StateError::PubAckFail { reason }) => {
            Some((AckKind::Publish, format!("{reason:?}")))
        }
        _ => None,
    }
}

type Waiter = oneshot::Sender<AckOutcome>;

#[derive(Default)]
struct Pending {
    /// Submitted, packet id not yet assigned
    queued: HashMap<AckKind, VecDeque<Waiter>>,
    /// Publishes parked behind a packet id collision
    deferred: HashMap<u16, Waiter>,
    /// Written to the network, awaiting the broker; oldest first per id
    in_flight: HashMap<(AckKind, u16), VecDeque<Waiter>>,
}

/// Shared between the client (submits) and the event loop (binds and resolves)
#[derive(Clone, Default)]
pub struct AckTracker {
    pending: Arc<Mutex<Pending>>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a waiter for a request about to be handed to rumqttc
    ///
    /// Callers must serialize reservations with the request submission, so
    /// queue order matches the order of rumqttc's request channel.
    pub fn reserve(&self, kind: AckKind) -> (Reservation<'_>, oneshot::Receiver<AckOutcome>) {
        let (tx, rx) = oneshot::channel();
        self.lock().queued.entry(kind).or_default().push_back(tx);
        (
            Reservation {
                tracker: self,
                kind,
                submitted: false,
            },
            rx,
        )
    }

    fn withdraw_last(&self, kind: AckKind) {
        if let Some(queue) = self.lock().queued.get_mut(&kind) {
            queue.pop_back();
        }
    }

    /// The event loop wrote a request; returns false for requests nobody waits on
    pub fn bind(&self, kind: AckKind, packet_id: u16) -> bool {
        let mut pending = self.lock();
        let waiter = match kind {
            AckKind::Publish => match pending.deferred.remove(&packet_id) {
                Some(waiter) => Some(waiter),
                None => pending.queued.get_mut(&kind).and_then(VecDeque::pop_front),
            },
            _ => pending.queued.get_mut(&kind).and_then(VecDeque::pop_front),
        };
        match waiter {
            Some(waiter) => {
                pending
                    .in_flight
                    .entry((kind, packet_id))
                    .or_default()
                    .push_back(waiter);
                true
            }
            None => false,
        }
    }

    /// A publish collided with an unacknowledged packet id and waits for it
    pub fn defer_publish(&self, packet_id: u16) {
        let mut pending = self.lock();
        if let Some(waiter) = pending
            .queued
            .get_mut(&AckKind::Publish)
            .and_then(VecDeque::pop_front)
        {
            pending.deferred.insert(packet_id, waiter);
        }
    }

    /// Deliver the broker's answer; returns false for unknown packet ids
    pub fn resolve(&self, kind: AckKind, packet_id: u16, outcome: AckOutcome) -> bool {
        let mut pending = self.lock();
        let key = (kind, packet_id);
        let waiter = pending.in_flight.get_mut(&key).and_then(VecDeque::pop_front);
        if pending.in_flight.get(&key).is_some_and(VecDeque::is_empty) {
            pending.in_flight.remove(&key);
        }
        match waiter {
            Some(waiter) => {
                let _ = waiter.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Fail every outstanding waiter after the event loop reported `error`
    ///
    /// Returns how many waiters were failed.
    pub fn abandon(&self, error: &ConnectionError) -> usize {
        let lost = error.to_string();
        let rejection = rejection_in(error);
        let mut pending = self.lock();
        let mut failed = 0;

        for ((kind, _), waiters) in pending.in_flight.drain() {
            let outcome = match &rejection {
                Some((rejected_kind, reason)) if *rejected_kind == kind => {
                    AckOutcome::Rejected(reason.clone())
                }
                _ => AckOutcome::Lost(lost.clone()),
            };
            for waiter in waiters {
                let _ = waiter.send(outcome.clone());
                failed += 1;
            }
        }
        failed += Self::fail_unsent(&mut pending, &lost);
        failed
    }

    /// Fail every outstanding waiter because the session was closed locally
    pub fn close(&self, reason: &str) -> usize {
        let mut pending = self.lock();
        let mut failed = 0;
        for (_, waiters) in pending.in_flight.drain() {
            for waiter in waiters {
                let _ = waiter.send(AckOutcome::Lost(reason.to_string()));
                failed += 1;
            }
        }
        failed + Self::fail_unsent(&mut pending, reason)
    }

    fn fail_unsent(pending: &mut Pending, reason: &str) -> usize {
        let mut failed = 0;
        let deferred = pending.deferred.drain().map(|(_, waiter)| waiter);
        let queued = pending.queued.drain().flat_map(|(_, queue)| queue);
        for waiter in deferred.chain(queued) {
            let _ = waiter.send(AckOutcome::Lost(reason.to_string()));
            failed += 1;
        }
        failed
    }

    /// Number of waiters not yet resolved
    pub fn outstanding(&self) -> usize {
        let pending = self.lock();
        pending.queued.values().map(VecDeque::len).sum::<usize>()
            + pending.deferred.len()
            + pending.in_flight.values().map(VecDeque::len).sum::<usize>()
    }
}

/// A queued waiter whose request has not reached rumqttc yet
///
/// Dropped without [`Reservation::submitted`], it withdraws the waiter so the
/// queue stays aligned with the request channel.
pub struct Reservation<'a> {
    tracker: &'a AckTracker,
    kind: AckKind,
    submitted: bool,
}

impl Reservation<'_> {
    pub fn submitted(mut self) {
        self.submitted = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.submitted {
            self.tracker.withdraw_last(self.kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::v5::mqttbytes::QoS;

    fn submit(tracker: &AckTracker, kind: AckKind) -> oneshot::Receiver<AckOutcome> {
        let (reservation, rx) = tracker.reserve(kind);
        reservation.submitted();
        rx
    }

    #[tokio::test]
    async fn test_waiters_bind_in_submission_order() {
        let tracker = AckTracker::new();
        let first = submit(&tracker, AckKind::Subscribe);
        let second = submit(&tracker, AckKind::Subscribe);

        assert!(tracker.bind(AckKind::Subscribe, 1));
        assert!(tracker.bind(AckKind::Subscribe, 2));

        tracker.resolve(AckKind::Subscribe, 2, AckOutcome::Rejected("NotAuthorized".into()));
        tracker.resolve(AckKind::Subscribe, 1, AckOutcome::Accepted);

        assert_eq!(first.await.unwrap(), AckOutcome::Accepted);
        assert_eq!(
            second.await.unwrap(),
            AckOutcome::Rejected("NotAuthorized".into())
        );
        assert_eq!(tracker.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_kinds_are_tracked_separately() {
        let tracker = AckTracker::new();
        let publish = submit(&tracker, AckKind::Publish);
        let unsubscribe = submit(&tracker, AckKind::Unsubscribe);

        assert!(tracker.bind(AckKind::Unsubscribe, 4));
        assert!(tracker.bind(AckKind::Publish, 4));
        assert!(!tracker.resolve(AckKind::Subscribe, 4, AckOutcome::Accepted));

        tracker.resolve(AckKind::Publish, 4, AckOutcome::Accepted);
        tracker.resolve(AckKind::Unsubscribe, 4, AckOutcome::Rejected("x".into()));
        assert_eq!(publish.await.unwrap(), AckOutcome::Accepted);
        assert_eq!(unsubscribe.await.unwrap(), AckOutcome::Rejected("x".into()));
    }

    #[test]
    fn test_dropped_reservation_is_withdrawn() {
        let tracker = AckTracker::new();
        let _kept = submit(&tracker, AckKind::Subscribe);
        {
            let (_reservation, _rx) = tracker.reserve(AckKind::Subscribe);
            assert_eq!(tracker.outstanding(), 2);
        }
        assert_eq!(tracker.outstanding(), 1);

        // A request nobody reserved for does not steal a waiter
        assert!(tracker.bind(AckKind::Subscribe, 1));
        assert!(!tracker.bind(AckKind::Subscribe, 2));
    }

    #[tokio::test]
    async fn test_collided_publish_waits_behind_original() {
        let tracker = AckTracker::new();
        let original = submit(&tracker, AckKind::Publish);
        let collided = submit(&tracker, AckKind::Publish);

        assert!(tracker.bind(AckKind::Publish, 1));
        tracker.defer_publish(1);
        // The resend is written before the original's PubAck is delivered
        assert!(tracker.bind(AckKind::Publish, 1));

        tracker.resolve(AckKind::Publish, 1, AckOutcome::Accepted);
        assert_eq!(original.await.unwrap(), AckOutcome::Accepted);
        assert_eq!(tracker.outstanding(), 1);

        tracker.resolve(AckKind::Publish, 1, AckOutcome::Rejected("QuotaExceeded".into()));
        assert_eq!(
            collided.await.unwrap(),
            AckOutcome::Rejected("QuotaExceeded".into())
        );
    }

    #[tokio::test]
    async fn test_negative_suback_error_rejects_in_flight_subscribes() {
        let tracker = AckTracker::new();
        let subscribe = submit(&tracker, AckKind::Subscribe);
        let publish = submit(&tracker, AckKind::Publish);
        let unsent = submit(&tracker, AckKind::Unsubscribe);
        tracker.bind(AckKind::Subscribe, 1);
        tracker.bind(AckKind::Publish, 2);

        let error = ConnectionError::MqttState(StateError::SubFail {
            reason: SubscribeReasonCode::NotAuthorized,
        });
        assert_eq!(tracker.abandon(&error), 3);

        assert_eq!(
            subscribe.await.unwrap(),
            AckOutcome::Rejected("NotAuthorized".into())
        );
        assert!(matches!(publish.await.unwrap(), AckOutcome::Lost(_)));
        assert!(matches!(unsent.await.unwrap(), AckOutcome::Lost(_)));
        assert_eq!(tracker.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_close_fails_everything() {
        let tracker = AckTracker::new();
        let waiter = submit(&tracker, AckKind::Publish);
        assert_eq!(tracker.close("client disconnected"), 1);
        assert_eq!(
            waiter.await.unwrap(),
            AckOutcome::Lost("client disconnected".into())
        );
    }

    #[test]
    fn test_reason_code_mapping() {
        assert_eq!(
            suback_outcome(&[SubscribeReasonCode::Success(QoS::AtLeastOnce)]),
            AckOutcome::Accepted
        );
        assert_eq!(
            suback_outcome(&[SubscribeReasonCode::TopicFilterInvalid]),
            AckOutcome::Rejected("TopicFilterInvalid".into())
        );
        assert_eq!(
            unsuback_outcome(&[UnsubAckReason::NoSubscriptionExisted]),
            AckOutcome::Accepted
        );
        assert!(matches!(
            unsuback_outcome(&[UnsubAckReason::NotAuthorized]),
            AckOutcome::Rejected(_)
        ));
        assert_eq!(
            puback_outcome(PubAckReason::NoMatchingSubscribers),
            AckOutcome::Accepted
        );
        assert!(matches!(
            puback_outcome(PubAckReason::NotAuthorized),
            AckOutcome::Rejected(_)
        ));
    }

    #[test]
    fn test_outcome_into_error() {
        let err = AckOutcome::Rejected("NotAuthorized".into())
            .into_result(AckKind::Subscribe, "d1")
            .unwrap_err();
        assert!(matches!(err, MqttError::SubscribeFailed { ref topic, .. } if topic == "d1"));
        assert!(err.to_string().contains("NotAuthorized"));

        let err = AckOutcome::Lost("io".into())
            .into_result(AckKind::Publish, "d2")
            .unwrap_err();
        assert!(matches!(err, MqttError::PublishFailed { .. }));
        assert!(AckOutcome::Accepted
            .into_result(AckKind::Unsubscribe, "d3")
            .is_ok());
    }
}
