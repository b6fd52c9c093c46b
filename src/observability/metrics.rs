//! Ingestion metrics
//!
//! Atomic counters for the message path, reconciliation and commands, plus a
//! bounded window of per-message handling times. Owned by the service object
//! and shared through an `Arc`.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MAX_TIMING_SAMPLES: usize = 1000;

#[derive(Debug)]
pub struct IngestMetrics {
    // Message path
    messages_received: AtomicU64,
    sensor_readings_stored: AtomicU64,
    activity_logs_stored: AtomicU64,
    notifications_created: AtomicU64,
    unroutable_dropped: AtomicU64,
    malformed_dropped: AtomicU64,
    persistence_failures: AtomicU64,

    // Reconciliation
    reconciliations: AtomicU64,
    subscribe_failures: AtomicU64,
    unsubscribe_failures: AtomicU64,

    // Commands
    commands_published: AtomicU64,
    command_failures: AtomicU64,

    // Connection
    connected: AtomicBool,
    connections_established: AtomicU64,
    connections_lost: AtomicU64,
    started_at: AtomicU64,

    handling_times: Mutex<Vec<u64>>,
}

impl Default for IngestMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestMetrics {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            sensor_readings_stored: AtomicU64::new(0),
            activity_logs_stored: AtomicU64::new(0),
            notifications_created: AtomicU64::new(0),
            unroutable_dropped: AtomicU64::new(0),
            malformed_dropped: AtomicU64::new(0),
            persistence_failures: AtomicU64::new(0),
            reconciliations: AtomicU64::new(0),
            subscribe_failures: AtomicU64::new(0),
            unsubscribe_failures: AtomicU64::new(0),
            commands_published: AtomicU64::new(0),
            command_failures: AtomicU64::new(0),
            connected: AtomicBool::new(false),
            connections_established: AtomicU64::new(0),
            connections_lost: AtomicU64::new(0),
            started_at: AtomicU64::new(current_timestamp()),
            handling_times: Mutex::new(Vec::new()),
        }
    }

    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sensor_reading_stored(&self) {
        self.sensor_readings_stored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn activity_log_stored(&self) {
        self.activity_logs_stored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn notification_created(&self) {
        self.notifications_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Soft miss: no entity owns the topic
    pub fn unroutable_dropped(&self) {
        self.unroutable_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn malformed_dropped(&self) {
        self.malformed_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn persistence_failed(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconciliation_run(&self) {
        self.reconciliations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscribe_failed(&self) {
        self.subscribe_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unsubscribe_failed(&self) {
        self.unsubscribe_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn command_published(&self) {
        self.commands_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn command_failed(&self) {
        self.command_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.connected.store(true, Ordering::Relaxed);
    }

    pub fn connection_lost(&self) {
        self.connections_lost.fetch_add(1, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
    }

    pub fn record_handling_time(&self, duration: Duration) {
        if let Ok(mut times) = self.handling_times.lock() {
            times.push(duration.as_millis() as u64);
            if times.len() > MAX_TIMING_SAMPLES {
                times.remove(0);
            }
        }
    }

    fn handling_time_statistics(&self) -> (f64, f64, f64) {
        let Ok(times) = self.handling_times.lock() else {
            return (0.0, 0.0, 0.0);
        };
        if times.is_empty() {
            return (0.0, 0.0, 0.0);
        }

        let mut sorted = times.clone();
        sorted.sort_unstable();
        let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
        (avg, percentile(&sorted, 50.0), percentile(&sorted, 95.0))
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let (avg_handling_ms, p50_handling_ms, p95_handling_ms) = self.handling_time_statistics();

        MetricsSnapshot {
            timestamp: current_timestamp(),
            uptime_seconds: current_timestamp()
                .saturating_sub(self.started_at.load(Ordering::Relaxed)),
            messages: MessageMetrics {
                received: self.messages_received.load(Ordering::Relaxed),
                sensor_readings_stored: self.sensor_readings_stored.load(Ordering::Relaxed),
                activity_logs_stored: self.activity_logs_stored.load(Ordering::Relaxed),
                notifications_created: self.notifications_created.load(Ordering::Relaxed),
                unroutable_dropped: self.unroutable_dropped.load(Ordering::Relaxed),
                malformed_dropped: self.malformed_dropped.load(Ordering::Relaxed),
                persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
                avg_handling_ms,
                p50_handling_ms,
                p95_handling_ms,
            },
            subscriptions: SubscriptionMetrics {
                reconciliations: self.reconciliations.load(Ordering::Relaxed),
                subscribe_failures: self.subscribe_failures.load(Ordering::Relaxed),
                unsubscribe_failures: self.unsubscribe_failures.load(Ordering::Relaxed),
            },
            commands: CommandMetrics {
                published: self.commands_published.load(Ordering::Relaxed),
                failed: self.command_failures.load(Ordering::Relaxed),
            },
            connection: ConnectionMetrics {
                connected: self.connected.load(Ordering::Relaxed),
                established: self.connections_established.load(Ordering::Relaxed),
                lost: self.connections_lost.load(Ordering::Relaxed),
            },
        }
    }
}

/// Point-in-time copy of every counter
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: u64,
    pub uptime_seconds: u64,
    pub messages: MessageMetrics,
    pub subscriptions: SubscriptionMetrics,
    pub commands: CommandMetrics,
    pub connection: ConnectionMetrics,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageMetrics {
    pub received: u64,
    pub sensor_readings_stored: u64,
    pub activity_logs_stored: u64,
    pub notifications_created: u64,
    pub unroutable_dropped: u64,
    pub malformed_dropped: u64,
    pub persistence_failures: u64,
    pub avg_handling_ms: f64,
    pub p50_handling_ms: f64,
    pub p95_handling_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionMetrics {
    pub reconciliations: u64,
    pub subscribe_failures: u64,
    pub unsubscribe_failures: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandMetrics {
    pub published: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionMetrics {
    pub connected: bool,
    pub established: u64,
    pub lost: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// Nearest-rank percentile over sorted samples
fn percentile(sorted: &[u64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((pct / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank.min(sorted.len() - 1)] as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters_start_at_zero() {
        let snapshot = IngestMetrics::new().snapshot();
        assert_eq!(snapshot.messages.received, 0);
        assert_eq!(snapshot.messages.unroutable_dropped, 0);
        assert_eq!(snapshot.subscriptions.reconciliations, 0);
        assert!(!snapshot.connection.connected);
    }

    #[test]
    fn test_message_counters() {
        let metrics = IngestMetrics::new();
        metrics.message_received();
        metrics.message_received();
        metrics.sensor_reading_stored();
        metrics.notification_created();
        metrics.unroutable_dropped();
        metrics.persistence_failed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages.received, 2);
        assert_eq!(snapshot.messages.sensor_readings_stored, 1);
        assert_eq!(snapshot.messages.notifications_created, 1);
        assert_eq!(snapshot.messages.unroutable_dropped, 1);
        assert_eq!(snapshot.messages.persistence_failures, 1);
    }

    #[test]
    fn test_connection_flag_follows_events() {
        let metrics = IngestMetrics::new();
        metrics.connection_established();
        assert!(metrics.snapshot().connection.connected);

        metrics.connection_lost();
        let snapshot = metrics.snapshot();
        assert!(!snapshot.connection.connected);
        assert_eq!(snapshot.connection.established, 1);
        assert_eq!(snapshot.connection.lost, 1);
    }

    #[test]
    fn test_handling_time_statistics() {
        let metrics = IngestMetrics::new();
        for ms in [10, 20, 30, 40, 50] {
            metrics.record_handling_time(Duration::from_millis(ms));
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages.avg_handling_ms, 30.0);
        assert_eq!(snapshot.messages.p50_handling_ms, 30.0);
        assert_eq!(snapshot.messages.p95_handling_ms, 50.0);
    }

    #[test]
    fn test_handling_time_window_is_bounded() {
        let metrics = IngestMetrics::new();
        for _ in 0..(MAX_TIMING_SAMPLES + 10) {
            metrics.record_handling_time(Duration::from_millis(1));
        }
        assert_eq!(
            metrics.handling_times.lock().unwrap().len(),
            MAX_TIMING_SAMPLES
        );
    }

    #[test]
    fn test_concurrent_updates() {
        let metrics = Arc::new(IngestMetrics::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        metrics.message_received();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(metrics.snapshot().messages.received, 1000);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = IngestMetrics::new();
        metrics.command_published();
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["commands"]["published"], 1);
    }
}
