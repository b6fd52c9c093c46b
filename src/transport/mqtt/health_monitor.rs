//! Pure health monitoring and reconnection logic for the MQTT client
//!
//! This module contains pure functions for reconnection decisions and
//! connection state transitions.

use super::connection::{ConnectionState, ReconnectConfig};
use std::time::Duration;
use tracing::{error, info, warn};

/// Pure health monitoring and reconnection decision logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Determine if reconnection should be attempted
    pub fn should_attempt_reconnection(
        current_attempts: u32,
        config: &ReconnectConfig,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        if let Some(max_attempts) = config.max_attempts {
            if current_attempts >= max_attempts {
                return ReconnectionDecision::AbortMaxAttemptsExceeded;
            }
        }

        let attempt = current_attempts.saturating_add(1);
        ReconnectionDecision::Proceed {
            attempt,
            delay_ms: config.calculate_backoff_delay(attempt),
        }
    }

    /// How long `connect` waits for the first ConnAck or failure
    pub fn calculate_connection_timeout(config: &ReconnectConfig) -> Duration {
        match config.calculate_max_total_time() {
            Some(max_total_time) => Duration::from_millis(max_total_time + 30000),
            None => Duration::from_secs(60),
        }
    }

    /// Determine next state after a connection event
    pub fn determine_next_state(event: ConnectionEvent) -> ConnectionState {
        match event {
            ConnectionEvent::ConnAckReceived => ConnectionState::Connected,
            ConnectionEvent::DisconnectedByBroker => {
                ConnectionState::Disconnected("Broker disconnected".to_string())
            }
            ConnectionEvent::NetworkError(error) => ConnectionState::Disconnected(error),
            ConnectionEvent::ReconnectionStarted(attempt) => ConnectionState::Reconnecting(attempt),
            ConnectionEvent::PermanentFailure(reason) => {
                ConnectionState::PermanentlyDisconnected(reason)
            }
            ConnectionEvent::ClientClosed => {
                ConnectionState::Disconnected("Client disconnected".to_string())
            }
        }
    }

    pub fn can_publish(state: &ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }

    pub fn can_subscribe(state: &ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }

    /// Classify a state change as seen by subscription bookkeeping
    pub fn classify_transition(from: &ConnectionState, to: &ConnectionState) -> LinkTransition {
        match (from, to) {
            (_, ConnectionState::Connected) => LinkTransition::Established,
            (ConnectionState::Connected, _) => LinkTransition::Lost,
            _ => LinkTransition::Unchanged,
        }
    }

    /// Log a connection state transition
    pub fn log_state_transition(from: &ConnectionState, to: &ConnectionState) {
        match (from, to) {
            (ConnectionState::Reconnecting(_), ConnectionState::Connected) => {
                info!("Reconnection successful");
            }
            (_, ConnectionState::Connected) => {
                info!("MQTT connection established");
            }
            (ConnectionState::Connected, ConnectionState::Disconnected(reason)) => {
                warn!(reason = %reason, "MQTT connection lost");
            }
            (_, ConnectionState::Reconnecting(attempt)) => {
                info!(attempt, "Starting reconnection attempt");
            }
            (_, ConnectionState::PermanentlyDisconnected(reason)) => {
                error!(reason = %reason, "MQTT connection permanently failed");
            }
            _ => {
                info!("MQTT connection state: {} -> {}", from, to);
            }
        }
    }

    /// Validate reconnection policy
    pub fn validate_reconnect_config(config: &ReconnectConfig) -> Result<(), String> {
        if config.max_attempts == Some(0) {
            return Err("max_attempts must be greater than 0 or None for unlimited".to_string());
        }
        if config.interval_ms == 0 {
            return Err("interval_ms must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    Proceed { attempt: u32, delay_ms: u64 },
    AbortShutdownRequested,
    AbortMaxAttemptsExceeded,
}

/// Connection events that trigger state transitions
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    ConnAckReceived,
    DisconnectedByBroker,
    NetworkError(String),
    ReconnectionStarted(u32),
    PermanentFailure(String),
    ClientClosed,
}

/// What a state change means for live subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkTransition {
    /// A fresh session exists; subscriptions must be re-asserted
    Established,
    /// The session is gone along with its subscriptions
    Lost,
    Unchanged,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_attempt_reconnection() {
        let config = ReconnectConfig::default();

        let decision = HealthMonitor::should_attempt_reconnection(0, &config, false);
        assert_eq!(
            decision,
            ReconnectionDecision::Proceed {
                attempt: 1,
                delay_ms: 1000
            }
        );

        let decision = HealthMonitor::should_attempt_reconnection(0, &config, true);
        assert_eq!(decision, ReconnectionDecision::AbortShutdownRequested);

        let decision = HealthMonitor::should_attempt_reconnection(41, &config, false);
        assert_eq!(
            decision,
            ReconnectionDecision::Proceed {
                attempt: 42,
                delay_ms: 1000
            }
        );

        let limited = ReconnectConfig {
            max_attempts: Some(5),
            interval_ms: 100,
        };
        let decision = HealthMonitor::should_attempt_reconnection(5, &limited, false);
        assert_eq!(decision, ReconnectionDecision::AbortMaxAttemptsExceeded);
    }

    #[test]
    fn test_calculate_connection_timeout() {
        let unlimited = ReconnectConfig::default();
        assert_eq!(
            HealthMonitor::calculate_connection_timeout(&unlimited),
            Duration::from_secs(60)
        );

        let limited = ReconnectConfig {
            max_attempts: Some(4),
            interval_ms: 250,
        };
        assert_eq!(
            HealthMonitor::calculate_connection_timeout(&limited),
            Duration::from_millis(1000 + 30000)
        );
    }

    #[test]
    fn test_determine_next_state() {
        assert_eq!(
            HealthMonitor::determine_next_state(ConnectionEvent::ConnAckReceived),
            ConnectionState::Connected
        );
        assert_eq!(
            HealthMonitor::determine_next_state(ConnectionEvent::DisconnectedByBroker),
            ConnectionState::Disconnected("Broker disconnected".to_string())
        );
        assert_eq!(
            HealthMonitor::determine_next_state(ConnectionEvent::NetworkError(
                "timeout".to_string()
            )),
            ConnectionState::Disconnected("timeout".to_string())
        );
        assert_eq!(
            HealthMonitor::determine_next_state(ConnectionEvent::ReconnectionStarted(2)),
            ConnectionState::Reconnecting(2)
        );
        assert_eq!(
            HealthMonitor::determine_next_state(ConnectionEvent::PermanentFailure(
                "max attempts".to_string()
            )),
            ConnectionState::PermanentlyDisconnected("max attempts".to_string())
        );
    }

    #[test]
    fn test_only_connected_allows_operations() {
        let states = [
            ConnectionState::Idle,
            ConnectionState::Connecting,
            ConnectionState::Disconnected("test".to_string()),
            ConnectionState::Reconnecting(1),
            ConnectionState::PermanentlyDisconnected("test".to_string()),
        ];
        for state in &states {
            assert!(!HealthMonitor::can_publish(state));
            assert!(!HealthMonitor::can_subscribe(state));
        }
        assert!(HealthMonitor::can_publish(&ConnectionState::Connected));
        assert!(HealthMonitor::can_subscribe(&ConnectionState::Connected));
    }

    #[test]
    fn test_classify_transition() {
        use ConnectionState::*;

        assert_eq!(
            HealthMonitor::classify_transition(&Connecting, &Connected),
            LinkTransition::Established
        );
        assert_eq!(
            HealthMonitor::classify_transition(&Connected, &Connected),
            LinkTransition::Established
        );
        assert_eq!(
            HealthMonitor::classify_transition(&Connected, &Disconnected("io".to_string())),
            LinkTransition::Lost
        );
        assert_eq!(
            HealthMonitor::classify_transition(
                &Disconnected("io".to_string()),
                &Reconnecting(1)
            ),
            LinkTransition::Unchanged
        );
    }

    #[test]
    fn test_validate_reconnect_config() {
        assert!(HealthMonitor::validate_reconnect_config(&ReconnectConfig::default()).is_ok());
        assert!(HealthMonitor::validate_reconnect_config(&ReconnectConfig {
            max_attempts: Some(0),
            interval_ms: 100,
        })
        .is_err());
        assert!(HealthMonitor::validate_reconnect_config(&ReconnectConfig {
            max_attempts: None,
            interval_ms: 0,
        })
        .is_err());
    }
}
