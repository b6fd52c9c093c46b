//! Error taxonomy for the routing and ingestion core
//!
//! Transport failures are reported to callers, unroutable messages are soft misses,
//! persistence failures mark the ingestion attempt as failed, and reconciliation
//! failures name the topics that did not reach their desired state.

use crate::config::ConfigError;
use crate::domain::{PayloadError, Topic};
use crate::storage::StorageError;
use crate::transport::mqtt::MqttError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Processing stage at which a persistence call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ResolveSensor,
    ResolveDevice,
    StoreReading,
    LoadSensorProfile,
    StoreNotification,
    LoadMode,
    StoreActivityLog,
    ResolveOwner,
    LoadFocusTopics,
    ApplyCommand,
    OpenStore,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::ResolveSensor => "resolve_sensor",
            Stage::ResolveDevice => "resolve_device",
            Stage::StoreReading => "store_reading",
            Stage::LoadSensorProfile => "load_sensor_profile",
            Stage::StoreNotification => "store_notification",
            Stage::LoadMode => "load_mode",
            Stage::StoreActivityLog => "store_activity_log",
            Stage::ResolveOwner => "resolve_owner",
            Stage::LoadFocusTopics => "load_focus_topics",
            Stage::ApplyCommand => "apply_command",
            Stage::OpenStore => "open_store",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the ingestion core
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Transport error: {0}")]
    Transport(#[from] MqttError),

    #[error("Unroutable message on topic '{topic}': {reason}")]
    Unroutable { topic: Topic, reason: String },

    #[error("Malformed payload on topic '{topic}': {source}")]
    MalformedPayload {
        topic: Topic,
        #[source]
        source: PayloadError,
    },

    #[error("Persistence failed at stage {stage}: {source}")]
    Persistence {
        stage: Stage,
        #[source]
        source: StorageError,
    },

    #[error("Reconciliation incomplete, {} topic(s) not in desired state: {}", failed.len(), failed.join(", "))]
    Reconciliation { failed: Vec<Topic> },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid command: {message}")]
    InvalidCommand { message: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
}

impl IngestError {
    /// Wrap a storage failure with the stage it happened in
    pub fn persistence(stage: Stage, source: StorageError) -> Self {
        Self::Persistence { stage, source }
    }

    pub fn unroutable<T: Into<Topic>, S: Into<String>>(topic: T, reason: S) -> Self {
        Self::Unroutable {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_command<S: Into<String>>(message: S) -> Self {
        Self::InvalidCommand {
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    /// Soft misses are logged and dropped; everything else is a real failure
    pub fn is_soft_miss(&self) -> bool {
        matches!(
            self,
            IngestError::Unroutable { .. } | IngestError::MalformedPayload { .. }
        )
    }

    /// Message safe to hand back to an external caller
    pub fn public_message(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("secret pattern is valid")
});

static SENSITIVE_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("path pattern is valid")
});

const MAX_PUBLIC_MESSAGE_LEN: usize = 500;

/// Redact credentials and sensitive paths, and cap the length
pub fn sanitize_error_message(message: &str) -> String {
    let sanitized = SECRET_PATTERN.replace_all(message, "${1}=***");
    let mut sanitized = SENSITIVE_PATH_PATTERN
        .replace_all(&sanitized, "/***REDACTED***/")
        .into_owned();

    if sanitized.len() > MAX_PUBLIC_MESSAGE_LEN {
        let suffix = "...[truncated]";
        let mut cut = MAX_PUBLIC_MESSAGE_LEN - suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(suffix);
    }

    sanitized
}

/// Result type for ingestion core operations
pub type IngestResult<T> = Result<T, IngestError>;
