//! Payload decoding
//!
//! Every inbound payload is decoded exactly once into a [`DecodedPayload`]; handlers
//! match on the tag instead of re-inspecting the raw bytes.

use super::entities::{DeviceStatus, ReadingValue};
use serde_json::Value;
use thiserror::Error;

/// Tagged result of decoding a raw payload
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedPayload {
    Numeric(f64),
    Text(String),
    Structured(Value),
}

/// Why a payload could not be used
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PayloadError {
    #[error("payload is not a JSON object: {0}")]
    NotJson(String),
    #[error("payload has no status field")]
    MissingStatus,
    #[error("unsupported status value: {0}")]
    InvalidStatus(String),
}

impl DecodedPayload {
    /// Decode a sensor payload: numeric when the trimmed text is a finite number, text otherwise
    pub fn sensor(raw: &[u8]) -> Self {
        let text = String::from_utf8_lossy(raw);
        match text.trim().parse::<f64>() {
            Ok(value) if value.is_finite() && !text.trim().is_empty() => {
                DecodedPayload::Numeric(value)
            }
            _ => DecodedPayload::Text(text.into_owned()),
        }
    }

    /// Decode a device status payload as a structured JSON value
    pub fn device(raw: &[u8]) -> Result<Self, PayloadError> {
        serde_json::from_slice::<Value>(raw)
            .map(DecodedPayload::Structured)
            .map_err(|e| PayloadError::NotJson(e.to_string()))
    }

    /// Reading value for scalar payloads
    pub fn reading_value(&self) -> Option<ReadingValue> {
        match self {
            DecodedPayload::Numeric(value) => Some(ReadingValue::Number(*value)),
            DecodedPayload::Text(value) => Some(ReadingValue::Text(value.clone())),
            DecodedPayload::Structured(_) => None,
        }
    }

    /// Extract the `status` field of a structured payload
    ///
    /// Accepts a boolean or the strings "ON"/"OFF" in any case; every other shape is rejected.
    pub fn device_status(&self) -> Result<DeviceStatus, PayloadError> {
        let object = match self {
            DecodedPayload::Structured(Value::Object(object)) => object,
            DecodedPayload::Structured(other) => {
                return Err(PayloadError::NotJson(format!("expected object, got {other}")))
            }
            DecodedPayload::Numeric(value) => {
                return Err(PayloadError::NotJson(value.to_string()))
            }
            DecodedPayload::Text(text) => return Err(PayloadError::NotJson(text.clone())),
        };

        match object.get("status") {
            None => Err(PayloadError::MissingStatus),
            Some(Value::Bool(on)) => Ok(DeviceStatus::from_bool(*on)),
            Some(Value::String(text)) => {
                DeviceStatus::parse(text).ok_or_else(|| PayloadError::InvalidStatus(text.clone()))
            }
            Some(other) => Err(PayloadError::InvalidStatus(other.to_string())),
        }
    }
}
