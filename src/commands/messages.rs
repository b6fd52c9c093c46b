//! Wire format of outbound device commands
//!
//! Every command is a JSON object with an `action` discriminator, published on
//! the device's own topic.

use crate::transport::MqttError;
use serde::{Deserialize, Serialize};

/// Highest schedule slot a device firmware accepts
pub const MAX_SCHEDULE_INDEX: u8 = 4;

/// Kind-specific setting carried by `set_parameter` and `add_schedule`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterValue {
    Speed(i64),
    Brightness(i64),
    Amplitude(i64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DeviceCommand {
    /// 0 = manual, 1 = schedule, 2 = auto
    SetMode { mode: u8 },
    ManualControl { status: bool },
    SetThreshold { threshold: f64 },
    SetParameter {
        #[serde(flatten)]
        value: ParameterValue,
    },
    SetPassword { is_set_password: bool },
    AddSchedule {
        hour: u8,
        minute: u8,
        status: bool,
        index: u8,
        #[serde(flatten)]
        value: ParameterValue,
    },
    DeleteSchedule { index: u8 },
}

impl DeviceCommand {
    pub fn action(&self) -> &'static str {
        match self {
            DeviceCommand::SetMode { .. } => "set_mode",
            DeviceCommand::ManualControl { .. } => "manual_control",
            DeviceCommand::SetThreshold { .. } => "set_threshold",
            DeviceCommand::SetParameter { .. } => "set_parameter",
            DeviceCommand::SetPassword { .. } => "set_password",
            DeviceCommand::AddSchedule { .. } => "add_schedule",
            DeviceCommand::DeleteSchedule { .. } => "delete_schedule",
        }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, MqttError> {
        serde_json::to_vec(self).map_err(MqttError::SerializationError)
    }
}
