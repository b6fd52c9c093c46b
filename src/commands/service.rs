//! Device command service
//!
//! Resolves the target device, publishes the command and, only once the
//! publish succeeded, applies the matching persistent change.

use super::messages::{DeviceCommand, ParameterValue, MAX_SCHEDULE_INDEX};
use super::publisher::{CommandOutcome, CommandPublisher};
use crate::domain::{ControlMode, DeviceId, DeviceRecord, SensorKind, UserId};
use crate::error::{IngestError, IngestResult, Stage};
use crate::storage::Store;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, Instrument};

/// Controllable device families, derived from the free-form device type label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Fan,
    Door,
    Led,
    Buzzer,
}

impl DeviceKind {
    pub fn from_device_type(device_type: &str) -> Option<Self> {
        let device_type = device_type.to_lowercase();
        if device_type.contains("fan") {
            Some(DeviceKind::Fan)
        } else if device_type.contains("led") {
            Some(DeviceKind::Led)
        } else if device_type.contains("buzzer") {
            Some(DeviceKind::Buzzer)
        } else if device_type.contains("door") {
            Some(DeviceKind::Door)
        } else {
            None
        }
    }

    /// Sensor whose edge threshold drives this device in auto mode
    pub fn paired_sensor(self) -> SensorKind {
        match self {
            DeviceKind::Fan => SensorKind::Temperature,
            DeviceKind::Door => SensorKind::Ultrasonic,
            DeviceKind::Led => SensorKind::Light,
            DeviceKind::Buzzer => SensorKind::Gas,
        }
    }

    pub fn supports_schedule(self) -> bool {
        matches!(self, DeviceKind::Fan | DeviceKind::Led)
    }

    /// Setting field for a plain numeric parameter
    fn parameter(self, value: i64) -> Option<ParameterValue> {
        match self {
            DeviceKind::Fan => Some(ParameterValue::Speed(value)),
            DeviceKind::Led => Some(ParameterValue::Brightness(value)),
            DeviceKind::Buzzer => Some(ParameterValue::Amplitude(value)),
            DeviceKind::Door => None,
        }
    }
}

/// One schedule slot as requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub hour: u8,
    pub minute: u8,
    pub status: bool,
    pub value: i64,
    pub index: u8,
}

impl ScheduleEntry {
    fn validate(&self) -> IngestResult<()> {
        if self.hour > 23 {
            return Err(IngestError::invalid_command(format!(
                "hour must be 0-23, got {}",
                self.hour
            )));
        }
        if self.minute > 59 {
            return Err(IngestError::invalid_command(format!(
                "minute must be 0-59, got {}",
                self.minute
            )));
        }
        validate_index(self.index)
    }
}

fn validate_index(index: u8) -> IngestResult<()> {
    if index > MAX_SCHEDULE_INDEX {
        return Err(IngestError::invalid_command(format!(
            "schedule index must be 0-{MAX_SCHEDULE_INDEX}, got {index}"
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct DeviceCommandService {
    store: Arc<dyn Store>,
    publisher: CommandPublisher,
}

impl DeviceCommandService {
    pub fn new(store: Arc<dyn Store>, publisher: CommandPublisher) -> Self {
        Self { store, publisher }
    }

    pub fn publisher(&self) -> &CommandPublisher {
        &self.publisher
    }

    async fn device(&self, device_id: DeviceId) -> IngestResult<DeviceRecord> {
        self.store
            .find_device(device_id)
            .await
            .map_err(|e| IngestError::persistence(Stage::ResolveDevice, e))?
            .ok_or_else(|| IngestError::not_found("device", device_id))
    }

    fn kind_of(device: &DeviceRecord) -> IngestResult<DeviceKind> {
        DeviceKind::from_device_type(&device.device_type).ok_or_else(|| {
            IngestError::invalid_command(format!(
                "unsupported device type '{}'",
                device.device_type
            ))
        })
    }

    async fn send(&self, device: &DeviceRecord, command: &DeviceCommand) -> IngestResult<CommandOutcome> {
        self.publisher
            .publish(&device.topic, command)
            .instrument(crate::command_span!(device_id = device.id, action = command.action()))
            .await
    }

    /// Switch a device between manual and auto control
    ///
    /// Schedule mode is entered through [`Self::add_schedule`] only.
    pub async fn set_mode(
        &self,
        device_id: DeviceId,
        mode: ControlMode,
        user_id: UserId,
    ) -> IngestResult<CommandOutcome> {
        if mode == ControlMode::Schedule {
            return Err(IngestError::invalid_command(
                "mode must be MANUAL (0) or AUTO (2)",
            ));
        }

        let device = self.device(device_id).await?;
        let outcome = self
            .send(&device, &DeviceCommand::SetMode { mode: mode.code() })
            .await?;

        self.store
            .record_mode(device.id, mode, user_id, Utc::now())
            .await
            .map_err(|e| IngestError::persistence(Stage::ApplyCommand, e))?;
        info!(device_id, %mode, user_id, "Device mode changed");
        Ok(outcome)
    }

    /// Same as [`Self::set_mode`], taking the numeric mode code used on the wire
    pub async fn set_mode_code(
        &self,
        device_id: DeviceId,
        code: u8,
        user_id: UserId,
    ) -> IngestResult<CommandOutcome> {
        let mode = ControlMode::from_code(code)
            .ok_or_else(|| IngestError::invalid_command(format!("unknown mode code {code}")))?;
        self.set_mode(device_id, mode, user_id).await
    }

    pub async fn manual_control(
        &self,
        device_id: DeviceId,
        status: bool,
    ) -> IngestResult<CommandOutcome> {
        let device = self.device(device_id).await?;
        self.send(&device, &DeviceCommand::ManualControl { status })
            .await
    }

    /// Push a new auto-mode threshold and store it on the paired sensor
    pub async fn set_threshold(
        &self,
        device_id: DeviceId,
        threshold: f64,
    ) -> IngestResult<CommandOutcome> {
        if !threshold.is_finite() {
            return Err(IngestError::invalid_command("threshold must be a finite number"));
        }

        let device = self.device(device_id).await?;
        let sensor_kind = Self::kind_of(&device)?.paired_sensor();
        let sensor_id = self
            .store
            .find_sensor_for_device(device.home_id, device.room_id, sensor_kind)
            .await
            .map_err(|e| IngestError::persistence(Stage::ApplyCommand, e))?
            .ok_or_else(|| {
                IngestError::invalid_command(format!(
                    "no {} in the same room as device {}",
                    sensor_kind.canonical_name(),
                    device.id
                ))
            })?;

        let outcome = self
            .send(&device, &DeviceCommand::SetThreshold { threshold })
            .await?;

        self.store
            .update_sensor_edge(sensor_id, &threshold.to_string())
            .await
            .map_err(|e| IngestError::persistence(Stage::ApplyCommand, e))?;
        info!(device_id, sensor_id, threshold, "Threshold updated");
        Ok(outcome)
    }

    /// Set the kind-specific parameter (speed, brightness, amplitude, door password flag)
    pub async fn set_parameter(
        &self,
        device_id: DeviceId,
        value: i64,
    ) -> IngestResult<CommandOutcome> {
        let device = self.device(device_id).await?;
        let kind = Self::kind_of(&device)?;

        let (command, stored) = match kind.parameter(value) {
            Some(value_field) => (
                DeviceCommand::SetParameter { value: value_field },
                value.to_string(),
            ),
            None => {
                let is_set_password = value != 0;
                (
                    DeviceCommand::SetPassword { is_set_password },
                    is_set_password.to_string(),
                )
            }
        };

        let outcome = self.send(&device, &command).await?;
        self.store
            .update_device_parameter(device.id, &stored)
            .await
            .map_err(|e| IngestError::persistence(Stage::ApplyCommand, e))?;
        Ok(outcome)
    }

    /// Put a device in schedule mode and program one schedule slot
    pub async fn add_schedule(
        &self,
        device_id: DeviceId,
        entry: ScheduleEntry,
        user_id: UserId,
    ) -> IngestResult<CommandOutcome> {
        entry.validate()?;
        let device = self.device(device_id).await?;
        let kind = Self::kind_of(&device)?;
        let value = match kind.parameter(entry.value) {
            Some(value) if kind.supports_schedule() => value,
            _ => {
                return Err(IngestError::invalid_command(format!(
                    "device type '{}' does not support schedules",
                    device.device_type
                )))
            }
        };

        self.send(
            &device,
            &DeviceCommand::SetMode {
                mode: ControlMode::Schedule.code(),
            },
        )
        .await?;
        self.store
            .record_mode(device.id, ControlMode::Schedule, user_id, Utc::now())
            .await
            .map_err(|e| IngestError::persistence(Stage::ApplyCommand, e))?;

        let outcome = self
            .send(
                &device,
                &DeviceCommand::AddSchedule {
                    hour: entry.hour,
                    minute: entry.minute,
                    status: entry.status,
                    index: entry.index,
                    value,
                },
            )
            .await?;
        info!(device_id, index = entry.index, "Schedule slot programmed");
        Ok(outcome)
    }

    pub async fn delete_schedule(
        &self,
        device_id: DeviceId,
        index: u8,
    ) -> IngestResult<CommandOutcome> {
        validate_index(index)?;
        let device = self.device(device_id).await?;
        self.send(&device, &DeviceCommand::DeleteSchedule { index })
            .await
    }
}
