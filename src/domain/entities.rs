//! Entity and record types for the smart-home relations this core touches

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type UserId = i64;
pub type HomeId = i64;
pub type RoomId = i64;
pub type DeviceId = i64;
pub type SensorId = i64;

/// Pub/sub routing key and external entity identifier
pub type Topic = String;

/// The (user, home) pair whose topics are currently subscribed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Focus {
    pub user_id: UserId,
    pub home_id: HomeId,
}

impl Focus {
    pub fn new(user_id: UserId, home_id: HomeId) -> Self {
        Self { user_id, home_id }
    }
}

impl fmt::Display for Focus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user {} / home {}", self.user_id, self.home_id)
    }
}

/// Sensor kind, derived from the sensor's configured name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Temperature,
    Humidity,
    Gas,
    Light,
    /// Reports distance, not a hazard level
    Ultrasonic,
    Other,
}

impl SensorKind {
    /// Classify a sensor name such as "Temperature Sensor"
    pub fn from_name(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        if name.contains("temperature") {
            SensorKind::Temperature
        } else if name.contains("humidity") {
            SensorKind::Humidity
        } else if name.contains("gas") {
            SensorKind::Gas
        } else if name.contains("light") {
            SensorKind::Light
        } else if name.contains("ultrasonic") || name.contains("proximity") {
            SensorKind::Ultrasonic
        } else {
            SensorKind::Other
        }
    }

    /// Canonical sensor name used when pairing devices with sensors
    pub fn canonical_name(self) -> &'static str {
        match self {
            SensorKind::Temperature => "Temperature Sensor",
            SensorKind::Humidity => "Humidity Sensor",
            SensorKind::Gas => "Gas Sensor",
            SensorKind::Light => "Light Sensor",
            SensorKind::Ultrasonic => "Ultrasonic Sensor",
            SensorKind::Other => "Sensor",
        }
    }

    /// Unit appended to values in alert messages
    pub fn unit(self) -> &'static str {
        match self {
            SensorKind::Temperature => "°C",
            SensorKind::Humidity => "%",
            SensorKind::Gas => "ppm",
            SensorKind::Light => "lux",
            SensorKind::Ultrasonic | SensorKind::Other => "",
        }
    }

    /// Whether a reading above the edge threshold means something is wrong
    pub fn supports_alerting(self) -> bool {
        !matches!(self, SensorKind::Ultrasonic)
    }
}

/// Observed device power state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceStatus {
    On,
    Off,
}

impl DeviceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceStatus::On => "ON",
            DeviceStatus::Off => "OFF",
        }
    }

    pub fn from_bool(on: bool) -> Self {
        if on {
            DeviceStatus::On
        } else {
            DeviceStatus::Off
        }
    }

    /// Parse "ON"/"OFF" in any letter case
    pub fn parse(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("on") {
            Some(DeviceStatus::On)
        } else if value.eq_ignore_ascii_case("off") {
            Some(DeviceStatus::Off)
        } else {
            None
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Control regime assigned to a device by the command layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ControlMode {
    #[default]
    Manual,
    Schedule,
    Auto,
}

impl ControlMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ControlMode::Manual => "MANUAL",
            ControlMode::Schedule => "SCHEDULE",
            ControlMode::Auto => "AUTO",
        }
    }

    /// Numeric code understood by device firmware
    pub fn code(self) -> u8 {
        match self {
            ControlMode::Manual => 0,
            ControlMode::Schedule => 1,
            ControlMode::Auto => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ControlMode::Manual),
            1 => Some(ControlMode::Schedule),
            2 => Some(ControlMode::Auto),
            _ => None,
        }
    }

    /// Parse a stored mode label in any letter case
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "MANUAL" => Some(ControlMode::Manual),
            "SCHEDULE" => Some(ControlMode::Schedule),
            "AUTO" => Some(ControlMode::Auto),
            _ => None,
        }
    }
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device row as seen by this core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub name: String,
    /// Free-form type label, e.g. "Mini fan", "Led"
    pub device_type: String,
    pub topic: Topic,
    pub home_id: HomeId,
    pub room_id: Option<RoomId>,
}

/// Sensor metadata needed for threshold alerting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorProfile {
    pub id: SensorId,
    pub name: String,
    /// Display type shown to users, e.g. "Temperature"
    pub display_type: String,
    /// Raw configured edge threshold; may be absent or non-numeric
    pub edge: Option<String>,
    pub owner: Option<UserId>,
}

impl SensorProfile {
    pub fn kind(&self) -> SensorKind {
        SensorKind::from_name(&self.name)
    }

    /// Edge threshold if it parses as a finite number
    pub fn edge_threshold(&self) -> Option<f64> {
        self.edge
            .as_deref()
            .and_then(|edge| edge.trim().parse::<f64>().ok())
            .filter(|edge| edge.is_finite())
    }
}

/// Stored reading type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Number,
    Text,
}

impl DataType {
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Number => "Number",
            DataType::Text => "Text",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Number" => Some(DataType::Number),
            "Text" | "String" => Some(DataType::Text),
            _ => None,
        }
    }
}

/// Reading value, tagged once at decode time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReadingValue {
    Number(f64),
    Text(String),
}

impl ReadingValue {
    pub fn data_type(&self) -> DataType {
        match self {
            ReadingValue::Number(_) => DataType::Number,
            ReadingValue::Text(_) => DataType::Text,
        }
    }

    pub fn num_data(&self) -> Option<f64> {
        match self {
            ReadingValue::Number(value) => Some(*value),
            ReadingValue::Text(_) => None,
        }
    }

    pub fn text_data(&self) -> Option<&str> {
        match self {
            ReadingValue::Number(_) => None,
            ReadingValue::Text(value) => Some(value),
        }
    }
}

/// Sensor reading to be persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSensorReading {
    pub sensor_id: SensorId,
    pub time: DateTime<Utc>,
    pub value: ReadingValue,
}

/// Mode label written for devices that never had a mode assigned
pub const UNASSIGNED_MODE_LABEL: &str = "Manual";

/// Observed device transition to be persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewActivityLog {
    pub device_id: DeviceId,
    /// Latest assigned mode, `None` when the device has no mode history
    pub mode: Option<ControlMode>,
    pub status: DeviceStatus,
    pub time: DateTime<Utc>,
}

impl NewActivityLog {
    /// Label stored in the log's mode column
    pub fn mode_label(&self) -> &'static str {
        self.mode.map_or(UNASSIGNED_MODE_LABEL, ControlMode::as_str)
    }
}

/// Entity a notification refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationTarget {
    Sensor(SensorId),
    Device(DeviceId),
}

impl NotificationTarget {
    /// Notification type label
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationTarget::Sensor(_) => "Sensor",
            NotificationTarget::Device(_) => "Device",
        }
    }
}

/// Derived alert record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNotification {
    pub user_id: UserId,
    pub target: NotificationTarget,
    pub message: String,
    pub time: DateTime<Utc>,
    pub is_read: bool,
}

impl NewNotification {
    pub fn unread(
        user_id: UserId,
        target: NotificationTarget,
        message: String,
        time: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            target,
            message,
            time,
            is_read: false,
        }
    }
}

/// A persisted record together with its generated identifier
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stored<T> {
    pub id: i64,
    pub record: T,
}
