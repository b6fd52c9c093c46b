//! Outbound device commands

pub mod messages;
pub mod publisher;
pub mod service;

pub use messages::{DeviceCommand, ParameterValue, MAX_SCHEDULE_INDEX};
pub use publisher::{CommandOutcome, CommandPublisher};
pub use service::{DeviceCommandService, DeviceKind, ScheduleEntry};
