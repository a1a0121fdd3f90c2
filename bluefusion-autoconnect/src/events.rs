use chrono::{DateTime, Utc};

use bluefusion_types::Address;

/// The complete, closed set of event types the manager emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    ConnectionAttempt,
    ConnectionSuccess,
    ConnectionFailed,
    ConnectionTimeout,
    ConnectionError,
    HealthCheckSuccess,
    HealthCheckTimeout,
    HealthCheckFailed,
    ConnectionStale,
    DevicePaused,
    DeviceEnabled,
    DeviceDisabled,
    StateSaved,
    StateLoaded,
    StateError,
    StabilityReport,
    ManagerError,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::ConnectionAttempt => "connection_attempt",
            EventKind::ConnectionSuccess => "connection_success",
            EventKind::ConnectionFailed => "connection_failed",
            EventKind::ConnectionTimeout => "connection_timeout",
            EventKind::ConnectionError => "connection_error",
            EventKind::HealthCheckSuccess => "health_check_success",
            EventKind::HealthCheckTimeout => "health_check_timeout",
            EventKind::HealthCheckFailed => "health_check_failed",
            EventKind::ConnectionStale => "connection_stale",
            EventKind::DevicePaused => "device_paused",
            EventKind::DeviceEnabled => "device_enabled",
            EventKind::DeviceDisabled => "device_disabled",
            EventKind::StateSaved => "state_saved",
            EventKind::StateLoaded => "state_loaded",
            EventKind::StateError => "state_error",
            EventKind::StabilityReport => "stability_report",
            EventKind::ManagerError => "manager_error",
        }
    }
}

/// One entry on the event stream: `{timestamp, address|"manager",
/// event_type, data}`.
#[derive(Debug, Clone)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub address: Option<Address>,
    pub kind: EventKind,
    pub data: String,
}

impl Event {
    pub fn new(address: Option<Address>, kind: EventKind, data: impl Into<String>) -> Self {
        Event { timestamp: Utc::now(), address, kind, data: data.into() }
    }

    /// `"manager"` when the event isn't tied to a specific device.
    pub fn subject(&self) -> String {
        self.address.map(|a| a.to_string()).unwrap_or_else(|| "manager".to_string())
    }
}
