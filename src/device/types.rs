use std::fmt;
use std::time::Instant;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::device::constants::UNKNOWN_DEVICE_NAME;

/// Stable identifier of a peripheral, for example its hardware address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        DeviceId(value.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(value: String) -> Self {
        DeviceId(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
}

impl Device {
    pub fn new(id: impl Into<DeviceId>, name: Option<String>) -> Self {
        Device {
            id: id.into(),
            name: name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_string()),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// A device reported by the transport layer during a discovery sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub id: DeviceId,
    pub name: Option<String>,
}

impl From<DiscoveredDevice> for Device {
    fn from(value: DiscoveredDevice) -> Self {
        Device::new(value.id, value.name)
    }
}

/// What the transport layer hands back after a successful connect.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    pub name: Option<String>,
    pub connected_at: Instant,
}

impl TransportHandle {
    pub fn new(name: Option<String>) -> Self {
        TransportHandle { name, connected_at: Instant::now() }
    }
}

/// Connection state of one device. `Disconnected` is never stored: a device without an entry in
/// the registry is disconnected.
#[derive(Debug)]
pub enum DeviceState {
    Discovered,
    Connecting {
        // cancelled by disconnect / eviction while the attempt is in flight
        cancel: CancellationToken,
    },
    Connected {
        handle: TransportHandle,
        // tells this connection apart from earlier and later connections of the same device
        link: u64,
        notifications: Option<CancellationToken>,
    },
}

impl DeviceState {
    pub fn kind(&self) -> DeviceStateKind {
        match self {
            DeviceState::Discovered => DeviceStateKind::Discovered,
            DeviceState::Connecting { .. } => DeviceStateKind::Connecting,
            DeviceState::Connected { .. } => DeviceStateKind::Connected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStateKind {
    Discovered,
    Connecting,
    Connected,
}

/// Commands understood by the band. Serialized as a single byte equal to the discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OutboundCommand {
    ToggleDataCollection = 1,
    ToggleCalibration = 2,
    ToggleLowPowerMode = 3,
}

impl OutboundCommand {
    pub const ALL: [OutboundCommand; 3] = [
        OutboundCommand::ToggleDataCollection,
        OutboundCommand::ToggleCalibration,
        OutboundCommand::ToggleLowPowerMode,
    ];

    pub fn discriminant(self) -> u8 {
        self as u8
    }

    #[cfg(test)]
    pub fn from_discriminant(value: u8) -> Option<OutboundCommand> {
        OutboundCommand::ALL.into_iter().find(|command| command.discriminant() == value)
    }
}

impl fmt::Display for OutboundCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            OutboundCommand::ToggleDataCollection => "toggle data collection",
            OutboundCommand::ToggleCalibration => "toggle calibration",
            OutboundCommand::ToggleLowPowerMode => "toggle low power mode",
        };

        write!(f, "{}", result)
    }
}

/// A frame queued for the write characteristic. `payload` is reserved by the protocol and
/// currently never put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub command: OutboundCommand,
    pub payload: String,
}

impl From<OutboundCommand> for OutboundMessage {
    fn from(command: OutboundCommand) -> Self {
        OutboundMessage { command, payload: String::new() }
    }
}

/// State changes reported by the band over the notify characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    CalibrationFailed,
    CalibrationStarted,
    CalibrationSucceeded,
    CollectionStarted,
    CollectionStopped,
    EnteredLowPowerMode,
    ExitedLowPowerMode,
    Custom(String),
}

impl fmt::Display for InboundEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InboundEvent::CalibrationFailed => write!(f, "calibration failed"),
            InboundEvent::CalibrationStarted => write!(f, "calibration started"),
            InboundEvent::CalibrationSucceeded => write!(f, "calibration succeeded"),
            InboundEvent::CollectionStarted => write!(f, "data collection started"),
            InboundEvent::CollectionStopped => write!(f, "data collection stopped"),
            InboundEvent::EnteredLowPowerMode => write!(f, "entered low power mode"),
            InboundEvent::ExitedLowPowerMode => write!(f, "exited low power mode"),
            InboundEvent::Custom(text) => write!(f, "{:?}", text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEvent {
    pub id: DeviceId,
    pub event: InboundEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectCause {
    UserInitiated,
    MonitorDetected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectNotice {
    pub device: Device,
    pub cause: DisconnectCause,
}
