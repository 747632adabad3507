use std::time::Instant;
use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;

use crate::device::types::{Device, DeviceId, DeviceState, DeviceStateKind, TransportHandle};

#[derive(Debug)]
pub struct DeviceEntry {
    pub device: Device,
    pub state: DeviceState,
}

impl DeviceEntry {
    pub fn connected_at(&self) -> Option<Instant> {
        match &self.state {
            DeviceState::Connected { handle, .. } => Some(handle.connected_at),
            _ => None,
        }
    }

    /// Cancels whatever is still running on behalf of this device: a pending connect attempt or
    /// the notification reader.
    pub fn cancel_pending(&self) {
        match &self.state {
            DeviceState::Discovered => {},
            DeviceState::Connecting { cancel } => cancel.cancel(),
            DeviceState::Connected { notifications, .. } => {
                if let Some(token) = notifications {
                    token.cancel();
                }
            },
        }
    }
}

/// Every known device, keyed by identity. Each identity has exactly one entry and therefore
/// exactly one state. Insertion order is kept so that snapshots are stable.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: IndexMap<DeviceId, DeviceEntry>,
    last_link: u64,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        DeviceRegistry::default()
    }

    pub fn state(&self, id: &DeviceId) -> Option<DeviceStateKind> {
        self.devices.get(id).map(|entry| entry.state.kind())
    }

    /// The link number of a connected device. Every successful connect gets a new one.
    pub fn link(&self, id: &DeviceId) -> Option<u64> {
        match self.devices.get(id).map(|entry| &entry.state) {
            Some(DeviceState::Connected { link, .. }) => Some(*link),
            _ => None,
        }
    }

    pub fn is_connecting(&self, id: &DeviceId) -> bool {
        self.state(id) == Some(DeviceStateKind::Connecting)
    }

    pub fn is_connected(&self, id: &DeviceId) -> bool {
        self.state(id) == Some(DeviceStateKind::Connected)
    }

    /// Records a sighting. Returns false if the device is connecting or connected, in which case
    /// nothing changes.
    pub fn mark_available(&mut self, device: Device) -> bool {
        match self.devices.get_mut(&device.id) {
            Some(entry) => match entry.state {
                DeviceState::Discovered => {
                    entry.device.name = device.name;
                    true
                },
                _ => false,
            },
            None => {
                self.devices.insert(device.id.clone(), DeviceEntry { device, state: DeviceState::Discovered });
                true
            },
        }
    }

    /// Forgets every device that is only discovered.
    pub fn clear_available(&mut self) {
        self.devices.retain(|_, entry| !matches!(entry.state, DeviceState::Discovered));
    }

    /// Returns false, without changing anything, if the device is already connecting or
    /// connected.
    pub fn promote_to_connecting(&mut self, device: &Device, cancel: CancellationToken) -> bool {
        match self.devices.get_mut(&device.id) {
            Some(entry) => match entry.state {
                DeviceState::Discovered => {
                    entry.state = DeviceState::Connecting { cancel };
                    true
                },
                _ => false,
            },
            None => {
                self.devices.insert(
                    device.id.clone(),
                    DeviceEntry { device: device.clone(), state: DeviceState::Connecting { cancel } },
                );
                true
            },
        }
    }

    /// Completes a connect attempt. Returns `None` if the attempt is no longer pending (it was
    /// cancelled or the device was evicted in the meantime).
    pub fn promote_to_connected(&mut self, id: &DeviceId, handle: TransportHandle) -> Option<Device> {
        let entry = self.devices.get_mut(id)?;

        match entry.state {
            DeviceState::Connecting { .. } => {
                if let Some(name) = handle.name.as_ref().filter(|name| !name.trim().is_empty()) {
                    entry.device.name = name.clone();
                }
                self.last_link += 1;
                entry.state = DeviceState::Connected { handle, link: self.last_link, notifications: None };
                Some(entry.device.clone())
            },
            _ => None,
        }
    }

    /// Drops a pending connect attempt that failed. The device is then unknown again and may be
    /// rediscovered by a later scan.
    pub fn abandon_connecting(&mut self, id: &DeviceId) -> bool {
        if self.is_connecting(id) {
            self.devices.shift_remove(id);
            return true;
        }
        false
    }

    /// Removes a connecting or connected device. Discovered devices are left alone.
    pub fn evict(&mut self, id: &DeviceId) -> Option<DeviceEntry> {
        match self.state(id)? {
            DeviceStateKind::Discovered => None,
            DeviceStateKind::Connecting | DeviceStateKind::Connected => self.devices.shift_remove(id),
        }
    }

    /// Marks the notification reader of a connected device as started. Returns the token that
    /// stops it, or `None` if the device is not connected or a reader already runs.
    pub fn begin_notifications(&mut self, id: &DeviceId) -> Option<CancellationToken> {
        match self.devices.get_mut(id).map(|entry| &mut entry.state) {
            Some(DeviceState::Connected { notifications, .. }) if notifications.is_none() => {
                let token = CancellationToken::new();
                *notifications = Some(token.clone());
                Some(token)
            },
            _ => None,
        }
    }

    pub fn take_notifications(&mut self, id: &DeviceId) -> Option<CancellationToken> {
        match self.devices.get_mut(id).map(|entry| &mut entry.state) {
            Some(DeviceState::Connected { notifications, .. }) => notifications.take(),
            _ => None,
        }
    }

    #[cfg(test)]
    pub fn has_notifications(&self, id: &DeviceId) -> bool {
        matches!(
            self.devices.get(id).map(|entry| &entry.state),
            Some(DeviceState::Connected { notifications: Some(_), .. }),
        )
    }

    fn devices_in(&self, kind: DeviceStateKind) -> Vec<Device> {
        self.devices
            .values()
            .filter(|entry| entry.state.kind() == kind)
            .map(|entry| entry.device.clone())
            .collect()
    }

    pub fn available(&self) -> Vec<Device> {
        self.devices_in(DeviceStateKind::Discovered)
    }

    pub fn connecting(&self) -> Vec<Device> {
        self.devices_in(DeviceStateKind::Connecting)
    }

    pub fn connected(&self) -> Vec<Device> {
        self.devices_in(DeviceStateKind::Connected)
    }

    /// Connected devices together with their link numbers.
    pub fn connected_links(&self) -> Vec<(Device, u64)> {
        self.devices
            .values()
            .filter_map(|entry| match &entry.state {
                DeviceState::Connected { link, .. } => Some((entry.device.clone(), *link)),
                _ => None,
            })
            .collect()
    }
}
