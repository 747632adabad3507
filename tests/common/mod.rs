#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use jiband_link::config::types::Config;
use jiband_link::device::fake::FakeTransport;
use jiband_link::device::types::DiscoveredDevice;
use jiband_link::session::storage::MemoryStorage;
use jiband_link::{Device, DeviceId, DeviceService};

pub fn found(id: &str) -> DiscoveredDevice {
    DiscoveredDevice { id: DeviceId::from(id), name: Some(format!("Band {}", id)) }
}

pub fn band(id: &str) -> Device {
    Device::new(id, Some(format!("Band {}", id)))
}

pub fn ids(devices: &[Device]) -> Vec<&str> {
    devices.iter().map(|device| device.id.as_str()).collect()
}

pub fn service_with(config: Config) -> (FakeTransport, MemoryStorage, DeviceService) {
    let fake = FakeTransport::new();
    let storage = MemoryStorage::new();
    let service = DeviceService::new(Arc::new(fake.clone()), Arc::new(storage.clone()), config);
    (fake, storage, service)
}

pub fn service() -> (FakeTransport, MemoryStorage, DeviceService) {
    service_with(Config::default())
}

/// Lets spawned tasks (scan reader, notification readers) catch up.
pub async fn settle() {
    sleep(Duration::from_millis(10)).await;
}
