//! The radio driver as seen by the connection core.
//!
//! Every operation is addressed by [`DeviceId`]; the driver keeps whatever platform objects it
//! needs behind that identity. Implementations: [`crate::device::btle::BtleTransport`] for real
//! hardware and [`crate::device::fake::FakeTransport`] for tests.

use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::device::types::{DeviceId, DiscoveredDevice, TransportHandle};
use crate::error::TransportError;

pub type DiscoveryStream = BoxStream<'static, DiscoveredDevice>;
pub type NotificationStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

/// Restricts discovery to peripherals advertising one of `services`. Empty means everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryFilter {
    pub services: Vec<Uuid>,
}

/// A GATT characteristic of a specific service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicRef {
    pub service: Uuid,
    pub characteristic: Uuid,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Starts discovery. Sightings are delivered on the returned stream until `stop_scan` is
    /// called; the same device may be reported more than once.
    async fn start_scan(&self, filter: &DiscoveryFilter) -> Result<DiscoveryStream, TransportError>;

    async fn stop_scan(&self) -> Result<(), TransportError>;

    async fn connect(&self, id: &DeviceId) -> Result<TransportHandle, TransportError>;

    async fn disconnect(&self, id: &DeviceId) -> Result<(), TransportError>;

    async fn is_connected(&self, id: &DeviceId) -> Result<bool, TransportError>;

    async fn write(&self, id: &DeviceId, target: CharacteristicRef, bytes: &[u8]) -> Result<(), TransportError>;

    /// Subscribes to notifications. The stream ends when the subscription is stopped or the link
    /// goes away.
    async fn start_notification(&self, id: &DeviceId, target: CharacteristicRef) -> Result<NotificationStream, TransportError>;

    async fn stop_notification(&self, id: &DeviceId, target: CharacteristicRef) -> Result<(), TransportError>;
}
