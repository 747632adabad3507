use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use log::warn;
use tokio::time::sleep;

use crate::config::types::Config;
use crate::device::constants::{jiband_notify_uuid, jiband_service_uuid, jiband_write_uuid};
use crate::device::events::Observers;
use crate::device::registry::DeviceRegistry;
use crate::device::transport::{CharacteristicRef, Transport};
use crate::session::store::SessionStore;
use crate::error::TransportError;

pub fn write_target() -> CharacteristicRef {
    CharacteristicRef { service: jiband_service_uuid(), characteristic: jiband_write_uuid() }
}

pub fn notify_target() -> CharacteristicRef {
    CharacteristicRef { service: jiband_service_uuid(), characteristic: jiband_notify_uuid() }
}

/// Runs a transport operation, giving up after `deadline`.
pub async fn with_deadline<T, F>(fut: F, deadline: Duration, operation: &'static str) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    tokio::select! {
        _ = sleep(deadline) => {
            warn!("Transport operation {} took too long", operation);
            Err(TransportError::Timeout { operation })
        }
        result = fut => result,
    }
}

/// State shared by the scan controller, the connection manager and the liveness monitor.
///
/// The registry lock is only ever held inside [`DeviceCore::transition`] and short reads; it is
/// never held across an `.await`.
pub struct DeviceCore {
    pub transport: Arc<dyn Transport>,
    pub observers: Observers,
    pub session: SessionStore,
    pub config: Config,
    registry: Mutex<DeviceRegistry>,
}

impl DeviceCore {
    pub fn new(transport: Arc<dyn Transport>, session: SessionStore, config: Config) -> Self {
        DeviceCore {
            transport,
            observers: Observers::new(),
            session,
            config,
            registry: Mutex::new(DeviceRegistry::new()),
        }
    }

    pub fn registry(&self) -> MutexGuard<'_, DeviceRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies one state change and republishes the available and connected snapshots.
    pub fn transition<R>(&self, change: impl FnOnce(&mut DeviceRegistry) -> R) -> R {
        let mut registry = self.registry();
        let result = change(&mut registry);
        Observers::update_snapshot(&self.observers.available, registry.available());
        Observers::update_snapshot(&self.observers.connected, registry.connected());
        result
    }
}
