use std::sync::{Arc, Mutex, PoisonError};
use log::{info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::types::Config;
use crate::device::shared::DeviceCore;
use crate::device::liveness::LivenessMonitor;
use crate::device::manager::ConnectionManager;
use crate::device::scan::ScanController;
use crate::device::transport::Transport;
use crate::device::types::DeviceId;
use crate::error::ConnectError;
use crate::session::storage::Storage;
use crate::session::store::SessionStore;

/// Everything needed to manage JI Bands over one transport: scanning, connections, the liveness
/// monitor and the remembered session.
pub struct DeviceService {
    manager: ConnectionManager,
    scanner: ScanController,
    // cancelled on shutdown
    cancel: CancellationToken,
    monitor_handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceService {
    pub fn new(transport: Arc<dyn Transport>, storage: Arc<dyn Storage>, config: Config) -> Self {
        let core = Arc::new(DeviceCore::new(transport, SessionStore::new(storage), config.validate()));

        DeviceService {
            manager: ConnectionManager::new(core.clone()),
            scanner: ScanController::new(core),
            cancel: CancellationToken::new(),
            monitor_handle: Mutex::new(None),
        }
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn scanner(&self) -> &ScanController {
        &self.scanner
    }

    /// Starts the liveness monitor (once) and reconnects to the devices of the previous session.
    pub async fn start(&self) -> Vec<(DeviceId, Result<(), ConnectError>)> {
        self.start_monitor();
        self.manager.auto_reconnect().await
    }

    pub fn start_monitor(&self) {
        let mut handle = self.monitor_handle.lock().unwrap_or_else(PoisonError::into_inner);
        if handle.is_none() && !self.cancel.is_cancelled() {
            let monitor = LivenessMonitor::new(self.manager.clone());
            *handle = Some(monitor.spawn(self.cancel.child_token()));
        }
    }

    /// Stops scanning and the liveness monitor. Connections are left as they are; in-flight
    /// transport calls finish on their own.
    pub async fn shutdown(&self) {
        info!("Shutting down device service");
        self.cancel.cancel();

        if let Err(err) = self.scanner.stop_scan().await {
            warn!("Failed to stop scanning during shutdown: {}", err);
        }

        let handle = self.monitor_handle.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            info!("Waiting for liveness monitor to stop");
            if let Err(err) = handle.await {
                warn!("Liveness monitor task failed: {}", err);
            }
        }
    }
}
