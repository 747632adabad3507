use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::spawn;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::device::constants::jiband_service_uuid;
use crate::device::shared::DeviceCore;
use crate::device::transport::{DiscoveryFilter, DiscoveryStream};
use crate::device::types::{Device, DiscoveredDevice};
use crate::error::ScanError;

#[derive(Debug, Default)]
struct ScanState {
    scanning: bool,
    // identifies the current sweep, so that a stale auto-stop never ends a newer sweep
    generation: u64,
    cancel: Option<CancellationToken>,
}

/// Runs time-bounded discovery sweeps that fill the available set.
#[derive(Clone)]
pub struct ScanController {
    core: Arc<DeviceCore>,
    state: Arc<Mutex<ScanState>>,
}

impl ScanController {
    pub fn new(core: Arc<DeviceCore>) -> Self {
        ScanController { core, state: Arc::new(Mutex::new(ScanState::default())) }
    }

    fn state(&self) -> MutexGuard<'_, ScanState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_scanning(&self) -> bool {
        self.state().scanning
    }

    fn filter(&self) -> DiscoveryFilter {
        match self.core.config.service_filter {
            true => DiscoveryFilter { services: vec![jiband_service_uuid()] },
            false => DiscoveryFilter::default(),
        }
    }

    /// Starts a sweep that stops by itself after `duration`. Does nothing if a sweep is already
    /// running.
    pub async fn start_scan(&self, duration: Duration) -> Result<(), ScanError> {
        let (generation, cancel) = {
            let mut state = self.state();
            if state.scanning {
                debug!("Already scanning");
                return Ok(());
            }

            let cancel = CancellationToken::new();
            state.scanning = true;
            state.generation += 1;
            state.cancel = Some(cancel.clone());
            (state.generation, cancel)
        };

        self.core.transition(|registry| registry.clear_available());

        let discoveries = match self.core.transport.start_scan(&self.filter()).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!("Scanning failed {:?}", err);
                self.end_sweep(Some(generation));
                return Err(err.into());
            },
        };

        info!("Scanning for {}...", humantime::format_duration(duration));
        spawn(self.clone().scan_task(generation, cancel, duration, discoveries));
        Ok(())
    }

    /// Stops the running sweep. Does nothing if no sweep is running.
    pub async fn stop_scan(&self) -> Result<(), ScanError> {
        if !self.end_sweep(None) {
            return Ok(());
        }

        info!("Stopping scan");
        self.core.transport.stop_scan().await?;
        Ok(())
    }

    /// Marks the sweep as finished and cancels its timer. With `generation`, only that exact
    /// sweep is ended. Returns false if there was nothing to end.
    fn end_sweep(&self, generation: Option<u64>) -> bool {
        let mut state = self.state();
        if !state.scanning || generation.is_some_and(|generation| generation != state.generation) {
            return false;
        }

        state.scanning = false;
        if let Some(cancel) = state.cancel.take() {
            cancel.cancel();
        }
        true
    }

    fn record(&self, found: DiscoveredDevice) {
        let device = Device::from(found);
        if self.core.transition(|registry| registry.mark_available(device.clone())) {
            debug!("Found {}", device);
        }
    }

    async fn scan_task(self, generation: u64, cancel: CancellationToken, duration: Duration, discoveries: DiscoveryStream) {
        let mut discoveries = discoveries.fuse();
        let deadline = sleep(duration);
        tokio::pin!(deadline);

        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                _ = &mut deadline => {
                    if self.end_sweep(Some(generation)) {
                        info!("Scan finished");
                        if let Err(err) = self.core.transport.stop_scan().await {
                            warn!("Failed to stop scanning: {}", err);
                        }
                    }
                    break 'mainloop;
                },
                Some(found) = discoveries.next() => {
                    self.record(found);
                },
            }
        }
    }
}
