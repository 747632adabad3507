use std::collections::HashMap;
use futures::future::join_all;
use log::{debug, info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::device::shared::with_deadline;
use crate::device::manager::ConnectionManager;
use crate::device::types::DeviceId;

/// Periodically asks the transport whether every connected device is still there, and evicts the
/// ones that are not.
///
/// A query that fails or does not answer within `isConnectedDeadlineMs` counts as "not
/// connected". With `livenessFailureThreshold` above 1, a device is only evicted after that many
/// consecutive negative sweeps.
pub struct LivenessMonitor {
    manager: ConnectionManager,
    // consecutive failures per device, together with the link they were counted for
    failures: HashMap<DeviceId, (u64, u32)>,
}

impl LivenessMonitor {
    pub fn new(manager: ConnectionManager) -> Self {
        LivenessMonitor { manager, failures: HashMap::new() }
    }

    /// Checks every connected device once. Returns the devices that were evicted.
    ///
    /// A negative answer only evicts the connection that was asked about. A device that was
    /// disconnected and connected again while its query was outstanding is left alone.
    pub async fn sweep(&mut self) -> Vec<DeviceId> {
        let connected = self.manager.connected_links();
        let transport = self.manager.transport();
        let config = &self.manager.core().config;
        let deadline = config.is_connected_deadline();
        let threshold = config.liveness_failure_threshold.max(1);

        let results = join_all(connected.iter().map(|(device, link)| {
            let transport = transport.clone();
            async move {
                let alive = match with_deadline(transport.is_connected(&device.id), deadline, "is_connected").await {
                    Ok(alive) => alive,
                    Err(err) => {
                        warn!("Error checking for connection state of {}: {}", device, err);
                        false
                    },
                };
                (device, *link, alive)
            }
        })).await;

        self.failures.retain(|id, (link, _)| connected.iter().any(|(device, current)| &device.id == id && *current == *link));

        let mut evicted = Vec::new();
        for (device, link, alive) in results {
            if alive {
                self.failures.remove(&device.id);
                continue;
            }

            let (_, failures) = self.failures.entry(device.id.clone()).or_insert((link, 0));
            *failures += 1;
            if *failures < threshold {
                debug!("{} did not answer ({} of {})", device, failures, threshold);
                continue;
            }

            self.failures.remove(&device.id);
            if self.manager.evict_lost(&device.id, link).is_some() {
                evicted.push(device.id.clone());
            } else {
                debug!("{} was reconnected while it was being checked", device);
            }
        }

        evicted
    }

    /// Runs a sweep every `livenessIntervalMs` until `cancel` is cancelled.
    pub fn spawn(mut self, cancel: CancellationToken) -> JoinHandle<()> {
        let period = self.manager.core().config.liveness_interval();

        spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;

            info!("Liveness monitor started, checking every {}", humantime::format_duration(period));

            'mainloop: loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        break 'mainloop;
                    },
                    _ = ticker.tick() => {
                        let evicted = self.sweep().await;
                        if !evicted.is_empty() {
                            debug!("Liveness sweep evicted {} device(s)", evicted.len());
                        }
                    },
                }
            }

            info!("Liveness monitor stopped");
        })
    }
}
