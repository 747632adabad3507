use std::sync::Arc;
use std::time::Duration;
use futures::channel::mpsc::Receiver;
use futures::future::join_all;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::spawn;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::device::codec;
use crate::device::shared::{notify_target, with_deadline, write_target, DeviceCore};
use crate::device::transport::{NotificationStream, Transport};
use crate::device::types::{Device, DeviceEvent, DeviceId, DeviceStateKind, DisconnectCause, DisconnectNotice, OutboundCommand};
use crate::error::{ConnectError, DisconnectError, SendError, TransportError};

enum PendingDisconnect {
    Nothing,
    CancelledAttempt,
    Connected { notifications: Option<CancellationToken> },
}

/// Connects, disconnects and talks to individual devices.
#[derive(Clone)]
pub struct ConnectionManager {
    core: Arc<DeviceCore>,
}

impl ConnectionManager {
    pub fn new(core: Arc<DeviceCore>) -> Self {
        ConnectionManager { core }
    }

    pub(crate) fn transport(&self) -> Arc<dyn Transport> {
        self.core.transport.clone()
    }

    pub(crate) fn core(&self) -> &DeviceCore {
        &self.core
    }

    pub fn is_connecting(&self, id: &DeviceId) -> bool {
        self.core.registry().is_connecting(id)
    }

    pub fn is_connected(&self, id: &DeviceId) -> bool {
        self.core.registry().is_connected(id)
    }

    pub fn available_devices(&self) -> Vec<Device> {
        self.core.registry().available()
    }

    pub fn connecting_devices(&self) -> Vec<Device> {
        self.core.registry().connecting()
    }

    pub fn connected_devices(&self) -> Vec<Device> {
        self.core.registry().connected()
    }

    pub(crate) fn connected_links(&self) -> Vec<(Device, u64)> {
        self.core.registry().connected_links()
    }

    pub fn subscribe_available(&self) -> watch::Receiver<Vec<Device>> {
        self.core.observers.available.subscribe()
    }

    pub fn subscribe_connected(&self) -> watch::Receiver<Vec<Device>> {
        self.core.observers.connected.subscribe()
    }

    pub fn subscribe_events(&self) -> Receiver<DeviceEvent> {
        self.core.observers.events.subscribe()
    }

    pub fn subscribe_disconnects(&self) -> Receiver<DisconnectNotice> {
        self.core.observers.disconnects.subscribe()
    }

    /// Connects to `device`, starts reading its notifications and persists the connected set.
    /// Connecting to a device that is already connected succeeds without doing anything.
    pub async fn connect(&self, device: &Device) -> Result<(), ConnectError> {
        self.connect_device(device, true).await
    }

    async fn connect_device(&self, device: &Device, persist: bool) -> Result<(), ConnectError> {
        let id = device.id.clone();
        let cancel = CancellationToken::new();

        let start = self.core.transition(|registry| match registry.state(&id) {
            Some(DeviceStateKind::Connected) => Ok(false),
            Some(DeviceStateKind::Connecting) => Err(ConnectError::AlreadyConnecting(id.clone())),
            _ => Ok(registry.promote_to_connecting(device, cancel.clone())),
        })?;

        if !start {
            debug!("Already connected to {}", device);
            return Ok(());
        }

        info!("Connecting to {}...", device);
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(ConnectError::Cancelled(id.clone())),
            result = with_deadline(self.core.transport.connect(&id), self.core.config.connect_deadline(), "connect") => {
                result.map_err(ConnectError::from)
            },
        };

        let handle = match result {
            Ok(handle) => handle,
            Err(err) => {
                // a cancelled attempt has already been removed by whoever cancelled it
                self.core.transition(|registry| {
                    if !cancel.is_cancelled() {
                        registry.abandon_connecting(&id);
                    }
                });
                warn!("Connecting to {} failed: {}", device, err);
                return Err(err);
            },
        };

        let connected = self.core.transition(|registry| {
            if cancel.is_cancelled() {
                return None;
            }
            registry.promote_to_connected(&id, handle)
        });

        let connected = match connected {
            Some(device) => device,
            None => {
                info!("Connection attempt to {} was cancelled while connecting", device);
                if let Err(err) = self.core.transport.disconnect(&id).await {
                    warn!("Failed to close cancelled connection to {}: {}", device, err);
                }
                return Err(ConnectError::Cancelled(id));
            },
        };

        info!("Connected to {}", connected);

        if let Err(err) = self.subscribe_notifications(&id).await {
            warn!("Failed to subscribe to notifications of {}: {}", connected, err);
        }

        if persist {
            self.persist().await;
        }

        Ok(())
    }

    /// Starts the notification reader of a connected device. Does nothing if it already runs.
    async fn subscribe_notifications(&self, id: &DeviceId) -> Result<(), TransportError> {
        let cancel = match self.core.transition(|registry| registry.begin_notifications(id)) {
            Some(cancel) => cancel,
            None => return Ok(()),
        };

        let stream = match self.core.transport.start_notification(id, notify_target()).await {
            Ok(stream) => stream,
            Err(err) => {
                self.core.transition(|registry| {
                    if !cancel.is_cancelled() {
                        registry.take_notifications(id);
                    }
                });
                return Err(err);
            },
        };

        spawn(read_notifications_task(self.core.clone(), id.clone(), cancel, stream));
        Ok(())
    }

    /// Disconnects from a device. Disconnecting an unknown or already disconnected device
    /// succeeds; disconnecting a device that is still connecting cancels the attempt.
    pub async fn disconnect(&self, id: &DeviceId) -> Result<(), DisconnectError> {
        let pending = self.core.transition(|registry| match registry.state(id) {
            Some(DeviceStateKind::Connecting) => {
                if let Some(entry) = registry.evict(id) {
                    entry.cancel_pending();
                }
                PendingDisconnect::CancelledAttempt
            },
            Some(DeviceStateKind::Connected) => PendingDisconnect::Connected {
                notifications: registry.take_notifications(id),
            },
            _ => PendingDisconnect::Nothing,
        });

        let was_subscribed = match pending {
            PendingDisconnect::Nothing => {
                debug!("{} is not connected, nothing to disconnect", id);
                return Ok(());
            },
            PendingDisconnect::CancelledAttempt => {
                info!("Cancelled pending connection attempt to {}", id);
                return Ok(());
            },
            PendingDisconnect::Connected { notifications: Some(token) } => {
                token.cancel();
                if let Err(err) = self.core.transport.stop_notification(id, notify_target()).await {
                    debug!("Ignoring failure to stop notifications of {}: {}", id, err);
                }
                true
            },
            PendingDisconnect::Connected { notifications: None } => false,
        };

        info!("Disconnecting from {}...", id);
        let result = with_deadline(
            self.core.transport.disconnect(id),
            self.core.config.connect_deadline(),
            "disconnect",
        ).await;

        if let Err(err) = result {
            // the device stays connected, so it has to keep reporting
            if was_subscribed {
                if let Err(subscribe_err) = self.subscribe_notifications(id).await {
                    warn!("Failed to resubscribe to notifications of {}: {}", id, subscribe_err);
                }
            }
            return Err(err.into());
        }

        let evicted = self.core.transition(|registry| {
            registry.evict(id).map(|entry| {
                entry.cancel_pending();
                entry
            })
        });

        self.persist().await;

        // the liveness monitor may have noticed the loss first and already reported it
        if let Some(entry) = evicted {
            match entry.connected_at() {
                Some(since) => info!(
                    "Disconnected from {} after {}",
                    entry.device,
                    humantime::format_duration(Duration::from_secs(since.elapsed().as_secs())),
                ),
                None => info!("Disconnected from {}", entry.device),
            }

            self.core.observers.disconnects.publish(DisconnectNotice {
                device: entry.device,
                cause: DisconnectCause::UserInitiated,
            });
        }

        Ok(())
    }

    /// Writes one command frame. The link is verified with the transport first, so a device that
    /// silently dropped off is reported as not connected rather than accepting a write.
    pub async fn send_command(&self, id: &DeviceId, command: OutboundCommand) -> Result<(), SendError> {
        if !self.is_connected(id) {
            return Err(SendError::NotConnected(id.clone()));
        }

        let alive = match with_deadline(
            self.core.transport.is_connected(id),
            self.core.config.is_connected_deadline(),
            "is_connected",
        ).await {
            Ok(alive) => alive,
            Err(err) => {
                warn!("Could not verify connection to {}: {}", id, err);
                false
            },
        };

        if !alive {
            return Err(SendError::NotConnected(id.clone()));
        }

        let frame = codec::encode(command);
        debug!("Sending {} ({:?}) to {}", command, frame, id);

        with_deadline(
            self.core.transport.write(id, write_target(), &frame),
            self.core.config.write_deadline(),
            "write",
        ).await?;

        Ok(())
    }

    /// Sends `command` to every connected device. One failing device does not stop the others.
    pub async fn broadcast(&self, command: OutboundCommand) -> Vec<(DeviceId, Result<(), SendError>)> {
        let devices = self.connected_devices();

        join_all(devices.into_iter().map(|device| async move {
            let result = self.send_command(&device.id, command).await;
            if let Err(err) = &result {
                warn!("Failed to send {} to {}: {}", command, device, err);
            }
            (device.id, result)
        })).await
    }

    /// Reconnects to the devices of the previous session, at most `autoReconnectCap` of them, in
    /// the order they were saved. A failure is logged and the next device is tried. The persisted
    /// list is left as it is, so devices beyond the cap stay remembered.
    pub async fn auto_reconnect(&self) -> Vec<(DeviceId, Result<(), ConnectError>)> {
        let devices = match self.core.session.restore().await {
            Ok(devices) => devices,
            Err(err) => {
                warn!("Failed to restore previous session: {}", err);
                return Vec::new();
            },
        };

        let cap = self.core.config.auto_reconnect_cap;
        if devices.len() > cap {
            info!("{} devices remembered, reconnecting to the first {}", devices.len(), cap);
        }

        let mut results = Vec::new();
        for device in devices.into_iter().take(cap) {
            let result = self.connect_device(&device, false).await;
            if let Err(err) = &result {
                warn!("Failed to reconnect to {}: {}", device, err);
            }
            results.push((device.id, result));
        }

        results
    }

    /// Forgets a device whose link was found dead. Only the connection identified by `link` is
    /// evicted; if the device has been reconnected since, nothing happens. Returns the device if
    /// it was evicted, in which case a monitor-detected disconnect has been announced.
    pub(crate) fn evict_lost(&self, id: &DeviceId, link: u64) -> Option<Device> {
        let evicted = self.core.transition(|registry| {
            if registry.link(id) != Some(link) {
                return None;
            }
            registry.evict(id).map(|entry| {
                entry.cancel_pending();
                entry.device
            })
        })?;

        warn!("Connection lost: {}", evicted);
        self.core.observers.disconnects.publish(DisconnectNotice {
            device: evicted.clone(),
            cause: DisconnectCause::MonitorDetected,
        });

        Some(evicted)
    }

    async fn persist(&self) {
        let connected = self.connected_devices();
        if let Err(err) = self.core.session.save(&connected).await {
            warn!("Failed to save connected devices: {}", err);
        }
    }
}

async fn read_notifications_task(core: Arc<DeviceCore>, id: DeviceId, cancel: CancellationToken, mut stream: NotificationStream) {
    'mainloop: loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            data = stream.next() => match data {
                Some(Ok(bytes)) => {
                    let event = codec::decode(&bytes);
                    debug!("Received {:?} from {}", event, id);

                    // publish under the registry lock so that no event of a device slips out
                    // after its disconnect has been announced
                    let registry = core.registry();
                    if registry.is_connected(&id) {
                        core.observers.events.publish(DeviceEvent { id: id.clone(), event });
                    }
                },
                Some(Err(err)) => {
                    warn!("Notification error from {}: {}", id, err);
                },
                None => {
                    debug!("Notification stream of {} ended", id);
                    core.transition(|registry| {
                        if !cancel.is_cancelled() {
                            registry.take_notifications(&id);
                        }
                    });
                    break 'mainloop;
                },
            },
        }
    }
}
