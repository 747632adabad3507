//! Deterministic in-memory [`Transport`] used by the tests and for dry runs without a radio.
//!
//! Every knob is set through the `FakeTransport` handle; clones share state, so a test keeps one
//! clone for scripting and hands another to the code under test.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;
use tokio::time::sleep;

use crate::device::transport::{CharacteristicRef, DiscoveryFilter, DiscoveryStream, NotificationStream, Transport};
use crate::device::types::{DeviceId, DiscoveredDevice, TransportHandle};
use crate::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LivenessBehavior {
    Error,
    Hang,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFrame {
    pub id: DeviceId,
    pub target: CharacteristicRef,
    pub bytes: Vec<u8>,
}

#[derive(Default)]
struct FakeState {
    discoverable: Vec<DiscoveredDevice>,
    scan_sender: Option<UnboundedSender<DiscoveredDevice>>,
    scan_failure: bool,
    scan_starts: usize,
    scan_stops: usize,
    names: HashMap<DeviceId, String>,
    links: HashSet<DeviceId>,
    connect_delay: Duration,
    connect_attempts: HashMap<DeviceId, usize>,
    connect_failures: HashSet<DeviceId>,
    disconnect_failures: HashSet<DeviceId>,
    write_failures: HashSet<DeviceId>,
    notification_failures: HashSet<DeviceId>,
    liveness: HashMap<DeviceId, LivenessBehavior>,
    liveness_queries: HashMap<DeviceId, usize>,
    writes: Vec<WrittenFrame>,
    notifiers: HashMap<DeviceId, UnboundedSender<Result<Vec<u8>, TransportError>>>,
    stop_notification_calls: usize,
}

#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        FakeTransport::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Devices reported as soon as a scan starts.
    pub fn set_discoverable(&self, devices: Vec<DiscoveredDevice>) {
        self.state().discoverable = devices;
    }

    /// Reports a device to the running scan. Returns false if no scan is running.
    pub fn announce(&self, device: DiscoveredDevice) -> bool {
        match &self.state().scan_sender {
            Some(sender) => sender.unbounded_send(device).is_ok(),
            None => false,
        }
    }

    /// Makes every following scan start fail, as if the radio were switched off.
    pub fn fail_scan(&self) {
        self.state().scan_failure = true;
    }

    pub fn allow_scan(&self) {
        self.state().scan_failure = false;
    }

    /// Name handed back on connect, as if read from the peripheral itself.
    pub fn set_name(&self, id: &DeviceId, name: &str) {
        self.state().names.insert(id.clone(), name.to_string());
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.state().connect_delay = delay;
    }

    pub fn fail_connect(&self, id: &DeviceId) {
        self.state().connect_failures.insert(id.clone());
    }

    pub fn allow_connect(&self, id: &DeviceId) {
        self.state().connect_failures.remove(id);
    }

    pub fn fail_disconnect(&self, id: &DeviceId) {
        self.state().disconnect_failures.insert(id.clone());
    }

    pub fn allow_disconnect(&self, id: &DeviceId) {
        self.state().disconnect_failures.remove(id);
    }

    pub fn fail_write(&self, id: &DeviceId) {
        self.state().write_failures.insert(id.clone());
    }

    pub fn fail_notification(&self, id: &DeviceId) {
        self.state().notification_failures.insert(id.clone());
    }

    /// Loses the link without telling anyone, like a band walking out of range.
    pub fn drop_link(&self, id: &DeviceId) {
        self.state().links.remove(id);
    }

    pub fn fail_liveness_query(&self, id: &DeviceId) {
        self.state().liveness.insert(id.clone(), LivenessBehavior::Error);
    }

    /// The liveness query for `id` never answers.
    pub fn hang_liveness_query(&self, id: &DeviceId) {
        self.state().liveness.insert(id.clone(), LivenessBehavior::Hang);
    }

    pub fn restore_liveness_query(&self, id: &DeviceId) {
        self.state().liveness.remove(id);
    }

    /// Delivers a notification. Returns false if nobody is subscribed for `id`.
    pub fn notify(&self, id: &DeviceId, bytes: &[u8]) -> bool {
        match self.state().notifiers.get(id) {
            Some(sender) => sender.unbounded_send(Ok(bytes.to_vec())).is_ok(),
            None => false,
        }
    }

    pub fn notify_error(&self, id: &DeviceId, reason: &str) -> bool {
        match self.state().notifiers.get(id) {
            Some(sender) => sender.unbounded_send(Err(TransportError::Rejected(reason.to_string()))).is_ok(),
            None => false,
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.state().scan_sender.is_some()
    }

    pub fn scan_starts(&self) -> usize {
        self.state().scan_starts
    }

    pub fn scan_stops(&self) -> usize {
        self.state().scan_stops
    }

    pub fn connect_attempts(&self, id: &DeviceId) -> usize {
        self.state().connect_attempts.get(id).copied().unwrap_or(0)
    }

    pub fn liveness_queries(&self, id: &DeviceId) -> usize {
        self.state().liveness_queries.get(id).copied().unwrap_or(0)
    }

    pub fn is_link_up(&self, id: &DeviceId) -> bool {
        self.state().links.contains(id)
    }

    pub fn is_subscribed(&self, id: &DeviceId) -> bool {
        self.state().notifiers.contains_key(id)
    }

    pub fn stop_notification_calls(&self) -> usize {
        self.state().stop_notification_calls
    }

    pub fn writes(&self) -> Vec<WrittenFrame> {
        self.state().writes.clone()
    }
}

fn rejected(reason: &str) -> TransportError {
    TransportError::Rejected(reason.to_string())
}

#[async_trait]
impl Transport for FakeTransport {
    async fn start_scan(&self, _filter: &DiscoveryFilter) -> Result<DiscoveryStream, TransportError> {
        let mut state = self.state();
        if state.scan_failure {
            return Err(rejected("bluetooth is off"));
        }

        let (tx, rx) = unbounded();
        state.scan_starts += 1;

        for device in &state.discoverable {
            let _ = tx.unbounded_send(device.clone());
        }
        state.scan_sender = Some(tx);

        Ok(rx.boxed())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        let mut state = self.state();
        state.scan_stops += 1;
        state.scan_sender = None;
        Ok(())
    }

    async fn connect(&self, id: &DeviceId) -> Result<TransportHandle, TransportError> {
        let delay = {
            let mut state = self.state();
            *state.connect_attempts.entry(id.clone()).or_insert(0) += 1;
            state.connect_delay
        };

        if !delay.is_zero() {
            sleep(delay).await;
        }

        let mut state = self.state();
        if state.connect_failures.contains(id) {
            return Err(rejected("connection refused"));
        }
        state.links.insert(id.clone());
        Ok(TransportHandle::new(state.names.get(id).cloned()))
    }

    async fn disconnect(&self, id: &DeviceId) -> Result<(), TransportError> {
        let mut state = self.state();
        if state.disconnect_failures.contains(id) {
            return Err(rejected("disconnect failed"));
        }
        state.links.remove(id);
        state.notifiers.remove(id);
        Ok(())
    }

    async fn is_connected(&self, id: &DeviceId) -> Result<bool, TransportError> {
        let behavior = {
            let mut state = self.state();
            *state.liveness_queries.entry(id.clone()).or_insert(0) += 1;
            state.liveness.get(id).copied()
        };

        match behavior {
            Some(LivenessBehavior::Error) => Err(rejected("status query failed")),
            Some(LivenessBehavior::Hang) => futures::future::pending().await,
            None => Ok(self.state().links.contains(id)),
        }
    }

    async fn write(&self, id: &DeviceId, target: CharacteristicRef, bytes: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state();
        if !state.links.contains(id) {
            return Err(rejected("not connected"));
        }
        if state.write_failures.contains(id) {
            return Err(rejected("write failed"));
        }
        state.writes.push(WrittenFrame { id: id.clone(), target, bytes: bytes.to_vec() });
        Ok(())
    }

    async fn start_notification(&self, id: &DeviceId, _target: CharacteristicRef) -> Result<NotificationStream, TransportError> {
        let mut state = self.state();
        if state.notification_failures.contains(id) {
            return Err(rejected("subscribe failed"));
        }

        let (tx, rx) = unbounded();
        state.notifiers.insert(id.clone(), tx);
        Ok(rx.boxed())
    }

    async fn stop_notification(&self, id: &DeviceId, _target: CharacteristicRef) -> Result<(), TransportError> {
        let mut state = self.state();
        state.stop_notification_calls += 1;
        state.notifiers.remove(id);
        Ok(())
    }
}
