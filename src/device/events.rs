use std::sync::{Mutex, MutexGuard, PoisonError};
use futures::channel::mpsc::{channel, Receiver, Sender};
use log::warn;
use tokio::sync::watch;

use crate::device::constants::EVENT_QUEUE_CAPACITY;
use crate::device::types::{Device, DeviceEvent, DisconnectNotice};

/// Fan-out of one kind of event to any number of subscribers. Every subscriber has a bounded
/// queue; when it is full, further events for that subscriber are dropped. Subscribers that
/// dropped their receiver are forgotten on the next publish.
#[derive(Debug)]
pub struct EventHub<T> {
    capacity: usize,
    senders: Mutex<Vec<Sender<T>>>,
}

impl<T: Clone> EventHub<T> {
    pub fn new() -> Self {
        EventHub::with_capacity(EVENT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        EventHub { capacity, senders: Mutex::new(Vec::new()) }
    }

    fn senders(&self) -> MutexGuard<'_, Vec<Sender<T>>> {
        self.senders.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = channel(self.capacity);
        self.senders().push(tx);
        rx
    }

    pub fn publish(&self, event: T) {
        self.senders().retain_mut(|sender| match sender.try_send(event.clone()) {
            Ok(()) => true,
            Err(err) if err.is_full() => {
                warn!("Event subscriber is not keeping up, dropping an event");
                true
            },
            Err(_) => false,
        });
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.senders().len()
    }
}

impl<T: Clone> Default for EventHub<T> {
    fn default() -> Self {
        EventHub::new()
    }
}

/// Every observation point the core exposes to its callers.
#[derive(Debug)]
pub struct Observers {
    pub available: watch::Sender<Vec<Device>>,
    pub connected: watch::Sender<Vec<Device>>,
    pub events: EventHub<DeviceEvent>,
    pub disconnects: EventHub<DisconnectNotice>,
}

impl Observers {
    pub fn new() -> Self {
        Observers {
            available: watch::channel(Vec::new()).0,
            connected: watch::channel(Vec::new()).0,
            events: EventHub::new(),
            disconnects: EventHub::new(),
        }
    }

    /// Replaces a snapshot, waking watchers only if it changed.
    pub fn update_snapshot(sender: &watch::Sender<Vec<Device>>, snapshot: Vec<Device>) {
        sender.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }
}

impl Default for Observers {
    fn default() -> Self {
        Observers::new()
    }
}
