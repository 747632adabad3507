mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use futures::StreamExt;

use jiband_link::device::constants::UNKNOWN_DEVICE_NAME;
use jiband_link::device::liveness::LivenessMonitor;
use jiband_link::error::{ConnectError, DisconnectError, SendError};
use jiband_link::session::store::SessionStore;
use jiband_link::{Device, DeviceEvent, DeviceId, DisconnectCause, InboundEvent, OutboundCommand};

use common::{band, found, ids, service, settle};

#[tokio::test(start_paused = true)]
async fn concurrent_connects_make_one_attempt() {
    let (fake, _storage, service) = service();
    fake.set_connect_delay(Duration::from_millis(100));
    let manager = service.manager();
    let a = band("A");

    let (first, second) = tokio::join!(manager.connect(&a), manager.connect(&a));

    assert!(first.is_ok());
    assert!(matches!(second, Err(ConnectError::AlreadyConnecting(id)) if id == a.id));
    assert_eq!(fake.connect_attempts(&a.id), 1);
    assert_eq!(ids(&manager.connected_devices()), ["A"]);
}

#[tokio::test(start_paused = true)]
async fn connecting_twice_is_a_no_op() {
    let (fake, _storage, service) = service();
    let manager = service.manager();
    let a = band("A");

    manager.connect(&a).await.unwrap();
    manager.connect(&a).await.unwrap();

    assert_eq!(fake.connect_attempts(&a.id), 1);
    assert_eq!(manager.connected_devices().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_connect_can_be_retried() {
    let (fake, _storage, service) = service();
    let manager = service.manager();
    let a = band("A");
    fake.fail_connect(&a.id);

    let result = manager.connect(&a).await;
    assert!(matches!(result, Err(ConnectError::Transport { .. })));
    assert!(!manager.is_connecting(&a.id));
    assert!(!manager.is_connected(&a.id));
    assert!(manager.connected_devices().is_empty());

    fake.allow_connect(&a.id);
    manager.connect(&a).await.unwrap();
    assert!(manager.is_connected(&a.id));
    assert_eq!(fake.connect_attempts(&a.id), 2);
}

#[tokio::test(start_paused = true)]
async fn connect_gives_up_after_deadline() {
    let (fake, _storage, service) = service();
    fake.set_connect_delay(Duration::from_secs(60));
    let manager = service.manager();
    let a = band("A");

    let result = manager.connect(&a).await;
    assert!(matches!(
        result,
        Err(ConnectError::Transport { source: jiband_link::error::TransportError::Timeout { .. } })
    ));
    assert!(!manager.is_connecting(&a.id));
}

#[tokio::test(start_paused = true)]
async fn name_read_on_connect_wins() {
    let (fake, _storage, service) = service();
    let manager = service.manager();
    fake.set_name(&DeviceId::from("A"), "Left wrist");

    manager.connect(&Device::new("A", None)).await.unwrap();
    manager.connect(&Device::new("B", None)).await.unwrap();

    let connected = manager.connected_devices();
    assert_eq!(connected[0].name, "Left wrist");
    assert_eq!(connected[1].name, UNKNOWN_DEVICE_NAME);
}

#[tokio::test(start_paused = true)]
async fn connected_snapshot_is_observable() {
    let (_fake, _storage, service) = service();
    let manager = service.manager();
    let mut connected = manager.subscribe_connected();

    manager.connect(&band("A")).await.unwrap();
    assert!(connected.has_changed().unwrap());
    assert_eq!(ids(&connected.borrow_and_update()), ["A"]);

    manager.disconnect(&DeviceId::from("A")).await.unwrap();
    assert!(connected.borrow_and_update().is_empty());
}

#[tokio::test(start_paused = true)]
async fn disconnect_is_idempotent() {
    let (fake, _storage, service) = service();
    let manager = service.manager();
    let a = band("A");
    let mut disconnects = manager.subscribe_disconnects();

    manager.connect(&a).await.unwrap();
    manager.disconnect(&a.id).await.unwrap();
    manager.disconnect(&a.id).await.unwrap();
    manager.disconnect(&DeviceId::from("never-seen")).await.unwrap();

    let notice = disconnects.next().await.unwrap();
    assert_eq!(notice.device, a);
    assert_eq!(notice.cause, DisconnectCause::UserInitiated);
    assert!(disconnects.try_next().is_err());

    assert_eq!(fake.stop_notification_calls(), 1);
    assert!(!fake.is_link_up(&a.id));
    assert!(!manager.is_connected(&a.id));
}

#[tokio::test(start_paused = true)]
async fn failed_disconnect_keeps_device_connected() {
    let (fake, _storage, service) = service();
    let manager = service.manager();
    let a = band("A");
    let mut disconnects = manager.subscribe_disconnects();

    manager.connect(&a).await.unwrap();
    fake.fail_disconnect(&a.id);

    let result = manager.disconnect(&a.id).await;
    assert!(matches!(result, Err(DisconnectError::Transport { .. })));
    assert!(manager.is_connected(&a.id));
    assert!(disconnects.try_next().is_err());

    fake.allow_disconnect(&a.id);
    manager.disconnect(&a.id).await.unwrap();
    assert!(!manager.is_connected(&a.id));
    assert_eq!(disconnects.next().await.unwrap().cause, DisconnectCause::UserInitiated);
}

#[tokio::test(start_paused = true)]
async fn failed_disconnect_keeps_reporting_events() {
    let (fake, _storage, service) = service();
    let manager = service.manager();
    let a = band("A");
    let mut events = manager.subscribe_events();

    manager.connect(&a).await.unwrap();
    fake.fail_disconnect(&a.id);
    assert!(manager.disconnect(&a.id).await.is_err());

    assert!(fake.is_subscribed(&a.id));
    assert!(fake.notify(&a.id, b"ENTERED_LOW_POWER_MODE"));
    assert_eq!(
        events.next().await.unwrap(),
        DeviceEvent { id: a.id.clone(), event: InboundEvent::EnteredLowPowerMode },
    );

    // a retry stops the new subscription as well
    fake.allow_disconnect(&a.id);
    manager.disconnect(&a.id).await.unwrap();
    assert_eq!(fake.stop_notification_calls(), 2);
    assert!(!fake.is_subscribed(&a.id));
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_connect() {
    let (fake, _storage, service) = service();
    fake.set_connect_delay(Duration::from_secs(1));
    let manager = service.manager().clone();
    let a = band("A");
    let mut disconnects = manager.subscribe_disconnects();

    let attempt = {
        let manager = manager.clone();
        let a = a.clone();
        tokio::spawn(async move { manager.connect(&a).await })
    };

    settle().await;
    assert!(manager.is_connecting(&a.id));

    manager.disconnect(&a.id).await.unwrap();
    let result = attempt.await.unwrap();

    assert!(matches!(result, Err(ConnectError::Cancelled(id)) if id == a.id));
    assert!(!manager.is_connecting(&a.id));
    assert!(!manager.is_connected(&a.id));
    assert!(!fake.is_link_up(&a.id));
    assert!(disconnects.try_next().is_err());
}

#[tokio::test(start_paused = true)]
async fn send_to_unknown_device_is_rejected_without_io() {
    let (fake, _storage, service) = service();
    let id = DeviceId::from("A");

    let result = service.manager().send_command(&id, OutboundCommand::ToggleDataCollection).await;
    assert!(matches!(result, Err(SendError::NotConnected(_))));
    assert_eq!(fake.liveness_queries(&id), 0);
    assert!(fake.writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn send_to_silently_dropped_device_is_rejected() {
    let (fake, _storage, service) = service();
    let manager = service.manager();
    let a = band("A");

    manager.connect(&a).await.unwrap();
    fake.drop_link(&a.id);

    let result = manager.send_command(&a.id, OutboundCommand::ToggleLowPowerMode).await;
    assert!(matches!(result, Err(SendError::NotConnected(id)) if id == a.id));
    assert_eq!(fake.liveness_queries(&a.id), 1);
    assert!(fake.writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn send_with_hanging_status_query_is_rejected() {
    let (fake, _storage, service) = service();
    let manager = service.manager();
    let a = band("A");

    manager.connect(&a).await.unwrap();
    fake.hang_liveness_query(&a.id);

    let result = manager.send_command(&a.id, OutboundCommand::ToggleCalibration).await;
    assert!(matches!(result, Err(SendError::NotConnected(_))));
    assert!(fake.writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_write_is_reported() {
    let (fake, _storage, service) = service();
    let manager = service.manager();
    let a = band("A");

    manager.connect(&a).await.unwrap();
    fake.fail_write(&a.id);

    let result = manager.send_command(&a.id, OutboundCommand::ToggleCalibration).await;
    assert!(matches!(result, Err(SendError::Transport { .. })));
    assert!(manager.is_connected(&a.id));
}

#[tokio::test(start_paused = true)]
async fn broadcast_reaches_every_live_device() {
    let (fake, _storage, service) = service();
    let manager = service.manager();

    manager.connect(&band("A")).await.unwrap();
    manager.connect(&band("B")).await.unwrap();
    fake.drop_link(&DeviceId::from("B"));

    let results = manager.broadcast(OutboundCommand::ToggleDataCollection).await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0, DeviceId::from("A"));
    assert!(results[0].1.is_ok());
    assert_eq!(results[1].0, DeviceId::from("B"));
    assert!(matches!(results[1].1, Err(SendError::NotConnected(_))));

    let writes = fake.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].id, DeviceId::from("A"));
    assert_eq!(writes[0].bytes, vec![0x01]);
}

#[tokio::test(start_paused = true)]
async fn notifications_are_decoded_and_published() {
    let (fake, _storage, service) = service();
    let manager = service.manager();
    let a = band("A");
    let mut events = manager.subscribe_events();

    manager.connect(&a).await.unwrap();
    assert!(fake.is_subscribed(&a.id));

    assert!(fake.notify(&a.id, b"calibration_started\n"));
    assert_eq!(
        events.next().await.unwrap(),
        DeviceEvent { id: a.id.clone(), event: InboundEvent::CalibrationStarted },
    );

    // a broken notification is logged, the device stays connected and keeps reporting
    assert!(fake.notify_error(&a.id, "garbled"));
    assert!(fake.notify(&a.id, b" Battery low "));
    assert_eq!(events.next().await.unwrap().event, InboundEvent::Custom("Battery low".to_string()));
    assert!(manager.is_connected(&a.id));
}

#[tokio::test(start_paused = true)]
async fn no_events_after_disconnect() {
    let (fake, _storage, service) = service();
    let manager = service.manager();
    let a = band("A");
    let mut events = manager.subscribe_events();

    manager.connect(&a).await.unwrap();
    manager.disconnect(&a.id).await.unwrap();

    assert!(!fake.notify(&a.id, b"DEVICE_STOPPED_COLLECTION"));
    settle().await;
    assert!(events.try_next().is_err());
}

#[tokio::test(start_paused = true)]
async fn failed_subscribe_does_not_fail_connect() {
    let (fake, _storage, service) = service();
    let manager = service.manager();
    let a = band("A");
    fake.fail_notification(&a.id);

    manager.connect(&a).await.unwrap();
    assert!(manager.is_connected(&a.id));
    assert!(!fake.is_subscribed(&a.id));

    // nothing to stop
    manager.disconnect(&a.id).await.unwrap();
    assert_eq!(fake.stop_notification_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn connected_set_is_persisted() {
    let (_fake, storage, service) = service();
    let manager = service.manager();
    let store = SessionStore::new(Arc::new(storage));

    manager.connect(&band("A")).await.unwrap();
    manager.connect(&band("B")).await.unwrap();
    assert_eq!(store.restore().await.unwrap(), vec![band("A"), band("B")]);

    manager.disconnect(&DeviceId::from("A")).await.unwrap();
    assert_eq!(store.restore().await.unwrap(), vec![band("B")]);
}

#[tokio::test(start_paused = true)]
async fn lost_devices_stay_remembered() {
    let (fake, storage, service) = service();
    let manager = service.manager();
    let store = SessionStore::new(Arc::new(storage));

    manager.connect(&band("A")).await.unwrap();
    fake.drop_link(&DeviceId::from("A"));
    LivenessMonitor::new(manager.clone()).sweep().await;

    assert!(manager.connected_devices().is_empty());
    assert_eq!(store.restore().await.unwrap(), vec![band("A")]);
}

struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

#[tokio::test(start_paused = true)]
async fn available_and_connected_never_overlap() {
    let (fake, _storage, service) = service();
    let manager = service.manager();
    let names = ["A", "B", "C", "D"];
    fake.set_discoverable(names.iter().map(|id| found(id)).collect());

    let mut monitor = LivenessMonitor::new(manager.clone());
    let mut rng = Lcg(7);

    for _ in 0..200 {
        let id = DeviceId::from(names[(rng.next() % names.len() as u64) as usize]);

        match rng.next() % 7 {
            0 => { let _ = manager.connect(&band(id.as_str())).await; },
            1 => { let _ = manager.disconnect(&id).await; },
            2 => {
                fake.drop_link(&id);
                monitor.sweep().await;
            },
            3 => {
                let _ = service.scanner().start_scan(Duration::from_secs(1)).await;
                settle().await;
            },
            4 => { let _ = service.scanner().stop_scan().await; },
            5 => fake.fail_connect(&id),
            _ => fake.allow_connect(&id),
        }

        let available: HashSet<DeviceId> = manager.available_devices().into_iter().map(|device| device.id).collect();
        let connected: Vec<DeviceId> = manager.connected_devices().into_iter().map(|device| device.id).collect();
        let unique: HashSet<&DeviceId> = connected.iter().collect();

        assert_eq!(unique.len(), connected.len());
        assert!(connected.iter().all(|id| !available.contains(id)));
        assert!(connected.iter().all(|id| manager.is_connected(id) && !manager.is_connecting(id)));
        // nothing is left half-connected between operations
        assert!(manager.connecting_devices().is_empty());
    }
}
