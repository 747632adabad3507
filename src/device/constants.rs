use uuid::Uuid;

/**
 * How often (milliseconds) the liveness monitor checks every connected device.
 */
pub const LIVENESS_INTERVAL: u64 = 2000;

/**
 * How long (milliseconds) checking if a peripheral is still connected may take.
 * A query that takes longer counts as "not connected".
 */
pub const IS_CONNECTED_DEADLINE: u64 = 2000;

/**
 * How long (milliseconds) a write to a characteristic may take.
 */
pub const WRITE_DEADLINE: u64 = 2000;

/**
 * How long (milliseconds) establishing a connection may take.
 */
pub const CONNECT_DEADLINE: u64 = 10000;

/**
 * How long (milliseconds) a discovery sweep runs before it is stopped automatically.
 */
pub const SCAN_DURATION: u64 = 5000;

/**
 * How many persisted devices are reconnected at startup. The radio stack of most phones and
 * adapters degrades quickly with several concurrent connection attempts.
 */
pub const AUTO_RECONNECT_CAP: usize = 2;

/**
 * How many events may queue up for one subscriber. Events for a subscriber that does not keep
 * up are dropped.
 */
pub const EVENT_QUEUE_CAPACITY: usize = 64;

/**
 * The storage key under which the list of connected devices is persisted.
 */
pub const SESSION_STORAGE_KEY: &str = "connected_devices";

/**
 * Name used for devices that do not advertise one.
 */
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown Device";

/**
 * The UUID of the Bluetooth BLE service of the JI Band.
 */
pub const JIBAND_SERVICE: &str = "f47ac10b-58cc-4372-a567-0e02b2c3d479";

/**
 * The UUID of the characteristic that commands are written to (central -> peripheral).
 */
pub const JIBAND_WRITE_CHARACTERISTIC: &str = "9d5b4a92-1b25-4c32-9b61-524f4ec58e90";

/**
 * The UUID of the characteristic that reports device state (peripheral -> central).
 */
pub const JIBAND_NOTIFY_CHARACTERISTIC: &str = "9d5b4a92-1b25-4c32-9b61-524f4ec58d80";

pub const fn jiband_service_uuid() -> Uuid {
    Uuid::from_u128(0xf47ac10b_58cc_4372_a567_0e02b2c3d479)
}

pub const fn jiband_write_uuid() -> Uuid {
    Uuid::from_u128(0x9d5b4a92_1b25_4c32_9b61_524f4ec58e90)
}

pub const fn jiband_notify_uuid() -> Uuid {
    Uuid::from_u128(0x9d5b4a92_1b25_4c32_9b61_524f4ec58d80)
}
