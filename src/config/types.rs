use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::device::constants::{
    AUTO_RECONNECT_CAP, CONNECT_DEADLINE, IS_CONNECTED_DEADLINE, LIVENESS_INTERVAL, SCAN_DURATION, WRITE_DEADLINE,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub scan_duration_ms: u64,
    pub liveness_interval_ms: u64,
    pub is_connected_deadline_ms: u64,
    pub write_deadline_ms: u64,
    pub connect_deadline_ms: u64,
    pub auto_reconnect_cap: usize,
    // number of consecutive failed liveness queries before a device is evicted
    pub liveness_failure_threshold: u32,
    pub service_filter: bool,
}

impl Config {
    /// Replaces values that would stall the core (zero intervals or deadlines) with defaults.
    pub fn validate(mut self) -> Self {
        let defaults = Config::default();

        if self.scan_duration_ms == 0 { self.scan_duration_ms = defaults.scan_duration_ms; }
        if self.liveness_interval_ms == 0 { self.liveness_interval_ms = defaults.liveness_interval_ms; }
        if self.is_connected_deadline_ms == 0 { self.is_connected_deadline_ms = defaults.is_connected_deadline_ms; }
        if self.write_deadline_ms == 0 { self.write_deadline_ms = defaults.write_deadline_ms; }
        if self.connect_deadline_ms == 0 { self.connect_deadline_ms = defaults.connect_deadline_ms; }
        if self.liveness_failure_threshold == 0 { self.liveness_failure_threshold = 1; }

        self
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_millis(self.scan_duration_ms)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }

    pub fn is_connected_deadline(&self) -> Duration {
        Duration::from_millis(self.is_connected_deadline_ms)
    }

    pub fn write_deadline(&self) -> Duration {
        Duration::from_millis(self.write_deadline_ms)
    }

    pub fn connect_deadline(&self) -> Duration {
        Duration::from_millis(self.connect_deadline_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            scan_duration_ms: SCAN_DURATION,
            liveness_interval_ms: LIVENESS_INTERVAL,
            is_connected_deadline_ms: IS_CONNECTED_DEADLINE,
            write_deadline_ms: WRITE_DEADLINE,
            connect_deadline_ms: CONNECT_DEADLINE,
            auto_reconnect_cap: AUTO_RECONNECT_CAP,
            liveness_failure_threshold: 1,
            service_filter: false,
        }
    }
}
