//! Configuration for profiling sessions.

use std::env;
use std::time::Duration;

use crate::constants::{DEFAULT_CALIBRATION_MS, DEFAULT_CAPACITY};

/// Configuration options for [`Profiler`](crate::Profiler).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Whether scope begin/end record anything (default: true).
    ///
    /// Has no effect when the crate is built without the `enabled` feature.
    pub enabled: bool,

    /// Number of anchor slots, root included (default: 4,096).
    pub capacity: usize,

    /// Wall-clock window for frequency calibration (default: 100 ms).
    pub calibration_window: Duration,

    /// Pin the thread to one CPU while calibrating (default: true).
    pub pin_calibration_thread: bool,

    /// Known counter frequency in ticks per second.
    ///
    /// When set, `finish` skips calibration and uses this value.
    pub cycles_per_second: Option<u64>,

    /// Keep label-to-slot assignments across sessions (default: false).
    ///
    /// Counts are cleared at every session start either way.
    pub retain_labels: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: DEFAULT_CAPACITY,
            calibration_window: Duration::from_millis(DEFAULT_CALIBRATION_MS),
            pin_calibration_thread: true,
            cycles_per_second: None,
            retain_labels: false,
        }
    }
}

impl Config {
    /// Default configuration overlaid with `CYCLEPROF_*` environment variables.
    ///
    /// | Variable                   | Field                    |
    /// |----------------------------|--------------------------|
    /// | `CYCLEPROF_ENABLED`        | `enabled`                |
    /// | `CYCLEPROF_CAPACITY`       | `capacity`               |
    /// | `CYCLEPROF_CALIBRATION_MS` | `calibration_window`     |
    /// | `CYCLEPROF_PIN`            | `pin_calibration_thread` |
    /// | `CYCLEPROF_FREQ_HZ`        | `cycles_per_second`      |
    ///
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        Self::default().merge_env()
    }

    /// Overlay `CYCLEPROF_*` environment variables onto this configuration.
    pub fn merge_env(mut self) -> Self {
        if let Some(enabled) = parse_bool_env("CYCLEPROF_ENABLED") {
            self.enabled = enabled;
        }
        if let Some(capacity) = parse_usize_env("CYCLEPROF_CAPACITY") {
            self.capacity = capacity;
        }
        if let Some(ms) = parse_u64_env("CYCLEPROF_CALIBRATION_MS") {
            self.calibration_window = Duration::from_millis(ms);
        }
        if let Some(pin) = parse_bool_env("CYCLEPROF_PIN") {
            self.pin_calibration_thread = pin;
        }
        if let Some(hz) = parse_u64_env("CYCLEPROF_FREQ_HZ") {
            self.cycles_per_second = (hz > 0).then_some(hz);
        }
        self
    }
}

fn parse_bool_env(key: &str) -> Option<bool> {
    match env::var(key).ok()?.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_usize_env(key: &str) -> Option<usize> {
    env::var(key).ok()?.parse().ok()
}

fn parse_u64_env(key: &str) -> Option<u64> {
    env::var(key).ok()?.parse().ok()
}
