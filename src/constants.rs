//! Fixed values shared across the profiler.

/// Slot index of the root anchor. Un-instrumented and overflow time lands here.
pub const ROOT_SLOT: usize = 0;

/// Label pre-registered in the root slot at every session start.
pub const ROOT_LABEL: &str = "Root";

/// Default number of anchor slots, root included.
pub const DEFAULT_CAPACITY: usize = 4096;

/// Default frequency calibration window in milliseconds.
pub const DEFAULT_CALIBRATION_MS: u64 = 100;

/// Ticks per second of [`OsClock`](crate::measurement::OsClock).
pub const NANOS_PER_SECOND: u64 = 1_000_000_000;
