//! Timestamp sources and counter calibration.
//!
//! This module provides:
//! - The [`CycleCounter`] abstraction with the platform implementation [`Tsc`]
//! - The [`WallClock`] reference used for calibration ([`OsClock`])
//! - [`FrequencyEstimator`], converting counter ticks to wall-clock time
//! - [`affinity`] pinning for the calibration window
//!
//! # Counter Selection
//!
//! - **x86_64**: `rdtsc` (invariant TSC on modern parts, ticks at a fixed rate)
//! - **aarch64**: `cntvct_el0` virtual timer (often 24-54 MHz, resolution varies by SoC)
//! - **other**: nanoseconds from `std::time::Instant`

pub mod affinity;
mod frequency;
mod timer;

pub use frequency::{estimate_cpu_frequency, FrequencyEstimator};
pub use timer::{os_timer, rdtsc, CycleCounter, OsClock, Tsc, WallClock};
