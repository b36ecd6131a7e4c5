//! Tick-rate estimation for the cycle counter.
//!
//! The counter's frequency is not reported by the hardware in a portable way,
//! so it is measured: read the counter and the wall clock, spin on the wall
//! clock for a calibration window, read both again and take the ratio.
//!
//! The wait is a busy-poll. A blocking sleep would let the scheduler park the
//! thread for an unknown extra interval, and the counter may keep ticking
//! differently across a core migration, which is why the thread is pinned
//! for the duration of the window.

use std::time::Duration;

use super::affinity::{AffinityGuard, AffinityResult};
use super::timer::{CycleCounter, OsClock, Tsc, WallClock};
use crate::constants::DEFAULT_CALIBRATION_MS;

/// Consecutive reads with neither clock moving after which calibration gives up.
const MAX_FROZEN_READS: u64 = 1_000_000;

/// Reads allowed before the wall clock's first tick, when no counter rate is
/// known yet to bound the wait.
const MAX_READS_BEFORE_FIRST_TICK: u64 = 100_000_000;

/// A wall clock that stays put for longer than this many calibration
/// windows, measured on the counter, is treated as stopped.
const STALL_WINDOWS: u128 = 8;

/// Estimates a [`CycleCounter`]'s tick rate against a [`WallClock`].
#[derive(Debug, Clone)]
pub struct FrequencyEstimator<C, W> {
    counter: C,
    clock: W,
    window: Duration,
    pin_thread: bool,
}

impl FrequencyEstimator<Tsc, OsClock> {
    /// Estimator for the platform counter with default settings
    /// (100 ms window, pinned thread).
    pub fn platform() -> Self {
        Self::new(Tsc, OsClock)
    }
}

impl<C: CycleCounter, W: WallClock> FrequencyEstimator<C, W> {
    /// Create an estimator with the default window and thread pinning enabled.
    pub fn new(counter: C, clock: W) -> Self {
        Self {
            counter,
            clock,
            window: Duration::from_millis(DEFAULT_CALIBRATION_MS),
            pin_thread: true,
        }
    }

    /// Set the calibration window.
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Enable or disable pinning the calibrating thread to its current CPU.
    pub fn pin_thread(mut self, pin: bool) -> Self {
        self.pin_thread = pin;
        self
    }

    /// Calibration window in wall-clock ticks, at least one tick.
    fn window_ticks(&self) -> u64 {
        let rate = self.clock.ticks_per_second() as u128;
        let ticks = self.window.as_nanos() * rate / 1_000_000_000;
        (ticks as u64).max(1)
    }

    /// Estimate the counter frequency in ticks per second.
    ///
    /// Returns 0 when the frequency cannot be determined (the wall clock did
    /// not advance, or stopped advancing before the window elapsed). Callers
    /// should treat 0 as "unknown" and fall back to raw tick counts.
    pub fn estimate(&self) -> u64 {
        let _pin = if self.pin_thread {
            match AffinityGuard::try_pin() {
                AffinityResult::Pinned(guard) => Some(guard),
                AffinityResult::NotPinned { reason } => {
                    tracing::debug!("Calibrating without CPU pinning: {}", reason);
                    None
                }
            }
        } else {
            None
        };

        let wall_rate = self.clock.ticks_per_second();
        let wait = self.window_ticks();

        let cycle_start = self.counter.read_cycles();
        let wall_start = self.clock.now();
        let mut wall_elapsed = 0u64;
        let mut cycles_at_tick = cycle_start;
        let mut stalled_reads = 0u64;

        while wall_elapsed < wait {
            let elapsed = self.clock.now().saturating_sub(wall_start);
            let cycles_now = self.counter.read_cycles();
            if elapsed != wall_elapsed {
                wall_elapsed = elapsed;
                cycles_at_tick = cycles_now;
                stalled_reads = 0;
                continue;
            }

            stalled_reads += 1;
            let stall = Stall {
                reads: stalled_reads,
                cycles: cycles_now.saturating_sub(cycles_at_tick),
                cycles_before: cycles_at_tick.saturating_sub(cycle_start),
                wall_before: wall_elapsed,
            };
            if stall.exceeds(wait) {
                tracing::warn!(
                    wall_ticks = wall_elapsed,
                    stalled_reads,
                    "Wall clock stopped advancing during calibration"
                );
                return 0;
            }
        }

        let cycle_end = self.counter.read_cycles();
        let cycle_elapsed = cycle_end.saturating_sub(cycle_start);

        let frequency = frequency_from_deltas(wall_rate, cycle_elapsed, wall_elapsed);
        tracing::debug!(
            cycles = cycle_elapsed,
            wall_ticks = wall_elapsed,
            frequency,
            "Estimated counter frequency"
        );
        frequency
    }
}

/// How long the wall clock has shown the same value.
#[derive(Debug, Clone, Copy)]
struct Stall {
    /// Reads since the last wall-clock tick.
    reads: u64,
    /// Counter ticks since the last wall-clock tick.
    cycles: u64,
    /// Counter ticks between the start and the last wall-clock tick.
    cycles_before: u64,
    /// Wall ticks between the start and the last wall-clock tick.
    wall_before: u64,
}

impl Stall {
    /// Whether to stop waiting for a window of `wait` wall ticks.
    ///
    /// Once the wall clock has ticked, the counter rate observed so far bounds
    /// the wait, so coarse clocks are not mistaken for stopped ones. Read
    /// counts only matter when the counter cannot measure the stall.
    fn exceeds(&self, wait: u64) -> bool {
        if self.cycles == 0 {
            return self.reads >= MAX_FROZEN_READS;
        }
        if self.wall_before == 0 || self.cycles_before == 0 {
            return self.reads >= MAX_READS_BEFORE_FIRST_TICK;
        }
        let limit = self.cycles_before as u128 * wait as u128 * STALL_WINDOWS / self.wall_before as u128;
        self.cycles as u128 > limit
    }
}

/// `wall_rate * cycles / wall_ticks`, or 0 when no wall time elapsed.
pub(crate) fn frequency_from_deltas(wall_rate: u64, cycles: u64, wall_ticks: u64) -> u64 {
    if wall_ticks == 0 {
        return 0;
    }
    let freq = wall_rate as u128 * cycles as u128 / wall_ticks as u128;
    u64::try_from(freq).unwrap_or(u64::MAX)
}

/// Estimate the platform counter's frequency with default settings.
pub fn estimate_cpu_frequency() -> u64 {
    FrequencyEstimator::platform().estimate()
}
