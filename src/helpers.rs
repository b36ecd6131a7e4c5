//! Deterministic clocks for exercising the profiler without real hardware time.
//!
//! [`ManualCounter`] is a cycle counter that only moves when told to, which
//! makes attribution exact and repeatable:
//!
//! ```ignore
//! use cycleprof::{helpers::ManualCounter, Profiler};
//!
//! let counter = ManualCounter::new();
//! let profiler = Profiler::with_counter(counter.clone()).cycles_per_second(1_000);
//! profiler.start();
//! {
//!     let _outer = profiler.scope("outer");
//!     counter.advance(250);
//! }
//! let report = profiler.finish()?;
//! ```
//!
//! [`SimulatedClock`] is a wall clock that advances a fixed step per read,
//! paired with a counter running at a fixed ratio to it. It drives the
//! frequency estimator through a calibration window instantly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::constants::NANOS_PER_SECOND;
use crate::measurement::{CycleCounter, WallClock};

/// A cycle counter advanced explicitly by the caller.
///
/// Clones share the same count.
#[derive(Debug, Clone, Default)]
pub struct ManualCounter {
    ticks: Arc<AtomicU64>,
}

impl ManualCounter {
    /// Counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter starting at `ticks`.
    pub fn starting_at(ticks: u64) -> Self {
        Self {
            ticks: Arc::new(AtomicU64::new(ticks)),
        }
    }

    /// Move the counter forward by `ticks`.
    pub fn advance(&self, ticks: u64) {
        self.ticks.fetch_add(ticks, Ordering::SeqCst);
    }

    /// Overwrite the current count.
    pub fn set(&self, ticks: u64) {
        self.ticks.store(ticks, Ordering::SeqCst);
    }

    /// Current count.
    pub fn get(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }
}

impl CycleCounter for ManualCounter {
    fn read_cycles(&self) -> u64 {
        self.get()
    }
}

/// A nanosecond wall clock that advances `step` nanoseconds on every read.
///
/// With a [`granularity`](Self::granularity) set, reads report the true time
/// rounded down to a multiple of it, like a coarse OS timer.
#[derive(Debug, Clone)]
pub struct SimulatedClock {
    now: Arc<AtomicU64>,
    step: u64,
    granularity: u64,
    cycles_per_tick: f64,
}

impl SimulatedClock {
    /// Clock advancing `step_ns` per read, with a 1:1 paired counter.
    pub fn new(step_ns: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(0)),
            step: step_ns,
            granularity: 1,
            cycles_per_tick: 1.0,
        }
    }

    /// Set how many counter ticks elapse per wall-clock nanosecond.
    pub fn cycles_per_tick(mut self, ratio: f64) -> Self {
        self.cycles_per_tick = ratio;
        self
    }

    /// Only report time in multiples of `ns`.
    ///
    /// The paired counter keeps reading the true time.
    pub fn granularity(mut self, ns: u64) -> Self {
        self.granularity = ns.max(1);
        self
    }

    /// A cycle counter locked to this clock's timeline.
    ///
    /// Reading the counter does not advance time.
    pub fn counter(&self) -> SimulatedCycles {
        SimulatedCycles {
            now: Arc::clone(&self.now),
            cycles_per_tick: self.cycles_per_tick,
        }
    }
}

impl WallClock for SimulatedClock {
    fn now(&self) -> u64 {
        let now = self.now.fetch_add(self.step, Ordering::SeqCst);
        now - now % self.granularity
    }

    fn ticks_per_second(&self) -> u64 {
        NANOS_PER_SECOND
    }
}

/// Counter paired with a [`SimulatedClock`].
#[derive(Debug, Clone)]
pub struct SimulatedCycles {
    now: Arc<AtomicU64>,
    cycles_per_tick: f64,
}

impl CycleCounter for SimulatedCycles {
    fn read_cycles(&self) -> u64 {
        (self.now.load(Ordering::SeqCst) as f64 * self.cycles_per_tick) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_counter_shared_between_clones() {
        let counter = ManualCounter::starting_at(10);
        let other = counter.clone();
        counter.advance(5);
        assert_eq!(other.read_cycles(), 15);
        other.set(100);
        assert_eq!(counter.get(), 100);
    }

    #[test]
    fn test_simulated_clock_steps_per_read() {
        let clock = SimulatedClock::new(7).cycles_per_tick(3.0);
        let cycles = clock.counter();
        assert_eq!(clock.now(), 0);
        assert_eq!(clock.now(), 7);
        assert_eq!(cycles.read_cycles(), 42);
        assert_eq!(cycles.read_cycles(), 42);
    }

    #[test]
    fn test_granularity_rounds_reported_time() {
        let clock = SimulatedClock::new(4).granularity(10);
        let cycles = clock.counter();
        let reported: Vec<u64> = (0..6).map(|_| clock.now()).collect();
        assert_eq!(reported, vec![0, 0, 0, 10, 10, 20]);
        assert_eq!(cycles.read_cycles(), 24);
    }
}
