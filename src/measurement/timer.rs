//! Platform-specific cycle counters and the wall clock they are calibrated against.
//!
//! Provides cycle-accurate timestamps using:
//! - x86_64: `lfence; rdtsc` with compiler fence
//! - aarch64: `isb; mrs cntvct_el0`
//! - Fallback: nanoseconds since a process-wide `std::time::Instant` epoch

use std::sync::atomic::{compiler_fence, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use crate::constants::NANOS_PER_SECOND;

/// A monotonically non-decreasing hardware tick source.
///
/// Implementations must be cheap enough to call on every scope transition;
/// the profiler reads the counter twice per measured region.
pub trait CycleCounter: Send + Sync {
    /// Read the current tick count.
    fn read_cycles(&self) -> u64;
}

impl<C: CycleCounter + ?Sized> CycleCounter for &C {
    #[inline]
    fn read_cycles(&self) -> u64 {
        (**self).read_cycles()
    }
}

impl<C: CycleCounter + ?Sized> CycleCounter for Arc<C> {
    #[inline]
    fn read_cycles(&self) -> u64 {
        (**self).read_cycles()
    }
}

/// The platform timestamp counter (rdtsc / cntvct_el0).
#[derive(Debug, Clone, Copy, Default)]
pub struct Tsc;

impl Tsc {
    /// Name of the underlying counter, for diagnostics.
    pub fn name(&self) -> &'static str {
        #[cfg(target_arch = "x86_64")]
        {
            "rdtsc"
        }
        #[cfg(target_arch = "aarch64")]
        {
            "cntvct_el0"
        }
        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            "Instant"
        }
    }
}

impl CycleCounter for Tsc {
    #[inline]
    fn read_cycles(&self) -> u64 {
        rdtsc()
    }
}

/// Read the CPU cycle counter with appropriate serialization.
///
/// On x86_64, this uses `lfence; rdtsc` to ensure all prior instructions
/// complete before reading the timestamp counter.
///
/// On aarch64, this uses `isb; mrs cntvct_el0` for the virtual timer count.
///
/// On other platforms, falls back to `Instant::now()` based measurement
/// (less precise but still functional).
#[inline]
pub fn rdtsc() -> u64 {
    #[cfg(target_arch = "x86_64")]
    {
        rdtsc_x86_64()
    }

    #[cfg(target_arch = "aarch64")]
    {
        rdtsc_aarch64()
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        rdtsc_fallback()
    }
}

#[cfg(target_arch = "x86_64")]
#[inline]
fn rdtsc_x86_64() -> u64 {
    compiler_fence(Ordering::SeqCst);

    let cycles: u64;
    unsafe {
        std::arch::asm!(
            "lfence",
            "rdtsc",
            "shl rdx, 32",
            "or rax, rdx",
            out("rax") cycles,
            out("rdx") _,
            options(nostack, nomem),
        );
    }

    compiler_fence(Ordering::SeqCst);

    cycles
}

#[cfg(target_arch = "aarch64")]
#[inline]
fn rdtsc_aarch64() -> u64 {
    compiler_fence(Ordering::SeqCst);

    let cycles: u64;
    unsafe {
        std::arch::asm!(
            "isb",
            "mrs {}, cntvct_el0",
            out(reg) cycles,
            options(nostack, nomem),
        );
    }

    compiler_fence(Ordering::SeqCst);

    cycles
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
#[inline]
fn rdtsc_fallback() -> u64 {
    compiler_fence(Ordering::SeqCst);
    os_timer()
}

/// A wall clock with a known tick rate, used as the calibration reference.
pub trait WallClock {
    /// Current reading in this clock's ticks.
    fn now(&self) -> u64;

    /// How many ticks this clock advances per second.
    fn ticks_per_second(&self) -> u64;
}

/// Monotonic OS clock in nanoseconds since the first read in this process.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsClock;

impl WallClock for OsClock {
    #[inline]
    fn now(&self) -> u64 {
        os_timer()
    }

    fn ticks_per_second(&self) -> u64 {
        NANOS_PER_SECOND
    }
}

/// Nanoseconds elapsed since a process-wide reference instant.
///
/// The reference is taken lazily on the first call, so the very first
/// reading is always zero.
pub fn os_timer() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();

    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_nanos() as u64
}
