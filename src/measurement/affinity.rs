//! Pinning the calibrating thread to a single CPU.
//!
//! Timestamp counters are per-core. If the thread migrates between the two
//! counter reads of a calibration window, the delta mixes two counters.
//! [`AffinityGuard`] pins the current thread to the CPU it is running on and
//! puts the original mask back when dropped.
//!
//! Only Linux supports pinning (`sched_setaffinity`, no privileges needed).
//! Elsewhere [`AffinityGuard::try_pin`] reports pinning as unavailable and
//! calibration runs unpinned.

/// Outcome of [`AffinityGuard::try_pin`].
#[derive(Debug)]
pub enum AffinityResult {
    /// The thread is pinned until the guard drops.
    Pinned(AffinityGuard),
    /// The thread was left where it was.
    NotPinned {
        /// Why pinning was skipped.
        reason: String,
    },
}

/// Restores the thread's CPU mask on drop.
pub struct AffinityGuard {
    #[cfg(target_os = "linux")]
    saved: libc::cpu_set_t,
    #[cfg(target_os = "linux")]
    cpu: usize,
}

impl AffinityGuard {
    /// Pin the current thread to the CPU it is running on.
    pub fn try_pin() -> AffinityResult {
        #[cfg(target_os = "linux")]
        {
            match Self::pin_here() {
                Ok(guard) => AffinityResult::Pinned(guard),
                Err(reason) => AffinityResult::NotPinned { reason },
            }
        }

        #[cfg(not(target_os = "linux"))]
        {
            AffinityResult::NotPinned {
                reason: format!("thread pinning is not available on {}", std::env::consts::OS),
            }
        }
    }

    /// The CPU this guard pinned to, where the platform reports one.
    pub fn pinned_cpu(&self) -> Option<usize> {
        #[cfg(target_os = "linux")]
        {
            Some(self.cpu)
        }

        #[cfg(not(target_os = "linux"))]
        {
            None
        }
    }

    #[cfg(target_os = "linux")]
    fn pin_here() -> Result<Self, String> {
        let saved = cpu_mask::current().map_err(|e| format!("cannot read CPU mask: {}", e))?;
        let cpu = cpu_mask::running_on().map_err(|e| format!("cannot query current CPU: {}", e))?;
        cpu_mask::apply(&cpu_mask::only(cpu))
            .map_err(|e| format!("cannot pin to CPU {}: {}", cpu, e))?;

        tracing::debug!(cpu, "Calibration thread pinned");
        Ok(Self { saved, cpu })
    }
}

#[cfg(target_os = "linux")]
impl Drop for AffinityGuard {
    fn drop(&mut self) {
        match cpu_mask::apply(&self.saved) {
            Ok(()) => tracing::debug!(cpu = self.cpu, "Calibration thread unpinned"),
            Err(e) => tracing::warn!("Could not restore CPU mask after calibration: {}", e),
        }
    }
}

impl std::fmt::Debug for AffinityGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AffinityGuard")
            .field("pinned_cpu", &self.pinned_cpu())
            .finish()
    }
}

/// Thin wrappers over the libc CPU-set calls for the calling thread.
#[cfg(target_os = "linux")]
mod cpu_mask {
    use std::io;
    use std::mem::{size_of, MaybeUninit};

    pub(super) fn current() -> io::Result<libc::cpu_set_t> {
        let mut mask = MaybeUninit::<libc::cpu_set_t>::uninit();
        // SAFETY: the kernel writes at most size_of::<cpu_set_t>() bytes and
        // the mask is only read after a successful return.
        unsafe {
            if libc::sched_getaffinity(0, size_of::<libc::cpu_set_t>(), mask.as_mut_ptr()) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(mask.assume_init())
        }
    }

    pub(super) fn apply(mask: &libc::cpu_set_t) -> io::Result<()> {
        // SAFETY: `mask` is a valid, initialised cpu_set_t.
        let rc = unsafe { libc::sched_setaffinity(0, size_of::<libc::cpu_set_t>(), mask) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub(super) fn running_on() -> io::Result<usize> {
        // SAFETY: no arguments, no memory access.
        let cpu = unsafe { libc::sched_getcpu() };
        usize::try_from(cpu).map_err(|_| io::Error::last_os_error())
    }

    pub(super) fn only(cpu: usize) -> libc::cpu_set_t {
        // SAFETY: an all-zero cpu_set_t is the empty set.
        let mut mask: libc::cpu_set_t = unsafe { std::mem::zeroed() };
        // SAFETY: CPU_SET bounds-checks `cpu` against CPU_SETSIZE.
        unsafe { libc::CPU_SET(cpu, &mut mask) };
        mask
    }

    #[cfg(test)]
    pub(super) fn cpus(mask: &libc::cpu_set_t) -> Vec<usize> {
        (0..libc::CPU_SETSIZE as usize)
            // SAFETY: indices stay below CPU_SETSIZE.
            .filter(|&cpu| unsafe { libc::CPU_ISSET(cpu, mask) })
            .collect()
    }
}
