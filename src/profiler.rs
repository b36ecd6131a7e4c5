//! Main `Profiler` entry point: session control and scope entry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::config::Config;
use crate::error::{ProfileError, ProfileResult};
use crate::measurement::{CycleCounter, FrequencyEstimator, OsClock, Tsc};
use crate::registry::Anchor;
use crate::result::{Report, ReportWarning};
use crate::tracker::{ScopeToken, ScopeTracker};
use crate::COMPILED_IN;

/// A profiling session: anchor registry, open-scope stacks and the counter
/// they are measured with.
///
/// Construct one per measurement run and share it by reference with the code
/// being measured. All scope transitions are serialized through one lock, so
/// scopes may be opened from several threads; each thread keeps its own
/// parent chain.
///
/// # Example
///
/// ```ignore
/// use cycleprof::Profiler;
///
/// let profiler = Profiler::new();
/// profiler.start();
///
/// {
///     let _scope = profiler.scope("parse");
///     parse_input();
/// }
///
/// let report = profiler.finish()?;
/// println!("{}", report);
/// ```
#[derive(Debug)]
pub struct Profiler<C: CycleCounter = Tsc> {
    config: Config,
    counter: C,
    enabled: AtomicBool,
    state: Mutex<Session>,
}

#[derive(Debug)]
struct Session {
    tracker: ScopeTracker,
    start_ticks: Option<u64>,
}

impl Session {
    fn new(capacity: usize) -> Self {
        Self {
            tracker: ScopeTracker::new(capacity),
            start_ticks: None,
        }
    }
}

impl Default for Profiler<Tsc> {
    fn default() -> Self {
        Self::new()
    }
}

impl Profiler<Tsc> {
    /// Profiler on the platform counter with default configuration.
    pub fn new() -> Self {
        Self::from_config(Config::default())
    }

    /// Profiler on the platform counter configured from `CYCLEPROF_*` variables.
    pub fn from_env() -> Self {
        Self::from_config(Config::from_env())
    }

    /// Profiler on the platform counter with the given configuration.
    pub fn from_config(config: Config) -> Self {
        Self::with_config_and_counter(config, Tsc)
    }
}

impl<C: CycleCounter> Profiler<C> {
    /// Profiler reading ticks from `counter`, default configuration.
    pub fn with_counter(counter: C) -> Self {
        Self::with_config_and_counter(Config::default(), counter)
    }

    /// Profiler reading ticks from `counter` with the given configuration.
    pub fn with_config_and_counter(config: Config, counter: C) -> Self {
        Self {
            enabled: AtomicBool::new(config.enabled),
            state: Mutex::new(Session::new(config.capacity)),
            config,
            counter,
        }
    }

    /// Set the number of anchor slots (root included).
    ///
    /// Discards anything recorded so far.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity;
        self.state = Mutex::new(Session::new(capacity));
        self
    }

    /// Set the frequency calibration window.
    pub fn calibration_window(mut self, window: Duration) -> Self {
        self.config.calibration_window = window;
        self
    }

    /// Enable or disable CPU pinning during calibration.
    pub fn pin_calibration_thread(mut self, pin: bool) -> Self {
        self.config.pin_calibration_thread = pin;
        self
    }

    /// Use a known counter frequency instead of calibrating.
    pub fn cycles_per_second(mut self, hz: u64) -> Self {
        self.config.cycles_per_second = Some(hz);
        self
    }

    /// Keep label slots across sessions.
    pub fn retain_labels(mut self, retain: bool) -> Self {
        self.config.retain_labels = retain;
        self
    }

    /// Set the initial state of the runtime enable flag.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        *self.enabled.get_mut() = enabled;
        self
    }

    /// Get the current configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The counter scopes are measured with.
    pub fn counter(&self) -> &C {
        &self.counter
    }

    /// Turn recording on or off at runtime.
    ///
    /// Scopes opened while disabled stay inert even if recording is turned on
    /// before they close.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Whether begin/end currently record anything.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        COMPILED_IN && self.enabled.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        // Accounting is consistent between calls, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin a session.
    ///
    /// Clears all counts, re-seeds the root slot and records the start tick.
    /// Tokens still open from a previous session are rejected when closed.
    pub fn start(&self) {
        let mut session = self.lock();
        session.tracker.reset(self.config.retain_labels);
        session.start_ticks = Some(self.counter.read_cycles());
        tracing::debug!(session = session.tracker.session(), "Profiling session started");
    }

    /// Open a scope labelled `label` and return its token.
    ///
    /// The token must be passed to [`end_scope`](Self::end_scope) on the same
    /// thread, in LIFO order with other scopes. Prefer [`scope`](Self::scope),
    /// which closes automatically.
    #[inline]
    pub fn begin_scope(&self, label: &str) -> ScopeToken {
        if !self.is_enabled() {
            return ScopeToken::inert();
        }
        let thread = std::thread::current().id();
        self.lock().tracker.begin(label, thread, &self.counter)
    }

    /// Close the scope `token` was opened for.
    ///
    /// # Errors
    ///
    /// [`ProfileError::MisnestedScope`] if a scope opened after this one on
    /// the same thread is still open, or this one was already discarded;
    /// [`ProfileError::StaleScope`] if [`start`](Self::start) ran since the
    /// token was created. Either way nothing is recorded for the token.
    #[inline]
    pub fn end_scope(&self, token: ScopeToken) -> ProfileResult<()> {
        if !token.is_active() {
            return Ok(());
        }
        let end_ticks = self.counter.read_cycles();
        let thread = std::thread::current().id();
        self.lock().tracker.end(token, thread, end_ticks)
    }

    /// Open a scope that closes when the returned guard drops.
    #[inline]
    pub fn scope(&self, label: &str) -> ScopeGuard<'_, C> {
        ScopeGuard {
            profiler: self,
            token: Some(self.begin_scope(label)),
        }
    }

    /// Run `f` inside a scope labelled `label`.
    pub fn time<F, T>(&self, label: &str, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        let _scope = self.scope(label);
        f()
    }

    /// Copy of every registered anchor, in slot order.
    pub fn snapshot(&self) -> Vec<Anchor> {
        self.lock().tracker.registry().anchors().to_vec()
    }

    /// Copy of the anchor registered for `label`.
    pub fn anchor(&self, label: &str) -> Option<Anchor> {
        let session = self.lock();
        let registry = session.tracker.registry();
        registry
            .lookup(label)
            .and_then(|slot| registry.get(slot))
            .cloned()
    }

    /// Scopes currently open across all threads.
    pub fn open_scopes(&self) -> usize {
        self.lock().tracker.open_scopes()
    }

    /// End the session and build its report.
    ///
    /// Calibrates the counter frequency (unless one was configured), which
    /// busy-waits for the calibration window after the end tick is taken.
    ///
    /// Scopes still open are left out of the entries and reported as
    /// [`ReportWarning::OpenScopes`]; their closed children are kept.
    ///
    /// # Errors
    ///
    /// [`ProfileError::SessionNotStarted`] if [`start`](Self::start) was never called.
    pub fn finish(&self) -> ProfileResult<Report> {
        let end_ticks = self.counter.read_cycles();

        let (anchors, total_ticks, overflow, open) = {
            let session = self.lock();
            let start_ticks = session.start_ticks.ok_or(ProfileError::SessionNotStarted)?;
            (
                session.tracker.settled_anchors(),
                end_ticks.saturating_sub(start_ticks),
                session.tracker.registry().overflow_count(),
                session.tracker.open_scopes(),
            )
        };

        let cycles_per_second = match self.config.cycles_per_second {
            Some(hz) => hz,
            None => FrequencyEstimator::new(&self.counter, OsClock)
                .window(self.config.calibration_window)
                .pin_thread(self.config.pin_calibration_thread)
                .estimate(),
        };

        let mut report = Report::from_anchors(&anchors, total_ticks, cycles_per_second);
        if overflow > 0 {
            report.warnings.push(ReportWarning::RegistryOverflow {
                merged_into_root: overflow,
            });
        }
        if open > 0 {
            tracing::warn!(open, "Session finished with scopes still open");
            report.warnings.push(ReportWarning::OpenScopes { count: open });
        }

        tracing::debug!(
            total_ticks,
            cycles_per_second,
            entries = report.entries.len(),
            "Profiling session finished"
        );
        Ok(report)
    }

    /// [`finish`](Self::finish) and print the report to stdout.
    pub fn finish_and_print(&self) -> ProfileResult<Report> {
        let report = self.finish()?;
        print!("{}", report);
        Ok(report)
    }
}

/// Scope handle that closes its scope when dropped.
///
/// Created by [`Profiler::scope`]. The scope ends on every exit path from the
/// enclosing block, including early returns, `?` and unwinding.
#[derive(Debug)]
#[must_use = "the scope ends as soon as the guard is dropped"]
pub struct ScopeGuard<'a, C: CycleCounter = Tsc> {
    profiler: &'a Profiler<C>,
    token: Option<ScopeToken>,
}

impl<C: CycleCounter> ScopeGuard<'_, C> {
    /// Close the scope now and report misuse.
    pub fn close(mut self) -> ProfileResult<()> {
        match self.token.take() {
            Some(token) => self.profiler.end_scope(token),
            None => Ok(()),
        }
    }

    /// Whether this guard is recording (profiling was enabled at entry).
    pub fn is_active(&self) -> bool {
        self.token.as_ref().is_some_and(ScopeToken::is_active)
    }
}

impl<C: CycleCounter> Drop for ScopeGuard<'_, C> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            // Misuse is logged by the tracker.
            let _ = self.profiler.end_scope(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::ManualCounter;

    fn profiler() -> (Profiler<ManualCounter>, ManualCounter) {
        let counter = ManualCounter::new();
        let profiler = Profiler::with_counter(counter.clone()).cycles_per_second(1_000_000);
        (profiler, counter)
    }

    #[test]
    fn test_finish_requires_start() {
        let (profiler, _) = profiler();
        assert_eq!(profiler.finish().unwrap_err(), ProfileError::SessionNotStarted);
    }

    #[cfg(feature = "enabled")]
    #[test]
    fn test_guard_closes_on_drop() {
        let (profiler, counter) = profiler();
        profiler.start();
        {
            let guard = profiler.scope("work");
            assert!(guard.is_active());
            counter.advance(42);
        }
        assert_eq!(profiler.open_scopes(), 0);
        let work = profiler.anchor("work").unwrap();
        assert_eq!((work.exclusive_ticks, work.hit_count), (42, 1));
    }

    #[cfg(feature = "enabled")]
    #[test]
    fn test_guard_closes_on_early_return() {
        fn check(value: u64) -> Result<u64, String> {
            if value > 5 {
                Err(format!("{} too large", value))
            } else {
                Ok(value)
            }
        }

        fn fallible(profiler: &Profiler<ManualCounter>, counter: &ManualCounter) -> Result<(), String> {
            let _scope = profiler.scope("fallible");
            counter.advance(7);
            let value = check(counter.get())?;
            counter.advance(value);
            Ok(())
        }

        let (profiler, counter) = profiler();
        profiler.start();
        assert!(fallible(&profiler, &counter).is_err());
        assert_eq!(profiler.anchor("fallible").unwrap().exclusive_ticks, 7);
    }

    #[cfg(feature = "enabled")]
    #[test]
    fn test_explicit_close_reports_misnesting() {
        let (profiler, _) = profiler();
        profiler.start();
        let outer = profiler.scope("outer");
        let inner = profiler.scope("inner");
        assert!(matches!(
            outer.close(),
            Err(ProfileError::MisnestedScope { .. })
        ));
        assert!(inner.close().is_err());
    }

    #[test]
    fn test_disabled_profiler_records_nothing() {
        let (profiler, counter) = profiler();
        let profiler = profiler.enabled(false);
        profiler.start();
        {
            let guard = profiler.scope("ignored");
            assert!(!guard.is_active());
            counter.advance(10);
        }
        assert_eq!(profiler.snapshot().len(), 1);
        assert_eq!(profiler.open_scopes(), 0);
    }

    #[cfg(feature = "enabled")]
    #[test]
    fn test_token_outlives_disable() {
        let (profiler, counter) = profiler();
        profiler.start();
        let token = profiler.begin_scope("toggle");
        profiler.set_enabled(false);
        counter.advance(3);
        profiler.end_scope(token).unwrap();
        assert_eq!(profiler.anchor("toggle").unwrap().hit_count, 1);
    }

    #[cfg(feature = "enabled")]
    #[test]
    fn test_restart_rejects_old_tokens() {
        let (profiler, _) = profiler();
        profiler.start();
        let token = profiler.begin_scope("old");
        profiler.start();
        assert!(matches!(
            profiler.end_scope(token),
            Err(ProfileError::StaleScope { .. })
        ));
    }

    #[cfg(feature = "enabled")]
    #[test]
    fn test_time_returns_closure_value() {
        let (profiler, counter) = profiler();
        profiler.start();
        let value = profiler.time("compute", || {
            counter.advance(9);
            21 * 2
        });
        assert_eq!(value, 42);
        assert_eq!(profiler.anchor("compute").unwrap().inclusive_ticks, 9);
    }

    #[cfg(feature = "enabled")]
    #[test]
    fn test_open_scope_warning() {
        let (profiler, counter) = profiler();
        profiler.start();
        let _left_open = profiler.scope("open");
        counter.advance(5);
        profiler.time("closed child", || counter.advance(40));
        counter.advance(5);
        let report = profiler.finish().unwrap();

        assert_eq!(report.warnings, vec![ReportWarning::OpenScopes { count: 1 }]);
        assert!(report.entry("open").is_none());
        let child = report.entry("closed child").unwrap();
        assert_eq!((child.exclusive_ticks, child.hit_count), (40, 1));
        assert!(!child.clamped);

        // Raw accumulators still hold the in-flight subtraction
        assert_eq!(
            profiler.anchor("open").unwrap().exclusive_ticks,
            0u64.wrapping_sub(40)
        );
    }

    #[cfg(not(feature = "enabled"))]
    #[test]
    fn test_compiled_out_scopes_are_inert() {
        assert!(!COMPILED_IN);

        let (profiler, counter) = profiler();
        profiler.start();
        assert!(profiler.config().enabled);
        assert!(!profiler.is_enabled());
        {
            let guard = profiler.scope("compiled out");
            assert!(!guard.is_active());
            counter.advance(10);
        }
        let token = profiler.begin_scope("explicit");
        assert!(!token.is_active());
        profiler.end_scope(token).unwrap();

        assert_eq!(profiler.snapshot().len(), 1);
        assert!(profiler.anchor("compiled out").is_none());
        assert_eq!(profiler.open_scopes(), 0);
        assert!(profiler.finish().unwrap().entries.is_empty());
    }
}
