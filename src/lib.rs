//! # cycleprof
//!
//! Hierarchical instrumentation profiler built on the CPU timestamp counter.
//!
//! Code under measurement opens labelled scopes. Each label accumulates:
//! - exclusive ticks (time in the scope minus time in nested scopes)
//! - inclusive ticks (time in the scope including nested scopes)
//! - hit count
//!
//! At the end of a session the tick totals are converted to milliseconds and
//! percentages using an estimated counter frequency.
//!
//! ## Quick Start
//!
//! ```ignore
//! use cycleprof::Profiler;
//!
//! static PROFILER: std::sync::LazyLock<Profiler> = std::sync::LazyLock::new(Profiler::new);
//!
//! #[cycleprof::profile(PROFILER)]
//! fn parse(input: &str) -> usize {
//!     input.len()
//! }
//!
//! fn main() {
//!     PROFILER.start();
//!     {
//!         cycleprof::profile_scope!(PROFILER, "load");
//!         parse("hello");
//!     }
//!     println!("{}", PROFILER.finish().unwrap());
//! }
//! ```
//!
//! ## Disabling
//!
//! Building without the default `enabled` feature turns every scope into a
//! no-op while keeping the API intact. [`Profiler::set_enabled`] does the
//! same at runtime.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
mod config;
mod constants;
mod error;
mod profiler;
mod registry;
mod result;
mod tracker;

// Functional modules
pub mod helpers;
pub mod label;
pub mod measurement;
pub mod output;

// Re-exports for public API
pub use config::Config;
pub use constants::{DEFAULT_CALIBRATION_MS, DEFAULT_CAPACITY, ROOT_LABEL, ROOT_SLOT};
pub use error::{ProfileError, ProfileResult};
pub use measurement::{estimate_cpu_frequency, CycleCounter, FrequencyEstimator, Tsc};
pub use profiler::{Profiler, ScopeGuard};
pub use registry::{Anchor, AnchorRegistry};
pub use result::{Report, ReportEntry, ReportWarning};
pub use tracker::{ScopeToken, ScopeTracker};

#[cfg(feature = "macros")]
pub use cycleprof_macros::profile;

/// Whether scope instrumentation was compiled in (the `enabled` feature).
pub const COMPILED_IN: bool = cfg!(feature = "enabled");

/// `module::function` path of the enclosing function, as a `&'static str`.
///
/// Used as the default label by [`profile_scope!`] and `#[profile]`.
#[macro_export]
macro_rules! function_name {
    () => {{
        fn __cycleprof_here() {}
        fn __cycleprof_type_name<T>(_: T) -> &'static str {
            ::std::any::type_name::<T>()
        }
        $crate::label::trim_function_path(__cycleprof_type_name(__cycleprof_here))
    }};
}

/// Open a scope that lasts until the end of the enclosing block.
///
/// With only a profiler the label is the enclosing function's
/// [`function_name!`].
///
/// ```ignore
/// fn load(profiler: &cycleprof::Profiler) {
///     cycleprof::profile_scope!(profiler);          // "mymod::load"
///     cycleprof::profile_scope!(profiler, "read");  // "read", nested inside
/// }
/// ```
#[macro_export]
macro_rules! profile_scope {
    ($profiler:expr, $label:expr) => {
        let __cycleprof_guard = ($profiler).scope($label);
    };
    ($profiler:expr) => {
        let __cycleprof_guard = ($profiler).scope($crate::function_name!());
    };
}
