//! Errors reported by scope and session operations.
//!
//! Only conditions the caller can act on are errors. Measurement anomalies
//! (registry overflow, clamped timings, unknown frequency) are collected as
//! [`ReportWarning`](crate::ReportWarning)s instead.

use thiserror::Error;

/// Error returned when a scope or session operation is used incorrectly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProfileError {
    /// A scope was closed out of LIFO order.
    ///
    /// `expected` is the slot the token was opened on; `found` is the slot on
    /// top of the thread's scope stack at the time of the close (`None` when
    /// the stack was empty).
    #[error("scope closed out of order: closing slot {expected}, innermost open slot is {found:?}")]
    MisnestedScope {
        /// Slot the closing token belongs to.
        expected: usize,
        /// Innermost open slot on this thread.
        found: Option<usize>,
    },

    /// A token opened in an earlier session was closed after a restart.
    #[error("scope token from session {token_session} closed during session {current_session}")]
    StaleScope {
        /// Session the token was opened in.
        token_session: u64,
        /// Session that is currently running.
        current_session: u64,
    },

    /// `finish` was called without a preceding `start`.
    #[error("profiling session was never started")]
    SessionNotStarted,
}

/// Result type for profiler operations.
pub type ProfileResult<T> = Result<T, ProfileError>;
