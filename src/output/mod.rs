//! Report rendering.
//!
//! - [`terminal`]: the human-readable text report
//! - [`json`]: serde_json serialization of [`Report`](crate::Report)

pub mod json;
pub mod terminal;

pub use json::{to_json, to_json_pretty};
pub use terminal::format_report;
