//! Session report types.

use serde::{Deserialize, Serialize};

use crate::registry::Anchor;

/// Summary of one finished profiling session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Counter ticks between session start and finish.
    pub total_ticks: u64,

    /// Estimated counter frequency in ticks per second (0 = unknown).
    pub cycles_per_second: u64,

    /// Session duration in milliseconds, when the frequency is known.
    pub total_ms: Option<f64>,

    /// One entry per anchor with non-zero exclusive ticks, in slot order.
    pub entries: Vec<ReportEntry>,

    /// Non-fatal conditions observed during the session.
    pub warnings: Vec<ReportWarning>,
}

/// Timing for one labelled scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEntry {
    /// Anchor slot index.
    pub slot: usize,

    /// Scope label.
    pub label: String,

    /// Completed invocations.
    pub hit_count: u64,

    /// Exclusive ticks, clamped to the session total.
    pub exclusive_ticks: u64,

    /// Inclusive ticks (scope plus nested children).
    pub inclusive_ticks: u64,

    /// Exclusive ticks as a percentage of the session total.
    ///
    /// `None` when the session total is zero.
    pub exclusive_percent: Option<f64>,

    /// Inclusive ticks as a percentage of the session total.
    ///
    /// Only present when inclusive differs from exclusive, i.e. the scope had
    /// children.
    pub inclusive_percent: Option<f64>,

    /// Exclusive time in milliseconds, when the frequency is known.
    pub exclusive_ms: Option<f64>,

    /// Whether the exclusive value exceeded the session total and was clamped.
    pub clamped: bool,
}

/// Non-fatal measurement condition carried in a [`Report`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReportWarning {
    /// The anchor registry filled up and new labels merged into root.
    RegistryOverflow {
        /// Number of scope entries that fell back to the root slot.
        merged_into_root: u64,
    },

    /// An anchor's exclusive ticks exceeded the session total.
    MeasurementAnomaly {
        /// Scope label.
        label: String,
        /// Raw exclusive ticks before clamping.
        exclusive_ticks: u64,
        /// Session total the value was clamped to.
        total_ticks: u64,
    },

    /// Calibration saw no wall-clock time pass; frequency is unknown.
    DegenerateFrequency,

    /// Scopes were still open when the session finished.
    OpenScopes {
        /// Number of scopes open across all threads.
        count: usize,
    },
}

impl ReportWarning {
    /// Human-readable description of the warning.
    pub fn description(&self) -> String {
        match self {
            ReportWarning::RegistryOverflow { merged_into_root } => format!(
                "Too many profile scopes: {} scope entries were merged into Root",
                merged_into_root
            ),
            ReportWarning::MeasurementAnomaly { label, .. } => format!(
                "Invalid timing for {} - elapsed time exceeds total time",
                label
            ),
            ReportWarning::DegenerateFrequency => {
                "CPU frequency could not be determined; times are reported in ticks only"
                    .to_string()
            }
            ReportWarning::OpenScopes { count } => format!(
                "{} scope(s) were still open when the session finished; their time is not included",
                count
            ),
        }
    }
}

impl Report {
    /// Build a report from the anchors of a finished session.
    ///
    /// Anchors whose exclusive ticks exceed `total_ticks` are clamped and
    /// flagged with a [`ReportWarning::MeasurementAnomaly`].
    pub fn from_anchors(anchors: &[Anchor], total_ticks: u64, cycles_per_second: u64) -> Self {
        let mut warnings = Vec::new();
        if cycles_per_second == 0 {
            warnings.push(ReportWarning::DegenerateFrequency);
        }

        let percent = |ticks: u64| {
            (total_ticks > 0).then(|| 100.0 * ticks as f64 / total_ticks as f64)
        };
        let millis = |ticks: u64| {
            (cycles_per_second > 0).then(|| 1000.0 * ticks as f64 / cycles_per_second as f64)
        };

        let mut entries = Vec::new();
        for (slot, anchor) in anchors.iter().enumerate() {
            if anchor.exclusive_ticks == 0 {
                continue;
            }

            let clamped = anchor.exclusive_ticks > total_ticks;
            let exclusive = if clamped {
                tracing::warn!(
                    exclusive = anchor.exclusive_ticks,
                    total = total_ticks,
                    "Invalid timing for {} - elapsed time exceeds total time",
                    anchor.label
                );
                warnings.push(ReportWarning::MeasurementAnomaly {
                    label: anchor.label.clone(),
                    exclusive_ticks: anchor.exclusive_ticks,
                    total_ticks,
                });
                total_ticks
            } else {
                anchor.exclusive_ticks
            };

            let inclusive_percent = if anchor.inclusive_ticks != exclusive {
                percent(anchor.inclusive_ticks)
            } else {
                None
            };

            entries.push(ReportEntry {
                slot,
                label: anchor.label.clone(),
                hit_count: anchor.hit_count,
                exclusive_ticks: exclusive,
                inclusive_ticks: anchor.inclusive_ticks,
                exclusive_percent: percent(exclusive),
                inclusive_percent,
                exclusive_ms: millis(exclusive),
                clamped,
            });
        }

        Self {
            total_ticks,
            cycles_per_second,
            total_ms: millis(total_ticks),
            entries,
            warnings,
        }
    }

    /// Entry for `label`, if it recorded any exclusive time.
    pub fn entry(&self, label: &str) -> Option<&ReportEntry> {
        self.entries.iter().find(|entry| entry.label == label)
    }

    /// Sum of exclusive ticks over all entries except root.
    pub fn attributed_ticks(&self) -> u64 {
        self.entries
            .iter()
            .filter(|entry| entry.slot != crate::constants::ROOT_SLOT)
            .map(|entry| entry.exclusive_ticks)
            .sum()
    }

    /// Whether any warning was recorded.
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

impl std::fmt::Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&crate::output::format_report(self))
    }
}
