//! Plain-text report rendering.
//!
//! ```text
//! Total time: 12.3456ms (CPU freq 3000000000)
//!   parse[3]: 750 (75.00%, 90.00% w/children)
//!   sum[1]: 250 (25.00%)
//! ```

use colored::Colorize;

use crate::result::{Report, ReportEntry, ReportWarning};

/// Format a Report for human-readable terminal output.
///
/// Anchor lines follow `label[hits]: exclusive (exclusive%[, inclusive% w/children])`.
/// Warning markers are colored; the measurement lines are plain.
pub fn format_report(report: &Report) -> String {
    let mut output = String::new();

    output.push('\n');
    match report.total_ms {
        Some(ms) => output.push_str(&format!(
            "Total time: {:.4}ms (CPU freq {})\n",
            ms, report.cycles_per_second
        )),
        None => output.push_str(&format!(
            "Total time: unknown ({} ticks, CPU freq unknown)\n",
            report.total_ticks
        )),
    }

    for entry in &report.entries {
        if entry.clamped {
            output.push_str(&format!(
                "  {} Invalid timing for {} - elapsed time exceeds total time\n",
                "WARNING:".yellow().bold(),
                entry.label
            ));
        }
        output.push_str(&format!("  {}\n", format_entry(entry)));
    }

    let trailing: Vec<&ReportWarning> = report
        .warnings
        .iter()
        .filter(|w| !matches!(w, ReportWarning::MeasurementAnomaly { .. }))
        .collect();
    if !trailing.is_empty() {
        output.push('\n');
        for warning in trailing {
            output.push_str(&format!(
                "{} {}\n",
                "WARNING:".yellow().bold(),
                warning.description()
            ));
        }
    }

    output
}

/// One anchor line, without indentation or newline.
pub fn format_entry(entry: &ReportEntry) -> String {
    let mut line = format!(
        "{}[{}]: {}",
        entry.label, entry.hit_count, entry.exclusive_ticks
    );

    if let Some(exclusive) = entry.exclusive_percent {
        line.push_str(&format!(" ({:.2}%", exclusive));
        if let Some(inclusive) = entry.inclusive_percent {
            line.push_str(&format!(", {:.2}% w/children", inclusive));
        }
        line.push(')');
    }

    line
}
