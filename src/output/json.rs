//! JSON serialization for session reports.

use crate::result::Report;

/// Serialize a Report to a compact JSON string.
///
/// # Errors
///
/// Returns an error if serialization fails (should not happen for Report).
pub fn to_json(report: &Report) -> Result<String, serde_json::Error> {
    serde_json::to_string(report)
}

/// Serialize a Report to a pretty-printed JSON string.
///
/// # Errors
///
/// Returns an error if serialization fails (should not happen for Report).
pub fn to_json_pretty(report: &Report) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Anchor;

    fn make_report() -> Report {
        let anchors = vec![
            Anchor {
                label: "Root".to_string(),
                ..Anchor::default()
            },
            Anchor {
                label: "parse".to_string(),
                exclusive_ticks: 750,
                inclusive_ticks: 900,
                hit_count: 3,
            },
        ];
        Report::from_anchors(&anchors, 1000, 0)
    }

    #[test]
    fn test_to_json_fields() {
        let json = to_json(&make_report()).unwrap();
        assert!(json.contains("\"total_ticks\":1000"));
        assert!(json.contains("\"label\":\"parse\""));
        assert!(json.contains("\"hit_count\":3"));
        assert!(json.contains("DegenerateFrequency"));
    }

    #[test]
    fn test_json_parses_back() {
        let json = to_json_pretty(&make_report()).unwrap();
        let parsed: Report = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.entries[0].inclusive_percent, Some(90.0));
        assert_eq!(parsed.cycles_per_second, 0);
    }
}
