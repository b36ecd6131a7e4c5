//! Scope labels derived from function paths.

/// Name of the marker function [`function_name!`](crate::function_name) defines.
#[doc(hidden)]
pub const MARKER_FN: &str = "__cycleprof_here";

/// Shorten a fully-qualified function path to `module::function`.
///
/// Strips the marker suffix added by [`function_name!`](crate::function_name)
/// and any `{{closure}}` segments, then keeps the last two path segments.
///
/// ```
/// use cycleprof::label::trim_function_path;
///
/// assert_eq!(trim_function_path("app::net::decode::__cycleprof_here"), "net::decode");
/// ```
pub fn trim_function_path(path: &'static str) -> &'static str {
    let mut path = path.strip_suffix(MARKER_FN).unwrap_or(path);
    path = path.strip_suffix("::").unwrap_or(path);
    while let Some(stripped) = path.strip_suffix("::{{closure}}") {
        path = stripped;
    }

    let mut separators = path.rmatch_indices("::").map(|(idx, _)| idx);
    match (separators.next(), separators.next()) {
        (Some(_), Some(second)) => &path[second + 2..],
        _ => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_last_two_segments() {
        assert_eq!(
            trim_function_path("app::net::decode::__cycleprof_here"),
            "net::decode"
        );
        assert_eq!(trim_function_path("app::main::__cycleprof_here"), "app::main");
    }

    #[test]
    fn test_single_segment_unchanged() {
        assert_eq!(trim_function_path("main"), "main");
    }

    #[test]
    fn test_closure_segments_removed() {
        assert_eq!(
            trim_function_path("app::net::decode::{{closure}}::{{closure}}::__cycleprof_here"),
            "net::decode"
        );
    }

    #[test]
    fn test_function_name_macro() {
        assert_eq!(crate::function_name!(), "tests::test_function_name_macro");
    }
}
