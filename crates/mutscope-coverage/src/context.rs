//! Translation of coverage contexts into test-runner identifiers.

use crate::snapshot::{CoverageSnapshot, NO_CONTEXT};

/// Runner identifier for a recorded context.
///
/// pytest records contexts as `node_id|phase`; the phase suffix is dropped
/// and parametrisation brackets are kept. Returns `None` for the
/// context-free marker.
///
/// # Examples
///
/// ```
/// use mutscope_coverage::context::runner_test_id;
///
/// assert_eq!(runner_test_id("tests/test_a.py::test_x|run").as_deref(), Some("tests/test_a.py::test_x"));
/// assert_eq!(runner_test_id("tests/test_a.py::test_p[1-2]|setup").as_deref(), Some("tests/test_a.py::test_p[1-2]"));
/// assert_eq!(runner_test_id(""), None);
/// ```
pub fn runner_test_id(context: &str) -> Option<String> {
    if context == NO_CONTEXT {
        return None;
    }
    let id = match context.rsplit_once('|') {
        Some((node, _phase)) => node,
        None => context,
    };
    (!id.is_empty()).then(|| id.to_string())
}

/// Runner identifiers of the tests executing `line` (1-based) of `file`.
///
/// Setup, call and teardown phases of one test collapse into a single id.
///
/// # Examples
///
/// ```
/// use mutscope_coverage::context::tests_for_line;
/// use mutscope_coverage::snapshot::CoverageSnapshot;
///
/// let mut snapshot = CoverageSnapshot::new();
/// snapshot.insert("a.py", 5, "t::one|setup");
/// snapshot.insert("a.py", 5, "t::one|run");
/// snapshot.insert("a.py", 5, "");
/// assert_eq!(tests_for_line(&snapshot, "a.py", 5), vec!["t::one"]);
/// assert!(tests_for_line(&snapshot, "a.py", 6).is_empty());
/// ```
pub fn tests_for_line(snapshot: &CoverageSnapshot, file: &str, line: u32) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    if let Some(contexts) = snapshot.tests_at(file, line) {
        for id in contexts.iter().filter_map(|c| runner_test_id(c)) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}
