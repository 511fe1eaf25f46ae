//! Changed-test selection.
//!
//! A test is selected when the change touched a line it executed before,
//! added a line it executes now, or altered which tests execute a line that
//! the change itself left alone. Selection errs towards running too many
//! tests rather than too few.

use std::collections::{BTreeSet, HashSet};

use mutscope_core::ChangeSet;
use serde::{Serialize, Serializer};

use crate::align::{pair_files, ResidualAlignment};
use crate::snapshot::{CoverageSnapshot, LineMap, NO_CONTEXT};

/// Ordered, deduplicated test identifiers in first-seen order.
///
/// The context-free marker is refused on insertion, so it can never be
/// reported, intersected or passed to a runner.
///
/// # Examples
///
/// ```
/// use mutscope_coverage::select::ChangedTests;
///
/// let mut tests = ChangedTests::new();
/// assert!(tests.insert("t2"));
/// assert!(tests.insert("t1"));
/// assert!(!tests.insert("t2"));
/// assert!(!tests.insert(""));
/// assert_eq!(tests.iter().collect::<Vec<_>>(), vec!["t2", "t1"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangedTests {
    order: Vec<String>,
    seen: HashSet<String>,
}

impl ChangedTests {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `test` unless it is already present or is the context-free marker.
    ///
    /// Returns `true` if the list grew.
    pub fn insert(&mut self, test: &str) -> bool {
        if test == NO_CONTEXT || self.seen.contains(test) {
            return false;
        }
        self.seen.insert(test.to_string());
        self.order.push(test.to_string());
        true
    }

    /// Whether `test` is in the list.
    pub fn contains(&self, test: &str) -> bool {
        self.seen.contains(test)
    }

    /// Whether any of `contexts` is in the list.
    pub fn intersects(&self, contexts: &BTreeSet<String>) -> bool {
        contexts.iter().any(|c| self.contains(c))
    }

    /// Identifiers in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Number of selected tests.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// `true` when nothing is selected.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn mark_lines<'a>(&mut self, lines: &LineMap, wanted: impl IntoIterator<Item = &'a u32>) {
        for line in wanted {
            if let Some(contexts) = lines.get(line) {
                for context in contexts {
                    self.insert(context);
                }
            }
        }
    }
}

impl<'a> FromIterator<&'a str> for ChangedTests {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut tests = Self::new();
        for test in iter {
            tests.insert(test);
        }
        tests
    }
}

impl Serialize for ChangedTests {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(&self.order)
    }
}

/// Which tests a run has to execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "tests", rename_all = "camelCase")]
pub enum TestSelection {
    /// No usable baseline; every test runs.
    All,
    /// Only the listed tests are affected.
    Only(ChangedTests),
}

impl TestSelection {
    /// The explicit list, or `None` for [`TestSelection::All`].
    pub fn tests(&self) -> Option<&ChangedTests> {
        match self {
            TestSelection::All => None,
            TestSelection::Only(tests) => Some(tests),
        }
    }

    /// `true` when nothing needs to run.
    pub fn is_empty(&self) -> bool {
        matches!(self, TestSelection::Only(tests) if tests.is_empty())
    }
}

/// Computes the tests impacted by a change set from two coverage snapshots.
///
/// # Examples
///
/// ```
/// use mutscope_core::{ChangeKey, ChangeSet, DiffRecord};
/// use mutscope_coverage::select::ChangedTestSelector;
/// use mutscope_coverage::snapshot::CoverageSnapshot;
///
/// let mut previous = CoverageSnapshot::new();
/// previous.insert("a.py", 3, "t1");
/// previous.insert("a.py", 4, "t1");
/// let current = previous.clone();
///
/// let mut changes = ChangeSet::new();
/// changes.insert(
///     ChangeKey::Path("a.py".into()),
///     DiffRecord { removed: vec![3], added: vec![3] },
/// );
///
/// let tests = ChangedTestSelector::new(&previous, &current, &changes).select();
/// assert_eq!(tests.iter().collect::<Vec<_>>(), vec!["t1"]);
/// ```
pub struct ChangedTestSelector<'a> {
    previous: &'a CoverageSnapshot,
    current: &'a CoverageSnapshot,
    changes: &'a ChangeSet,
}

impl<'a> ChangedTestSelector<'a> {
    /// Create a selector over the two snapshots and the change set relating them.
    pub fn new(
        previous: &'a CoverageSnapshot,
        current: &'a CoverageSnapshot,
        changes: &'a ChangeSet,
    ) -> Self {
        Self {
            previous,
            current,
            changes,
        }
    }

    /// Run the selection.
    pub fn select(&self) -> ChangedTests {
        let mut tests = ChangedTests::new();

        for pair in pair_files(self.previous, self.current, self.changes) {
            let prev_lines = pair.previous.and_then(|p| self.previous.file(p));
            let curr_lines = pair.current.and_then(|c| self.current.file(c));

            if let (Some(lines), Some(record)) = (prev_lines, pair.record) {
                tests.mark_lines(lines, &record.removed);
            }
            if let (Some(lines), Some(record)) = (curr_lines, pair.record) {
                tests.mark_lines(lines, &record.added);
            }

            if let (Some(prev), Some(curr)) = (prev_lines, curr_lines) {
                let residual =
                    ResidualAlignment::new(prev.keys().copied(), curr.keys().copied(), pair.record);
                if residual.current.is_empty() {
                    tests.mark_lines(prev, &residual.previous);
                }
                for (p, c) in residual.pairs() {
                    if let (Some(before), Some(after)) = (prev.get(&p), curr.get(&c)) {
                        for test in before.symmetric_difference(after) {
                            tests.insert(test);
                        }
                    }
                }
            }
        }

        for path in self.changes.stale_paths() {
            if let Some(lines) = self.previous.file(path) {
                tracing::warn!(path, "no usable diff, treating previous coverage as stale");
                tests.mark_lines(lines, lines.keys());
            }
        }

        tracing::info!(selected = tests.len(), "changed tests selected");
        tests
    }
}

/// Select tests, falling back to every test when no previous coverage exists.
///
/// # Examples
///
/// ```
/// use mutscope_core::ChangeSet;
/// use mutscope_coverage::select::{select_tests, TestSelection};
/// use mutscope_coverage::snapshot::CoverageSnapshot;
///
/// let current = CoverageSnapshot::new();
/// let selection = select_tests(None, &current, &ChangeSet::new());
/// assert_eq!(selection, TestSelection::All);
/// ```
pub fn select_tests(
    previous: Option<&CoverageSnapshot>,
    current: &CoverageSnapshot,
    changes: &ChangeSet,
) -> TestSelection {
    match previous {
        Some(previous) => {
            TestSelection::Only(ChangedTestSelector::new(previous, current, changes).select())
        }
        None => {
            tracing::warn!("no previous coverage, selecting all tests");
            TestSelection::All
        }
    }
}

/// Keep, per file, only the lines executed by at least one selected test.
///
/// Files without such lines stay in the result with an empty line map.
///
/// # Examples
///
/// ```
/// use mutscope_coverage::select::{restrict_to_tests, ChangedTests};
/// use mutscope_coverage::snapshot::CoverageSnapshot;
///
/// let mut current = CoverageSnapshot::new();
/// current.insert("a.py", 1, "t1");
/// current.insert("a.py", 2, "t2");
///
/// let tests: ChangedTests = ["t1"].into_iter().collect();
/// let restricted = restrict_to_tests(&current, &tests);
/// assert_eq!(restricted.covered_lines("a.py"), vec![1]);
/// ```
pub fn restrict_to_tests(current: &CoverageSnapshot, tests: &ChangedTests) -> CoverageSnapshot {
    let mut restricted = CoverageSnapshot::new();
    for file in current.files() {
        restricted.ensure_file(file);
        let Some(lines) = current.file(file) else {
            continue;
        };
        for (line, contexts) in lines {
            if tests.intersects(contexts) {
                for context in contexts {
                    restricted.insert(file, *line, context);
                }
            }
        }
    }
    restricted
}
