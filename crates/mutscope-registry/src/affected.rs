//! Selection of mutants that need a retest.
//!
//! Mutant lines are 0-based and coverage lines 1-based; every lookup goes
//! through [`MutantRecord::coverage_line`].

use mutscope_core::{ChangeSet, MutantRecord};
use mutscope_coverage::select::ChangedTests;
use mutscope_coverage::snapshot::CoverageSnapshot;

/// Mutants whose line was executed, in the previous snapshot, by a changed test.
///
/// Output follows the order of `mutants`.
///
/// # Examples
///
/// ```
/// use mutscope_core::MutantRecord;
/// use mutscope_coverage::select::ChangedTests;
/// use mutscope_coverage::snapshot::CoverageSnapshot;
/// use mutscope_registry::affected::affected_mutants;
///
/// let mut previous = CoverageSnapshot::new();
/// previous.insert("a.py", 5, "t1");
/// let tests: ChangedTests = ["t1"].into_iter().collect();
/// let mutants = vec![MutantRecord::new("a.py", 4, "number", 0)];
///
/// assert_eq!(affected_mutants(&previous, &tests, &mutants).len(), 1);
/// ```
pub fn affected_mutants(
    previous: &CoverageSnapshot,
    tests: &ChangedTests,
    mutants: &[MutantRecord],
) -> Vec<MutantRecord> {
    mutants
        .iter()
        .filter(|m| {
            previous
                .tests_at(&m.file, m.coverage_line())
                .is_some_and(|contexts| tests.intersects(contexts))
        })
        .cloned()
        .collect()
}

/// Mutants on freshly added lines that no test is recorded as executing.
///
/// Such lines only carry the context-free marker in `current`, so no test
/// selection can reach them. `mutants` must use current line numbering and
/// paths; the added lines of rename targets count as well.
///
/// # Examples
///
/// ```
/// use mutscope_core::{ChangeKey, ChangeSet, DiffRecord, MutantRecord};
/// use mutscope_coverage::snapshot::CoverageSnapshot;
/// use mutscope_registry::affected::empty_coverage_mutants;
///
/// let mut current = CoverageSnapshot::new();
/// current.insert("a.py", 11, "");
/// let mut changes = ChangeSet::new();
/// changes.insert(ChangeKey::Path("a.py".into()), DiffRecord { removed: vec![], added: vec![11] });
///
/// let mutants = vec![MutantRecord::new("a.py", 10, "number", 0)];
/// assert_eq!(empty_coverage_mutants(&current, &changes, &mutants).len(), 1);
/// ```
pub fn empty_coverage_mutants(
    current: &CoverageSnapshot,
    changes: &ChangeSet,
    mutants: &[MutantRecord],
) -> Vec<MutantRecord> {
    empty_coverage_sample(current, mutants, &[])
        .into_iter()
        .filter(|m| {
            changes
                .added_lines_in(&m.file)
                .is_some_and(|added| added.contains(&m.coverage_line()))
        })
        .collect()
}

/// Mutants whose line is covered in `coverage`.
///
/// Typically called with the coverage restricted to the changed tests.
///
/// # Examples
///
/// ```
/// use mutscope_core::MutantRecord;
/// use mutscope_coverage::snapshot::CoverageSnapshot;
/// use mutscope_registry::affected::changed_sample;
///
/// let mut coverage = CoverageSnapshot::new();
/// coverage.insert("a.py", 1, "t1");
/// let mutants = vec![
///     MutantRecord::new("a.py", 0, "number", 0),
///     MutantRecord::new("a.py", 1, "number", 0),
/// ];
/// assert_eq!(changed_sample(&coverage, &mutants), vec![mutants[0].clone()]);
/// ```
pub fn changed_sample(coverage: &CoverageSnapshot, mutants: &[MutantRecord]) -> Vec<MutantRecord> {
    mutants
        .iter()
        .filter(|m| coverage.tests_at(&m.file, m.coverage_line()).is_some())
        .cloned()
        .collect()
}

/// Mutants on lines executed only outside any test, minus `exclude`.
pub fn empty_coverage_sample(
    coverage: &CoverageSnapshot,
    mutants: &[MutantRecord],
    exclude: &[MutantRecord],
) -> Vec<MutantRecord> {
    mutants
        .iter()
        .filter(|m| coverage.is_context_free(&m.file, m.coverage_line()))
        .filter(|m| !exclude.iter().any(|e| e.same_mutant(m)))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use mutscope_core::{ChangeKey, DiffRecord};

    use super::*;

    #[test]
    fn off_by_one_between_mutant_and_coverage_lines() {
        let mut previous = CoverageSnapshot::new();
        previous.insert("a.py", 5, "t1");
        let tests: ChangedTests = ["t1"].into_iter().collect();

        let on_line = MutantRecord::new("a.py", 4, "number", 0);
        let off_by_one = MutantRecord::new("a.py", 5, "number", 0);
        let got = affected_mutants(&previous, &tests, &[on_line.clone(), off_by_one]);
        assert_eq!(got, vec![on_line]);
    }

    #[test]
    fn unchanged_tests_and_unknown_files_do_not_qualify() {
        let mut previous = CoverageSnapshot::new();
        previous.insert("a.py", 1, "t1");
        previous.insert("a.py", 2, "t2");
        let tests: ChangedTests = ["t2"].into_iter().collect();
        let mutants = vec![
            MutantRecord::new("a.py", 0, "number", 0),
            MutantRecord::new("a.py", 1, "number", 0),
            MutantRecord::new("b.py", 1, "number", 0),
        ];
        let got = affected_mutants(&previous, &tests, &mutants);
        assert_eq!(got, vec![mutants[1].clone()]);
    }

    #[test]
    fn context_free_lines_never_intersect() {
        let mut previous = CoverageSnapshot::new();
        previous.insert("a.py", 1, "");
        let tests: ChangedTests = ["t1"].into_iter().collect();
        let mutants = vec![MutantRecord::new("a.py", 0, "number", 0)];
        assert!(affected_mutants(&previous, &tests, &mutants).is_empty());
    }

    #[test]
    fn new_uncovered_line_is_flagged_only_when_added() {
        let mut current = CoverageSnapshot::new();
        current.insert("a.py", 3, "");
        current.insert("a.py", 4, "");
        current.insert("a.py", 5, "");
        current.insert("a.py", 5, "t1");
        let mut changes = ChangeSet::new();
        changes.insert(
            ChangeKey::Path("a.py".into()),
            DiffRecord {
                removed: vec![],
                added: vec![3, 5],
            },
        );
        let mutants = vec![
            MutantRecord::new("a.py", 2, "number", 0),
            MutantRecord::new("a.py", 3, "number", 0),
            MutantRecord::new("a.py", 4, "number", 0),
        ];
        let got = empty_coverage_mutants(&current, &changes, &mutants);
        assert_eq!(got, vec![mutants[0].clone()]);
    }

    #[test]
    fn rename_targets_count_for_empty_coverage() {
        let mut current = CoverageSnapshot::new();
        current.insert("new.py", 2, "");
        let mut changes = ChangeSet::new();
        changes.insert(
            ChangeKey::Rename {
                from: "old.py".into(),
                to: "new.py".into(),
            },
            DiffRecord {
                removed: vec![],
                added: vec![2],
            },
        );
        let mutants = vec![MutantRecord::new("new.py", 1, "number", 0)];
        assert_eq!(empty_coverage_mutants(&current, &changes, &mutants).len(), 1);
    }

    #[test]
    fn empty_sample_excludes_already_selected() {
        let mut coverage = CoverageSnapshot::new();
        coverage.insert("a.py", 1, "");
        coverage.insert("a.py", 2, "");
        let mutants = vec![
            MutantRecord::new("a.py", 0, "number", 0),
            MutantRecord::new("a.py", 1, "number", 0),
        ];
        let got = empty_coverage_sample(&coverage, &mutants, &mutants[..1]);
        assert_eq!(got, vec![mutants[1].clone()]);
    }
}
