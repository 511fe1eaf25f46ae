//! Pairing of previous and current coverage for comparison.
//!
//! Files are matched by identity: a file measured on both sides pairs with
//! itself, a rename pairs its old path with its new path, and everything else
//! pairs with nothing. The traversal walks sorted keys and never depends on
//! insertion or hash order.

use std::collections::BTreeSet;

use mutscope_core::{ChangeSet, DiffRecord};

use crate::snapshot::CoverageSnapshot;

/// One previous-side file matched with one current-side file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilePair<'a> {
    /// Path in the previous snapshot.
    pub previous: Option<&'a str>,
    /// Path in the current snapshot.
    pub current: Option<&'a str>,
    /// Diff record that relates the two sides, if any.
    pub record: Option<&'a DiffRecord>,
}

impl FilePair<'_> {
    /// Whether both sides are present, so their line maps can be compared.
    pub fn is_comparable(&self) -> bool {
        self.previous.is_some() && self.current.is_some()
    }
}

/// Match the files of two snapshots.
///
/// Renames recorded in `changes` whose old path was measured previously and
/// whose new path is measured now are paired across paths; every other file
/// pairs with its own path on the other side, or with `None`.
///
/// # Examples
///
/// ```
/// use mutscope_core::ChangeSet;
/// use mutscope_coverage::align::pair_files;
/// use mutscope_coverage::snapshot::CoverageSnapshot;
///
/// let mut previous = CoverageSnapshot::new();
/// previous.insert("a.py", 1, "t1");
/// previous.insert("gone.py", 1, "t1");
/// let mut current = CoverageSnapshot::new();
/// current.insert("a.py", 1, "t1");
///
/// let changes = ChangeSet::new();
/// let pairs = pair_files(&previous, &current, &changes);
/// assert_eq!(pairs.len(), 2);
/// assert_eq!(pairs[0].current, Some("a.py"));
/// assert_eq!(pairs[1].previous, Some("gone.py"));
/// assert_eq!(pairs[1].current, None);
/// ```
pub fn pair_files<'a>(
    previous: &'a CoverageSnapshot,
    current: &'a CoverageSnapshot,
    changes: &'a ChangeSet,
) -> Vec<FilePair<'a>> {
    let mut pairs = Vec::new();
    let mut consumed_prev = BTreeSet::new();
    let mut consumed_curr = BTreeSet::new();

    for (from, to, record) in changes.renames() {
        if previous.contains_file(from) && current.contains_file(to) {
            consumed_prev.insert(from);
            consumed_curr.insert(to);
            pairs.push(FilePair {
                previous: Some(from),
                current: Some(to),
                record: Some(record),
            });
        }
    }

    let all: BTreeSet<&str> = previous.files().chain(current.files()).collect();
    for path in all {
        let prev = previous
            .contains_file(path)
            .then_some(path)
            .filter(|p| !consumed_prev.contains(p));
        let curr = current
            .contains_file(path)
            .then_some(path)
            .filter(|p| !consumed_curr.contains(p));
        if prev.is_none() && curr.is_none() {
            continue;
        }
        pairs.push(FilePair {
            previous: prev,
            current: curr,
            record: record_for_side(changes, path, prev.is_some(), curr.is_some()),
        });
    }

    pairs.sort_by_key(|p| p.previous.or(p.current).unwrap_or(""));
    pairs
}

/// The record relating `path` to the other side.
///
/// A rename measured on one side only still carries its record: the old path
/// on the previous side, the new path on the current side.
fn record_for_side<'a>(
    changes: &'a ChangeSet,
    path: &str,
    on_previous: bool,
    on_current: bool,
) -> Option<&'a DiffRecord> {
    if let Some(record) = changes.record_for(path) {
        return Some(record);
    }
    if on_previous {
        if let Some((_, record)) = changes.rename_from(path) {
            return Some(record);
        }
    }
    if on_current {
        return changes
            .renames()
            .find(|(_, to, _)| *to == path)
            .map(|(_, _, record)| record);
    }
    None
}

/// Covered lines of one file on both sides, minus the lines the diff touched.
///
/// Both sides are sorted ascending and zipped positionally. This assumes the
/// untouched lines kept their relative order, which holds for insertions and
/// deletions but not for block moves.
///
/// # Examples
///
/// ```
/// use mutscope_core::DiffRecord;
/// use mutscope_coverage::align::ResidualAlignment;
///
/// let record = DiffRecord { removed: vec![3], added: vec![3, 4] };
/// let residual = ResidualAlignment::new([2, 3, 5], [2, 3, 4, 6], Some(&record));
/// assert_eq!(residual.pairs().collect::<Vec<_>>(), vec![(2, 2), (5, 6)]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResidualAlignment {
    /// Previous-side lines not removed by the diff.
    pub previous: Vec<u32>,
    /// Current-side lines not added by the diff.
    pub current: Vec<u32>,
}

impl ResidualAlignment {
    /// Build the alignment from the covered lines of each side.
    ///
    /// Without a record, every covered line takes part.
    pub fn new(
        previous_lines: impl IntoIterator<Item = u32>,
        current_lines: impl IntoIterator<Item = u32>,
        record: Option<&DiffRecord>,
    ) -> Self {
        let mut previous: Vec<u32> = previous_lines
            .into_iter()
            .filter(|l| !record.is_some_and(|r| r.removes(*l)))
            .collect();
        let mut current: Vec<u32> = current_lines
            .into_iter()
            .filter(|l| !record.is_some_and(|r| r.adds(*l)))
            .collect();
        previous.sort_unstable();
        previous.dedup();
        current.sort_unstable();
        current.dedup();
        Self { previous, current }
    }

    /// Aligned `(previous line, current line)` pairs.
    pub fn pairs(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.previous
            .iter()
            .copied()
            .zip(self.current.iter().copied())
    }
}
