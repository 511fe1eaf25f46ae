//! Keeps mutant records attached to their code across renames and edits.
//!
//! A mutant's 0-based line is moved through [`DiffRecord::project_line`]:
//! the line keeps its rank among the lines the diff left untouched. A mutant
//! whose line was removed has nothing to attach to.
//!
//! Stored line numbers always follow the recorded baseline commit. Moving
//! them and moving the baseline happen together in [`MutantRelinker::apply`].

use mutscope_core::{ChangeKey, ChangeSet, DiffRecord, MutantRecord, MutantStatus, MutscopeError};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::store::{LineRewrite, MutantRegistry, BASELINE_KEY, RELINKED_KEY};

/// SHA-256 over the records of `changes`, in key order.
///
/// Failures are left out: they do not move any mutant.
///
/// # Examples
///
/// ```
/// use mutscope_core::{ChangeKey, ChangeSet, DiffRecord};
/// use mutscope_registry::relink::change_digest;
///
/// let mut changes = ChangeSet::new();
/// let empty = change_digest(&changes);
/// changes.insert(ChangeKey::Path("a.py".into()), DiffRecord { removed: vec![], added: vec![1] });
/// assert_ne!(change_digest(&changes), empty);
/// ```
pub fn change_digest(changes: &ChangeSet) -> String {
    let mut hasher = Sha256::new();
    for (key, record) in changes.records() {
        hasher.update(key.to_string().as_bytes());
        for line in &record.removed {
            hasher.update(b"-");
            hasher.update(line.to_le_bytes());
        }
        for line in &record.added {
            hasher.update(b"+");
            hasher.update(line.to_le_bytes());
        }
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// Project a 0-based mutant line through `record`.
///
/// # Examples
///
/// ```
/// use mutscope_core::DiffRecord;
/// use mutscope_registry::relink::project_mutant_line;
///
/// // 1-based line 3 replaced; 0-based line 4 stays put.
/// let record = DiffRecord { removed: vec![3], added: vec![3] };
/// assert_eq!(project_mutant_line(&record, 4), Some(4));
/// assert_eq!(project_mutant_line(&record, 2), None);
/// ```
pub fn project_mutant_line(record: &DiffRecord, line_number: u32) -> Option<u32> {
    record
        .project_line(line_number + 1)
        .map(|projected| projected - 1)
}

/// Where `mutant` lives after the change, or `None` if its line is gone.
///
/// Renamed files move to their new path; files changed in place keep their
/// path; untouched files keep both path and line.
///
/// # Examples
///
/// ```
/// use mutscope_core::{ChangeKey, ChangeSet, DiffRecord, MutantRecord};
/// use mutscope_registry::relink::project_mutant;
///
/// let mut changes = ChangeSet::new();
/// changes.insert(
///     ChangeKey::Rename { from: "old.py".into(), to: "new.py".into() },
///     DiffRecord { removed: vec![], added: vec![1] },
/// );
/// let moved = project_mutant(&changes, &MutantRecord::new("old.py", 0, "number", 0)).unwrap();
/// assert_eq!((moved.file.as_str(), moved.line_number), ("new.py", 1));
/// ```
pub fn project_mutant(changes: &ChangeSet, mutant: &MutantRecord) -> Option<MutantRecord> {
    if let Some((to, record)) = changes.rename_from(&mutant.file) {
        let line = project_mutant_line(record, mutant.line_number)?;
        let mut moved = mutant.clone();
        moved.file = to.to_string();
        moved.line_number = line;
        return Some(moved);
    }
    if let Some(record) = changes.record_for(&mutant.file) {
        let line = project_mutant_line(record, mutant.line_number)?;
        let mut moved = mutant.clone();
        moved.line_number = line;
        return Some(moved);
    }
    Some(mutant.clone())
}

/// What a relink pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelinkOutcome {
    /// `(original, clone)` pairs; the clone carries the original's cached verdict.
    pub relinked: Vec<(MutantRecord, MutantRecord)>,
    /// Originals reset to `untested` because their line was removed.
    pub demoted: Vec<MutantRecord>,
    /// Per-file results of in-place line rewriting.
    pub rewritten: Vec<(String, LineRewrite)>,
}

/// Moves mutant records across the renames and edits of a change set.
///
/// # Examples
///
/// ```
/// use mutscope_core::{ChangeKey, ChangeSet, DiffRecord, MutantRecord, MutantStatus};
/// use mutscope_registry::relink::MutantRelinker;
/// use mutscope_registry::{MemoryRegistry, MutantRegistry};
///
/// let mut registry = MemoryRegistry::new();
/// let mutant = MutantRecord::new("old.py", 2, "number", 0);
/// registry.set_status(&mutant, MutantStatus::Survived, "fp").unwrap();
///
/// let mut changes = ChangeSet::new();
/// changes.insert(
///     ChangeKey::Rename { from: "old.py".into(), to: "new.py".into() },
///     DiffRecord::default(),
/// );
///
/// let outcome = MutantRelinker::new(&changes, "fp").relink_renames(&mut registry).unwrap();
/// assert_eq!(outcome.relinked.len(), 1);
/// let clone = &outcome.relinked[0].1;
/// assert_eq!(registry.cached_status(clone, "fp").unwrap(), MutantStatus::Survived);
/// ```
pub struct MutantRelinker<'a> {
    changes: &'a ChangeSet,
    fingerprint: &'a str,
}

impl<'a> MutantRelinker<'a> {
    /// Create a relinker for `changes` under the current test fingerprint.
    pub fn new(changes: &'a ChangeSet, fingerprint: &'a str) -> Self {
        Self {
            changes,
            fingerprint,
        }
    }

    /// Clone mutants of renamed files onto their new path.
    ///
    /// Each clone receives the original's cached verdict under the current
    /// fingerprint and the original is reset to `untested`. Originals whose
    /// line was removed are reset to `untested` without a clone. A clone that
    /// already exists is left alone when the original has no verdict to
    /// carry, so running twice changes nothing.
    ///
    /// # Errors
    ///
    /// Propagates registry errors.
    pub fn relink_renames(
        &self,
        registry: &mut dyn MutantRegistry,
    ) -> Result<RelinkOutcome, MutscopeError> {
        let mut outcome = RelinkOutcome::default();
        let mutants = registry.mutants(None)?;

        for (from, to, record) in self.changes.renames() {
            let mut clones = Vec::new();
            for mutant in mutants.iter().filter(|m| m.file == from) {
                match project_mutant_line(record, mutant.line_number) {
                    None => {
                        tracing::debug!(%mutant, "line removed by rename, demoting");
                        registry.set_status(mutant, MutantStatus::Untested, "")?;
                        outcome.demoted.push(mutant.clone());
                    }
                    Some(line) => {
                        let mut clone = mutant.clone();
                        clone.file = to.to_string();
                        clone.line_number = line;
                        if !mutant.status.is_tested() && registry.find(&clone)?.is_some() {
                            continue;
                        }
                        clones.push((mutant.clone(), clone));
                    }
                }
            }

            let new_records: Vec<MutantRecord> = clones.iter().map(|(_, c)| c.clone()).collect();
            registry.create_mutants(&new_records)?;

            for (original, clone) in clones {
                let status = registry.cached_status(&original, self.fingerprint)?;
                registry.set_status(&clone, status, self.fingerprint)?;
                registry.set_status(&original, MutantStatus::Untested, "")?;
                outcome.relinked.push((original, clone));
            }
        }

        tracing::info!(
            relinked = outcome.relinked.len(),
            demoted = outcome.demoted.len(),
            "relinked renamed mutants"
        );
        Ok(outcome)
    }

    /// Rewrite line numbers of files changed in place; mutants on removed
    /// lines are dropped.
    ///
    /// # Errors
    ///
    /// Propagates registry errors.
    pub fn rewrite_in_place(
        &self,
        registry: &mut dyn MutantRegistry,
    ) -> Result<Vec<(String, LineRewrite)>, MutscopeError> {
        let mut results = Vec::new();
        for (key, record) in self.changes.records() {
            let ChangeKey::Path(path) = key else {
                continue;
            };
            let project = |line: u32| project_mutant_line(record, line);
            let rewrite = registry.rewrite_line_numbers(path, &project)?;
            if rewrite != LineRewrite::default() {
                results.push((path.clone(), rewrite));
            }
        }
        Ok(results)
    }

    /// Whether this change set was already written with `baseline` as the
    /// resulting baseline.
    ///
    /// # Errors
    ///
    /// Propagates registry errors.
    pub fn is_applied(
        &self,
        registry: &dyn MutantRegistry,
        baseline: &str,
    ) -> Result<bool, MutscopeError> {
        Ok(registry.metadata(BASELINE_KEY)?.as_deref() == Some(baseline)
            && registry.metadata(RELINKED_KEY)?.as_deref() == Some(change_digest(self.changes).as_str()))
    }

    /// Relink renames, rewrite in-place edits, and record `baseline` as the
    /// commit the stored line numbers now follow.
    ///
    /// A change set already applied against `baseline` is skipped, so a
    /// repeated call leaves the registry untouched.
    ///
    /// # Errors
    ///
    /// Propagates registry errors.
    pub fn apply(
        &self,
        registry: &mut dyn MutantRegistry,
        baseline: &str,
    ) -> Result<RelinkOutcome, MutscopeError> {
        if self.is_applied(registry, baseline)? {
            tracing::info!(baseline, "change set already relinked, skipping");
            return Ok(RelinkOutcome::default());
        }
        let mut outcome = self.relink_renames(registry)?;
        outcome.rewritten = self.rewrite_in_place(registry)?;
        registry.set_metadata(RELINKED_KEY, &change_digest(self.changes))?;
        registry.set_metadata(BASELINE_KEY, baseline)?;
        Ok(outcome)
    }
}
