//! Analysis run and registry update.
//!
//! Analysis is read-only. Every write happens afterwards in [`apply`], in a
//! fixed order: verdict resets, fingerprint refresh, rename relinking,
//! in-place line rewriting, then flags on uncovered new code.

use mutscope_core::{ChangeSet, MutantRecord, MutantStatus, MutscopeError};
use mutscope_coverage::select::{restrict_to_tests, select_tests, TestSelection};
use mutscope_coverage::snapshot::CoverageSnapshot;
use mutscope_registry::affected::{affected_mutants, changed_sample, empty_coverage_mutants};
use mutscope_registry::relink::{project_mutant, MutantRelinker, RelinkOutcome};
use mutscope_registry::store::FINGERPRINT_KEY;
use mutscope_registry::MutantRegistry;
use serde::Serialize;

/// Result of one analysis run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactReport {
    /// Line-level changes between baseline and current state.
    pub changes: ChangeSet,
    /// Tests that must run again.
    pub selection: TestSelection,
    /// Tested mutants whose verdict the change may have invalidated, in
    /// baseline paths and line numbers.
    pub affected: Vec<MutantRecord>,
    /// Mutants on new lines without attributed coverage, in current paths
    /// and line numbers.
    pub newly_relevant: Vec<MutantRecord>,
    /// Mutants whose current line is executed by a selected test.
    pub changed_coverage: Vec<MutantRecord>,
    /// Fingerprint of the current test suite.
    pub fingerprint: String,
}

impl ImpactReport {
    /// Number of mutants that need a retest.
    pub fn retest_count(&self) -> usize {
        self.affected.len() + self.newly_relevant.len()
    }
}

/// Analyse `changes` against the registry.
///
/// `current_mutants` are mutants enumerated on the current source, in
/// current line numbering; they are the only candidates that can sit on a
/// freshly added line. Registry mutants are projected to current numbering
/// and considered as well.
///
/// Without previous coverage every test is selected and every tested mutant
/// is reported as affected.
///
/// # Errors
///
/// Propagates registry read errors.
///
/// # Examples
///
/// ```
/// use mutscope_core::{ChangeKey, ChangeSet, DiffRecord, MutantRecord, MutantStatus};
/// use mutscope_coverage::snapshot::CoverageSnapshot;
/// use mutscope_impact::analyze;
/// use mutscope_registry::{MemoryRegistry, MutantRegistry};
///
/// let mut previous = CoverageSnapshot::new();
/// previous.insert("a.py", 5, "t1");
/// let current = previous.clone();
///
/// let mut changes = ChangeSet::new();
/// changes.insert(ChangeKey::Path("a.py".into()), DiffRecord { removed: vec![5], added: vec![5] });
///
/// let mut registry = MemoryRegistry::new();
/// registry.set_status(&MutantRecord::new("a.py", 4, "number", 0), MutantStatus::Survived, "fp").unwrap();
///
/// let report = analyze(&changes, Some(&previous), &current, &registry, &[], "fp").unwrap();
/// assert_eq!(report.affected.len(), 1);
/// ```
pub fn analyze(
    changes: &ChangeSet,
    previous: Option<&CoverageSnapshot>,
    current: &CoverageSnapshot,
    registry: &dyn MutantRegistry,
    current_mutants: &[MutantRecord],
    fingerprint: &str,
) -> Result<ImpactReport, MutscopeError> {
    let selection = select_tests(previous, current, changes);
    let tested = registry.tested_mutants()?;

    let affected = match (&selection, previous) {
        (TestSelection::Only(tests), Some(previous)) => affected_mutants(previous, tests, &tested),
        _ => tested,
    };

    // Uncovered-new-code detection works on current paths and lines.
    let mut projected: Vec<MutantRecord> = registry
        .mutants(None)?
        .iter()
        .filter_map(|m| project_mutant(changes, m))
        .collect();
    for mutant in current_mutants {
        if !projected.iter().any(|p| p.same_mutant(mutant)) {
            projected.push(mutant.clone());
        }
    }
    let affected_now: Vec<MutantRecord> = affected
        .iter()
        .filter_map(|m| project_mutant(changes, m))
        .collect();
    let newly_relevant: Vec<MutantRecord> = empty_coverage_mutants(current, changes, &projected)
        .into_iter()
        .filter(|m| !affected_now.iter().any(|a| a.same_mutant(m)))
        .collect();

    let changed_coverage = match selection.tests() {
        Some(tests) => changed_sample(&restrict_to_tests(current, tests), &projected),
        None => changed_sample(current, &projected),
    };

    tracing::info!(
        affected = affected.len(),
        newly_relevant = newly_relevant.len(),
        "impact analysis complete"
    );

    Ok(ImpactReport {
        changes: changes.clone(),
        selection,
        affected,
        newly_relevant,
        changed_coverage,
        fingerprint: fingerprint.to_string(),
    })
}

/// What [`apply`] changed in the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyOutcome {
    /// Affected mutants reset to `untested`.
    pub reset: usize,
    /// Tested mutants whose verdict was carried over to the current fingerprint.
    pub refreshed: usize,
    /// Rename relinking and in-place rewriting results.
    pub relink: RelinkOutcome,
    /// Uncovered-new-code mutants marked `untested`.
    pub flagged: usize,
    /// Baseline recorded after the update, if any.
    pub baseline: Option<String>,
}

/// Write the consequences of `report` to the registry.
///
/// Stored line numbers follow the recorded baseline. Only when
/// `new_baseline` is given are mutants relinked, new-code mutants flagged,
/// and the baseline moved to it. Without one, affected verdicts are reset
/// and fingerprints refreshed, and every line number stays put.
///
/// A report already applied against `new_baseline` changes nothing.
///
/// # Errors
///
/// Propagates registry errors. Updates already written stay written.
pub fn apply(
    report: &ImpactReport,
    registry: &mut dyn MutantRegistry,
    new_baseline: Option<&str>,
) -> Result<ApplyOutcome, MutscopeError> {
    let fingerprint = report.fingerprint.as_str();
    let mut outcome = ApplyOutcome::default();
    let relinker = MutantRelinker::new(&report.changes, fingerprint);

    if let Some(commit) = new_baseline {
        if !report.changes.is_empty() && relinker.is_applied(registry, commit)? {
            tracing::info!(baseline = commit, "report already applied");
            outcome.baseline = Some(commit.to_string());
            return Ok(outcome);
        }
    }

    for mutant in &report.affected {
        registry.set_status(mutant, MutantStatus::Untested, fingerprint)?;
        outcome.reset += 1;
    }

    for mutant in registry.tested_mutants()? {
        if report.affected.iter().any(|a| a.same_mutant(&mutant)) {
            continue;
        }
        if mutant.tests_fingerprint != fingerprint {
            registry.set_status(&mutant, mutant.status, fingerprint)?;
            outcome.refreshed += 1;
        }
    }

    match new_baseline {
        Some(commit) => {
            outcome.relink = relinker.apply(registry, commit)?;
            for mutant in &report.newly_relevant {
                registry.set_status(mutant, MutantStatus::Untested, fingerprint)?;
                outcome.flagged += 1;
            }
            outcome.baseline = Some(commit.to_string());
        }
        None => tracing::info!("no new baseline, line numbers stay at the recorded baseline"),
    }

    registry.set_metadata(FINGERPRINT_KEY, fingerprint)?;

    tracing::info!(
        reset = outcome.reset,
        refreshed = outcome.refreshed,
        relinked = outcome.relink.relinked.len(),
        flagged = outcome.flagged,
        "registry updated"
    );
    Ok(outcome)
}
