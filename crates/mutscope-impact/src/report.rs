//! Text and markdown rendering of analysis results.

use std::fmt;

use mutscope_core::{ChangeKey, ChangeSet, FileFailure, MutantRecord};
use mutscope_coverage::select::TestSelection;
use serde::Serialize;

use crate::pipeline::{ApplyOutcome, ImpactReport};

/// One changed file in a [`ChangeSummary`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRow {
    /// `path`, or `old:new` for renames.
    pub key: String,
    /// `changed` or `renamed`.
    pub kind: &'static str,
    /// Number of removed lines.
    pub removed: usize,
    /// Number of added lines.
    pub added: usize,
}

/// Per-file overview of a [`ChangeSet`].
///
/// # Examples
///
/// ```
/// use mutscope_core::{ChangeKey, ChangeSet, DiffRecord};
/// use mutscope_impact::ChangeSummary;
///
/// let mut changes = ChangeSet::new();
/// changes.insert(ChangeKey::Path("a.py".into()), DiffRecord { removed: vec![3], added: vec![3, 4] });
///
/// let summary = ChangeSummary::from(&changes);
/// assert_eq!(summary.rows[0].added, 2);
/// assert!(summary.to_markdown().contains("| a.py | changed | -1 | +2 |"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSummary {
    /// Changed files in key order.
    pub rows: Vec<ChangeRow>,
    /// Files whose diff could not be computed.
    pub failures: Vec<FileFailure>,
}

impl From<&ChangeSet> for ChangeSummary {
    fn from(changes: &ChangeSet) -> Self {
        let rows = changes
            .records()
            .map(|(key, record)| ChangeRow {
                key: key.to_string(),
                kind: match key {
                    ChangeKey::Path(_) => "changed",
                    ChangeKey::Rename { .. } => "renamed",
                },
                removed: record.removed.len(),
                added: record.added.len(),
            })
            .collect();
        Self {
            rows,
            failures: changes.failures().to_vec(),
        }
    }
}

impl ChangeSummary {
    /// Total removed and added lines.
    pub fn totals(&self) -> (usize, usize) {
        self.rows
            .iter()
            .fold((0, 0), |(r, a), row| (r + row.removed, a + row.added))
    }

    /// Render the summary as a markdown string.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("# Changes\n\n");
        if !self.rows.is_empty() {
            out.push_str("| File | Kind | Removed | Added |\n");
            out.push_str("|------|------|---------|-------|\n");
            for row in &self.rows {
                out.push_str(&format!(
                    "| {} | {} | -{} | +{} |\n",
                    row.key, row.kind, row.removed, row.added
                ));
            }
            out.push('\n');
        }
        push_failures_markdown(&mut out, &self.failures);
        let (removed, added) = self.totals();
        out.push_str(&format!(
            "**Summary:** {} files, -{} removed, +{} added\n",
            self.rows.len(),
            removed,
            added
        ));
        out
    }
}

impl fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Changes")?;
        writeln!(f, "=======")?;
        if !self.rows.is_empty() {
            writeln!(f, "{:<40} {:>8} {:>8} {:>8}", "File", "Kind", "Removed", "Added")?;
            writeln!(f, "{}", "-".repeat(67))?;
            for row in &self.rows {
                writeln!(
                    f,
                    "{:<40} {:>8} {:>8} {:>8}",
                    row.key, row.kind, row.removed, row.added
                )?;
            }
        }
        write_failures(f, &self.failures)?;
        let (removed, added) = self.totals();
        writeln!(
            f,
            "\nSummary: {} files, -{} removed, +{} added",
            self.rows.len(),
            removed,
            added
        )
    }
}

/// Renders a [`TestSelection`] as a list of test identifiers.
///
/// # Examples
///
/// ```
/// use mutscope_coverage::select::{ChangedTests, TestSelection};
/// use mutscope_impact::report::SelectionView;
///
/// let selection = TestSelection::Only(["t1"].into_iter().collect::<ChangedTests>());
/// assert!(SelectionView(&selection).to_string().contains("t1"));
/// ```
pub struct SelectionView<'a>(pub &'a TestSelection);

impl SelectionView<'_> {
    /// Render the selection as a markdown string.
    pub fn to_markdown(&self) -> String {
        let mut out = String::from("# Changed Tests\n\n");
        match self.0 {
            TestSelection::All => out.push_str("No previous coverage: **all tests** must run.\n"),
            TestSelection::Only(tests) if tests.is_empty() => {
                out.push_str("No test is affected by the change.\n");
            }
            TestSelection::Only(tests) => {
                for test in tests.iter() {
                    out.push_str(&format!("- `{test}`\n"));
                }
                out.push_str(&format!("\n**Summary:** {} tests\n", tests.len()));
            }
        }
        out
    }
}

impl fmt::Display for SelectionView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            TestSelection::All => writeln!(f, "all tests (no previous coverage)"),
            TestSelection::Only(tests) => {
                for test in tests.iter() {
                    writeln!(f, "{test}")?;
                }
                Ok(())
            }
        }
    }
}

impl ImpactReport {
    /// Render the report as a markdown string.
    ///
    /// # Examples
    ///
    /// ```
    /// use mutscope_core::ChangeSet;
    /// use mutscope_coverage::snapshot::CoverageSnapshot;
    /// use mutscope_impact::analyze;
    /// use mutscope_registry::MemoryRegistry;
    ///
    /// let snapshot = CoverageSnapshot::new();
    /// let report = analyze(&ChangeSet::new(), Some(&snapshot), &snapshot, &MemoryRegistry::new(), &[], "fp").unwrap();
    /// assert!(report.to_markdown().starts_with("# Impact Report"));
    /// ```
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("# Impact Report\n\n");
        out.push_str(&format!(
            "**Changed files:** {}  \n**Selected tests:** {}\n\n",
            self.changes.len(),
            selected_label(&self.selection)
        ));
        push_mutants_markdown(&mut out, "Affected Mutants", &self.affected);
        push_mutants_markdown(&mut out, "Uncovered New Code", &self.newly_relevant);
        push_failures_markdown(&mut out, self.changes.failures());
        out.push_str(&format!(
            "**Summary:** {} mutants to retest\n",
            self.retest_count()
        ));
        out
    }
}

impl fmt::Display for ImpactReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Impact Report")?;
        writeln!(f, "=============")?;
        writeln!(f, "Changed files:  {}", self.changes.len())?;
        writeln!(f, "Selected tests: {}\n", selected_label(&self.selection))?;
        write_mutants(f, "Affected mutants", &self.affected)?;
        write_mutants(f, "Uncovered new code", &self.newly_relevant)?;
        write_failures(f, self.changes.failures())?;
        writeln!(f, "\nSummary: {} mutants to retest", self.retest_count())
    }
}

impl ApplyOutcome {
    /// Render the outcome as a markdown string.
    pub fn to_markdown(&self) -> String {
        let mut out = String::from("# Registry Update\n\n");
        out.push_str("| Action | Count |\n");
        out.push_str("|--------|-------|\n");
        for (label, count) in self.counts() {
            out.push_str(&format!("| {label} | {count} |\n"));
        }
        if let Some(baseline) = &self.baseline {
            out.push_str(&format!("\n**Baseline:** `{baseline}`\n"));
        }
        out
    }

    fn counts(&self) -> [(&'static str, usize); 6] {
        let (moved, dropped) = self
            .relink
            .rewritten
            .iter()
            .fold((0, 0), |(m, d), (_, rw)| (m + rw.moved, d + rw.dropped));
        [
            ("Reset to untested", self.reset),
            ("Fingerprint refreshed", self.refreshed),
            ("Relinked across renames", self.relink.relinked.len()),
            ("Lines rewritten", moved),
            ("Dropped with removed lines", self.relink.demoted.len() + dropped),
            ("Flagged as new code", self.flagged),
        ]
    }
}

impl fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Registry Update")?;
        writeln!(f, "===============")?;
        for (label, count) in self.counts() {
            writeln!(f, "{label:<28} {count:>6}")?;
        }
        if let Some(baseline) = &self.baseline {
            writeln!(f, "\nBaseline: {baseline}")?;
        }
        Ok(())
    }
}

fn selected_label(selection: &TestSelection) -> String {
    match selection {
        TestSelection::All => "all".to_string(),
        TestSelection::Only(tests) => tests.len().to_string(),
    }
}

fn write_mutants(f: &mut fmt::Formatter<'_>, title: &str, mutants: &[MutantRecord]) -> fmt::Result {
    if mutants.is_empty() {
        return Ok(());
    }
    writeln!(f, "{title} ({}):", mutants.len())?;
    for mutant in mutants {
        writeln!(f, "  {mutant}")?;
    }
    writeln!(f)
}

fn push_mutants_markdown(out: &mut String, title: &str, mutants: &[MutantRecord]) {
    if mutants.is_empty() {
        return;
    }
    out.push_str(&format!("## {title}\n\n"));
    out.push_str("| File | Line | Rule | Status |\n");
    out.push_str("|------|------|------|--------|\n");
    for m in mutants {
        out.push_str(&format!(
            "| {} | {} | {}#{} | {} |\n",
            m.file,
            m.coverage_line(),
            m.rule,
            m.occurrence,
            m.status
        ));
    }
    out.push('\n');
}

fn write_failures(f: &mut fmt::Formatter<'_>, failures: &[FileFailure]) -> fmt::Result {
    if failures.is_empty() {
        return Ok(());
    }
    writeln!(f, "\nStale coverage ({} files):", failures.len())?;
    for failure in failures {
        writeln!(f, "  {} ({}: {})", failure.path, failure.kind, failure.message)?;
    }
    Ok(())
}

fn push_failures_markdown(out: &mut String, failures: &[FileFailure]) {
    if failures.is_empty() {
        return;
    }
    out.push_str("## Stale Coverage\n\n");
    for failure in failures {
        out.push_str(&format!(
            "- `{}`: {} ({})\n",
            failure.path, failure.kind, failure.message
        ));
    }
    out.push('\n');
}
