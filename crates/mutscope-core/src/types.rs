use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Removed and added line numbers for one file between two snapshots.
///
/// `removed` uses the old file's numbering, `added` the new file's. Both are
/// 1-based and increase monotonically within a hunk; hunks are recorded in
/// file order, so each sequence is ascending overall.
///
/// # Examples
///
/// ```
/// use mutscope_core::DiffRecord;
///
/// let record = DiffRecord { removed: vec![3], added: vec![3] };
/// assert!(record.removes(3));
/// assert_eq!(record.project_line(4), Some(4));
/// assert_eq!(record.project_line(3), None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffRecord {
    /// Lines present in the old file and gone from the new one.
    pub removed: Vec<u32>,
    /// Lines present in the new file and absent from the old one.
    pub added: Vec<u32>,
}

impl DiffRecord {
    /// `true` when neither side has any changed line (e.g. a pure rename).
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }

    /// Whether old line `line` was removed.
    pub fn removes(&self, line: u32) -> bool {
        self.removed.contains(&line)
    }

    /// Whether new line `line` was added.
    pub fn adds(&self, line: u32) -> bool {
        self.added.contains(&line)
    }

    /// Project a 1-based old line number onto the new file's numbering.
    ///
    /// The old line keeps its rank among the lines untouched by the diff:
    /// if it is the k-th unchanged line of the old file, it becomes the k-th
    /// line of the new file that was not added. Returns `None` when the line
    /// itself was removed.
    ///
    /// # Examples
    ///
    /// ```
    /// use mutscope_core::DiffRecord;
    ///
    /// // Two lines inserted after old line 1.
    /// let record = DiffRecord { removed: vec![], added: vec![2, 3] };
    /// assert_eq!(record.project_line(1), Some(1));
    /// assert_eq!(record.project_line(2), Some(4));
    /// ```
    pub fn project_line(&self, line: u32) -> Option<u32> {
        if self.removes(line) {
            return None;
        }
        let removed_before = self.removed.iter().filter(|&&l| l < line).count() as u32;
        let mut projected = line - removed_before;

        let mut added = self.added.clone();
        added.sort_unstable();
        for a in added {
            if a <= projected {
                projected += 1;
            } else {
                break;
            }
        }
        Some(projected)
    }
}

/// Key of a [`DiffRecord`] within a [`ChangeSet`].
///
/// Renames are keyed by both paths and display as `old:new`.
///
/// # Examples
///
/// ```
/// use mutscope_core::ChangeKey;
///
/// let key = ChangeKey::Rename { from: "a.py".into(), to: "b.py".into() };
/// assert_eq!(key.to_string(), "a.py:b.py");
/// assert_eq!("a.py:b.py".parse::<ChangeKey>().unwrap(), key);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChangeKey {
    /// An added, deleted or modified file.
    Path(String),
    /// A file moved from `from` to `to`.
    Rename {
        /// Path before the rename.
        from: String,
        /// Path after the rename.
        to: String,
    },
}

impl fmt::Display for ChangeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKey::Path(path) => write!(f, "{path}"),
            ChangeKey::Rename { from, to } => write!(f, "{from}:{to}"),
        }
    }
}

impl FromStr for ChangeKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err("empty change key".into());
        }
        match s.split_once(':') {
            Some((from, to)) if !from.is_empty() && !to.is_empty() => Ok(ChangeKey::Rename {
                from: from.to_string(),
                to: to.to_string(),
            }),
            Some(_) => Err(format!("invalid rename key: {s}")),
            None => Ok(ChangeKey::Path(s.to_string())),
        }
    }
}

impl Serialize for ChangeKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChangeKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Why a changed file could not be turned into a [`DiffRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    /// A hunk header could not be parsed.
    DiffParse,
    /// A blob could not be found or decoded as UTF-8.
    UnreadableBlob,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::DiffParse => write!(f, "diff parse error"),
            FailureKind::UnreadableBlob => write!(f, "unreadable blob"),
        }
    }
}

/// A per-file failure recorded during diff extraction.
///
/// The run continues; the file's previous coverage is treated as stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFailure {
    /// Path in the old snapshot when it exists, otherwise the new path.
    pub path: String,
    /// Failure category.
    pub kind: FailureKind,
    /// Underlying error message.
    pub message: String,
}

/// All diff records for one baseline/current comparison.
///
/// Built once per run and read-only afterwards.
///
/// # Examples
///
/// ```
/// use mutscope_core::{ChangeKey, ChangeSet, DiffRecord};
///
/// let mut changes = ChangeSet::new();
/// changes.insert(
///     ChangeKey::Path("a.py".into()),
///     DiffRecord { removed: vec![3], added: vec![3] },
/// );
/// assert_eq!(changes.record_for("a.py").unwrap().removed, vec![3]);
/// assert!(changes.record_for("b.py").is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSet {
    records: BTreeMap<ChangeKey, DiffRecord>,
    #[serde(default)]
    failures: Vec<FileFailure>,
}

impl ChangeSet {
    /// Create an empty change set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the record for `key`.
    pub fn insert(&mut self, key: ChangeKey, record: DiffRecord) {
        self.records.insert(key, record);
    }

    /// Record a per-file failure.
    pub fn push_failure(&mut self, failure: FileFailure) {
        self.failures.push(failure);
    }

    /// Record of an added, deleted or modified (not renamed) file.
    pub fn record_for(&self, path: &str) -> Option<&DiffRecord> {
        self.records.get(&ChangeKey::Path(path.to_string()))
    }

    /// Record of a file that was renamed from `from`, with its new path.
    pub fn rename_from(&self, from: &str) -> Option<(&str, &DiffRecord)> {
        self.renames()
            .find(|(old, _, _)| *old == from)
            .map(|(_, new, record)| (new, record))
    }

    /// Lines added to `path` in the new numbering, whether the file was
    /// edited in place or is the target of a rename.
    pub fn added_lines_in(&self, path: &str) -> Option<&[u32]> {
        if let Some(record) = self.record_for(path) {
            return Some(&record.added);
        }
        self.renames()
            .find(|(_, new, _)| *new == path)
            .map(|(_, _, record)| record.added.as_slice())
    }

    /// All records in key order.
    pub fn records(&self) -> impl Iterator<Item = (&ChangeKey, &DiffRecord)> {
        self.records.iter()
    }

    /// Rename records as `(old path, new path, record)`.
    pub fn renames(&self) -> impl Iterator<Item = (&str, &str, &DiffRecord)> {
        self.records.iter().filter_map(|(key, record)| match key {
            ChangeKey::Rename { from, to } => Some((from.as_str(), to.as_str(), record)),
            ChangeKey::Path(_) => None,
        })
    }

    /// Per-file failures collected during extraction.
    pub fn failures(&self) -> &[FileFailure] {
        &self.failures
    }

    /// Paths whose previous coverage must be treated as fully stale.
    pub fn stale_paths(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|f| f.path.as_str())
    }

    /// Number of records (failures excluded).
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// `true` when there are neither records nor failures.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.failures.is_empty()
    }
}

/// Verdict of a mutant against the test suite.
///
/// # Examples
///
/// ```
/// use mutscope_core::MutantStatus;
///
/// let s: MutantStatus = "survived".parse().unwrap();
/// assert_eq!(s, MutantStatus::Survived);
/// assert!(s.is_tested());
/// assert!(!MutantStatus::Untested.is_tested());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutantStatus {
    /// Not evaluated under the current test selection.
    #[default]
    Untested,
    /// At least one test failed against the mutant.
    Killed,
    /// Every test passed against the mutant.
    Survived,
    /// The run was abnormally slow but finished.
    Suspicious,
    /// The run exceeded its time budget.
    Timeout,
}

impl MutantStatus {
    /// `true` for any status other than [`MutantStatus::Untested`].
    pub fn is_tested(self) -> bool {
        self != MutantStatus::Untested
    }
}

impl fmt::Display for MutantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutantStatus::Untested => write!(f, "untested"),
            MutantStatus::Killed => write!(f, "killed"),
            MutantStatus::Survived => write!(f, "survived"),
            MutantStatus::Suspicious => write!(f, "suspicious"),
            MutantStatus::Timeout => write!(f, "timeout"),
        }
    }
}

impl FromStr for MutantStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "untested" => Ok(MutantStatus::Untested),
            "killed" => Ok(MutantStatus::Killed),
            "survived" => Ok(MutantStatus::Survived),
            "suspicious" => Ok(MutantStatus::Suspicious),
            "timeout" => Ok(MutantStatus::Timeout),
            other => Err(format!("unknown mutant status: {other}")),
        }
    }
}

/// A stored mutant.
///
/// `line_number` is 0-based; coverage snapshots are 1-based, so every lookup
/// against coverage uses [`MutantRecord::coverage_line`].
///
/// # Examples
///
/// ```
/// use mutscope_core::{MutantRecord, MutantStatus};
///
/// let mutant = MutantRecord::new("src/calc.py", 4, "number", 0);
/// assert_eq!(mutant.coverage_line(), 5);
/// assert_eq!(mutant.status, MutantStatus::Untested);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutantRecord {
    /// Repository-relative path of the mutated file.
    pub file: String,
    /// 0-based line of the mutation site.
    pub line_number: u32,
    /// Identifier of the mutation rule that produced the mutant.
    pub rule: String,
    /// Index among mutants of the same rule on the same line.
    pub occurrence: u32,
    /// Last verdict.
    #[serde(default)]
    pub status: MutantStatus,
    /// Fingerprint of the test selection the verdict was obtained under.
    #[serde(default)]
    pub tests_fingerprint: String,
}

impl MutantRecord {
    /// Create an untested mutant with an empty fingerprint.
    pub fn new(file: impl Into<String>, line_number: u32, rule: impl Into<String>, occurrence: u32) -> Self {
        Self {
            file: file.into(),
            line_number,
            rule: rule.into(),
            occurrence,
            status: MutantStatus::Untested,
            tests_fingerprint: String::new(),
        }
    }

    /// 1-based line used to index coverage snapshots.
    pub fn coverage_line(&self) -> u32 {
        self.line_number + 1
    }

    /// Whether `other` describes the same mutation site and rule.
    pub fn same_mutant(&self, other: &MutantRecord) -> bool {
        self.file == other.file
            && self.line_number == other.line_number
            && self.rule == other.rule
            && self.occurrence == other.occurrence
    }
}

impl fmt::Display for MutantRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} {}#{} [{}]",
            self.file,
            self.coverage_line(),
            self.rule,
            self.occurrence,
            self.status
        )
    }
}

/// Output format for CLI subcommands.
///
/// Implements [`FromStr`] so it can be used directly with `clap` argument parsing.
///
/// # Examples
///
/// ```
/// use mutscope_core::OutputFormat;
///
/// let fmt: OutputFormat = "json".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Json);
///
/// let fmt: OutputFormat = "md".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Markdown);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable summaries.
    #[default]
    Text,
    /// Machine-readable JSON with camelCase keys.
    Json,
    /// Markdown-formatted output.
    Markdown,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_format_from_str() {
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("md".parse::<OutputFormat>().unwrap(), OutputFormat::Markdown);
        assert!("sarif".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn project_line_after_replacement() {
        // Old line 3 replaced by a new line 3 in a 10-line file.
        let record = DiffRecord {
            removed: vec![3],
            added: vec![3],
        };
        assert_eq!(record.project_line(1), Some(1));
        assert_eq!(record.project_line(2), Some(2));
        assert_eq!(record.project_line(3), None);
        assert_eq!(record.project_line(4), Some(4));
        assert_eq!(record.project_line(10), Some(10));
    }

    #[test]
    fn project_line_after_deletion_and_insertion() {
        // Old lines 2-3 deleted, two lines inserted after old line 6.
        // Old 4 -> new 2, old 6 -> new 4, old 7 -> new 7.
        let record = DiffRecord {
            removed: vec![2, 3],
            added: vec![5, 6],
        };
        assert_eq!(record.project_line(1), Some(1));
        assert_eq!(record.project_line(4), Some(2));
        assert_eq!(record.project_line(6), Some(4));
        assert_eq!(record.project_line(7), Some(7));
    }

    #[test]
    fn project_line_identity_for_empty_record() {
        let record = DiffRecord::default();
        for line in 1..20 {
            assert_eq!(record.project_line(line), Some(line));
        }
    }

    #[test]
    fn change_key_parse_and_display() {
        assert_eq!(
            "src/a.py".parse::<ChangeKey>().unwrap(),
            ChangeKey::Path("src/a.py".into())
        );
        assert!("a.py:".parse::<ChangeKey>().is_err());
        assert!("".parse::<ChangeKey>().is_err());
        let key = ChangeKey::Path("x.py".into());
        assert_eq!(key.to_string(), "x.py");
    }

    #[test]
    fn change_set_serializes_with_string_keys() {
        let mut changes = ChangeSet::new();
        changes.insert(
            ChangeKey::Rename {
                from: "old.py".into(),
                to: "new.py".into(),
            },
            DiffRecord::default(),
        );
        let json = serde_json::to_value(&changes).unwrap();
        assert!(json["records"].get("old.py:new.py").is_some());

        let back: ChangeSet = serde_json::from_value(json).unwrap();
        assert_eq!(back, changes);
    }

    #[test]
    fn change_set_lookups() {
        let mut changes = ChangeSet::new();
        changes.insert(
            ChangeKey::Path("a.py".into()),
            DiffRecord {
                removed: vec![1],
                added: vec![2],
            },
        );
        changes.insert(
            ChangeKey::Rename {
                from: "b.py".into(),
                to: "c.py".into(),
            },
            DiffRecord {
                removed: vec![],
                added: vec![7],
            },
        );
        assert_eq!(changes.len(), 2);
        assert_eq!(changes.added_lines_in("a.py"), Some(&[2][..]));
        assert_eq!(changes.added_lines_in("c.py"), Some(&[7][..]));
        assert!(changes.added_lines_in("b.py").is_none());
        assert!(changes.record_for("c.py").is_none());
        let (to, _) = changes.rename_from("b.py").unwrap();
        assert_eq!(to, "c.py");
        assert_eq!(changes.renames().count(), 1);
    }

    #[test]
    fn stale_paths_come_from_failures() {
        let mut changes = ChangeSet::new();
        assert!(changes.is_empty());
        changes.push_failure(FileFailure {
            path: "broken.py".into(),
            kind: FailureKind::UnreadableBlob,
            message: "invalid utf-8".into(),
        });
        assert!(!changes.is_empty());
        assert_eq!(changes.stale_paths().collect::<Vec<_>>(), vec!["broken.py"]);
    }

    #[test]
    fn mutant_status_roundtrips_through_json() {
        let json = serde_json::to_string(&MutantStatus::Timeout).unwrap();
        assert_eq!(json, "\"timeout\"");
        assert_eq!("KILLED".parse::<MutantStatus>().unwrap(), MutantStatus::Killed);
        assert!("flaky".parse::<MutantStatus>().is_err());
    }

    #[test]
    fn mutant_record_serializes_camel_case() {
        let mutant = MutantRecord::new("a.py", 0, "operator", 1);
        let json = serde_json::to_value(&mutant).unwrap();
        assert!(json.get("lineNumber").is_some());
        assert!(json.get("testsFingerprint").is_some());
    }

    #[test]
    fn same_mutant_ignores_status() {
        let a = MutantRecord::new("a.py", 3, "number", 0);
        let mut b = a.clone();
        b.status = MutantStatus::Killed;
        assert!(a.same_mutant(&b));
        b.occurrence = 1;
        assert!(!a.same_mutant(&b));
    }
}
