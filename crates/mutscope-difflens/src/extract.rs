//! Baseline-to-current change extraction via git2.
//!
//! The extractor works against the [`ChangeSource`] trait so that the line
//! bookkeeping can be exercised without a repository; [`GitChangeSource`] is
//! the production implementation.
//!
//! ## File Detection
//!
//! - Added files: path from `new_file()`
//! - Modified files: path from `old_file()` (same as new)
//! - Renamed files: both paths, keyed as `old:new`
//! - Deleted files: path from `old_file()`

use std::fmt;
use std::path::{Path, PathBuf};

use git2::{Delta, DiffFindOptions, DiffOptions, Oid, Patch, Repository};
use mutscope_core::{
    ChangeKey, ChangeSet, DiffRecord, FailureKind, FileFailure, MutscopeError,
};

use crate::filter::SourceFilter;
use crate::parser::{parse_unified_diff, FileDiff};

/// Classification of one changed file.
///
/// # Examples
///
/// ```
/// use mutscope_difflens::extract::ChangeKind;
///
/// assert_eq!(ChangeKind::Renamed.to_string(), "R");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChangeKind {
    /// New file.
    Added,
    /// File removed.
    Deleted,
    /// Existing file modified in place.
    Modified,
    /// File moved, possibly with edits.
    Renamed,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Added => write!(f, "A"),
            ChangeKind::Deleted => write!(f, "D"),
            ChangeKind::Modified => write!(f, "M"),
            ChangeKind::Renamed => write!(f, "R"),
        }
    }
}

/// A changed file reported by a [`ChangeSource`].
///
/// # Examples
///
/// ```
/// use mutscope_difflens::extract::{ChangeKind, FileChange};
///
/// let change = FileChange::renamed("old.py", "new.py");
/// assert_eq!(change.kind, ChangeKind::Renamed);
/// assert_eq!(change.path(), "old.py");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    /// Change classification.
    pub kind: ChangeKind,
    /// Path in the baseline, absent for added files.
    pub old_path: Option<String>,
    /// Path in the current state, absent for deleted files.
    pub new_path: Option<String>,
}

impl FileChange {
    /// A newly created file.
    pub fn added(path: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::Added,
            old_path: None,
            new_path: Some(path.into()),
        }
    }

    /// A removed file.
    pub fn deleted(path: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::Deleted,
            old_path: Some(path.into()),
            new_path: None,
        }
    }

    /// A file edited in place.
    pub fn modified(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            kind: ChangeKind::Modified,
            old_path: Some(path.clone()),
            new_path: Some(path),
        }
    }

    /// A file moved from `from` to `to`.
    pub fn renamed(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::Renamed,
            old_path: Some(from.into()),
            new_path: Some(to.into()),
        }
    }

    /// The old path when the file existed in the baseline, otherwise the new path.
    pub fn path(&self) -> &str {
        self.old_path
            .as_deref()
            .or(self.new_path.as_deref())
            .unwrap_or("")
    }

    fn key(&self) -> ChangeKey {
        match (self.kind, &self.old_path, &self.new_path) {
            (ChangeKind::Renamed, Some(from), Some(to)) => ChangeKey::Rename {
                from: from.clone(),
                to: to.clone(),
            },
            _ => ChangeKey::Path(self.path().to_string()),
        }
    }
}

/// Read-only access to the two sides of a comparison.
///
/// Implementations report the changed files and serve their content on
/// either side. The extractor never opens a repository by itself.
pub trait ChangeSource {
    /// Every changed file between the baseline and the current state.
    ///
    /// # Errors
    ///
    /// Returns [`MutscopeError::Git`] if the comparison cannot be computed.
    fn changes(&self) -> Result<Vec<FileChange>, MutscopeError>;

    /// Content of `path` in the baseline.
    ///
    /// # Errors
    ///
    /// Fails if the blob is missing or is not valid UTF-8.
    fn old_content(&self, path: &str) -> Result<String, MutscopeError>;

    /// Content of `path` in the current state.
    ///
    /// # Errors
    ///
    /// Fails if the blob is missing or is not valid UTF-8.
    fn new_content(&self, path: &str) -> Result<String, MutscopeError>;
}

/// What the baseline is compared against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DiffTarget {
    /// The tree of the `HEAD` commit.
    #[default]
    Head,
    /// The working directory, including staged and untracked files.
    Workdir,
}

/// [`ChangeSource`] backed by a git repository.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use mutscope_difflens::extract::{extract_changes, DiffTarget, GitChangeSource};
/// use mutscope_difflens::filter::SourceFilter;
///
/// let source = GitChangeSource::open(Path::new("."), "HEAD~1", DiffTarget::Head).unwrap();
/// let changes = extract_changes(&source, &SourceFilter::accept_all()).unwrap();
/// for (key, record) in changes.records() {
///     println!("{key}: -{:?} +{:?}", record.removed, record.added);
/// }
/// ```
pub struct GitChangeSource {
    repo: Repository,
    base_tree: Oid,
    head_tree: Option<Oid>,
    target: DiffTarget,
}

impl GitChangeSource {
    /// Open the repository containing `repo_path` and resolve `base` to a tree.
    ///
    /// # Errors
    ///
    /// Returns [`MutscopeError::Git`] if the repository cannot be opened or
    /// `base` does not name a commit.
    pub fn open(repo_path: &Path, base: &str, target: DiffTarget) -> Result<Self, MutscopeError> {
        let repo = Repository::discover(repo_path)
            .map_err(|e| MutscopeError::Git(format!("failed to open repository: {e}")))?;

        let base_tree = repo
            .revparse_single(base)
            .and_then(|obj| obj.peel_to_commit())
            .map_err(|e| MutscopeError::Git(format!("failed to resolve base '{base}': {e}")))?
            .tree_id();

        let head_tree = match target {
            DiffTarget::Head => Some(
                repo.head()
                    .and_then(|h| h.peel_to_tree())
                    .map_err(|e| MutscopeError::Git(format!("failed to resolve HEAD tree: {e}")))?
                    .id(),
            ),
            DiffTarget::Workdir => None,
        };

        Ok(Self {
            repo,
            base_tree,
            head_tree,
            target,
        })
    }

    /// Root of the working directory, if the repository is not bare.
    pub fn workdir(&self) -> Option<&Path> {
        self.repo.workdir()
    }

    fn blob_text(&self, tree: Oid, path: &str) -> Result<String, MutscopeError> {
        let tree = self
            .repo
            .find_tree(tree)
            .map_err(|e| MutscopeError::Git(format!("failed to load tree: {e}")))?;
        let entry = tree
            .get_path(Path::new(path))
            .map_err(|e| MutscopeError::Git(format!("'{path}' not found in tree: {e}")))?;
        let blob = entry
            .to_object(&self.repo)
            .and_then(|obj| obj.peel_to_blob())
            .map_err(|e| MutscopeError::Git(format!("failed to read blob for '{path}': {e}")))?;
        String::from_utf8(blob.content().to_vec())
            .map_err(|e| MutscopeError::Git(format!("'{path}' is not valid UTF-8: {e}")))
    }
}

impl ChangeSource for GitChangeSource {
    fn changes(&self) -> Result<Vec<FileChange>, MutscopeError> {
        let base = self
            .repo
            .find_tree(self.base_tree)
            .map_err(|e| MutscopeError::Git(format!("failed to load base tree: {e}")))?;

        let mut diff_opts = DiffOptions::new();
        let mut diff = match (self.target, self.head_tree) {
            (DiffTarget::Head, Some(head)) => {
                let head = self
                    .repo
                    .find_tree(head)
                    .map_err(|e| MutscopeError::Git(format!("failed to load HEAD tree: {e}")))?;
                self.repo
                    .diff_tree_to_tree(Some(&base), Some(&head), Some(&mut diff_opts))
            }
            _ => {
                diff_opts.include_untracked(true).recurse_untracked_dirs(true);
                self.repo
                    .diff_tree_to_workdir_with_index(Some(&base), Some(&mut diff_opts))
            }
        }
        .map_err(|e| MutscopeError::Git(format!("failed to compute diff: {e}")))?;

        // Enable rename detection
        let mut find_opts = DiffFindOptions::new();
        find_opts.renames(true).for_untracked(true);
        diff.find_similar(Some(&mut find_opts))
            .map_err(|e| MutscopeError::Git(format!("failed to find renames: {e}")))?;

        let mut changes = Vec::new();
        for delta in diff.deltas() {
            let old_path = delta
                .old_file()
                .path()
                .map(|p| p.to_string_lossy().to_string());
            let new_path = delta
                .new_file()
                .path()
                .map(|p| p.to_string_lossy().to_string());

            let change = match (delta.status(), old_path, new_path) {
                (Delta::Added | Delta::Untracked | Delta::Copied, _, Some(new)) => {
                    FileChange::added(new)
                }
                (Delta::Deleted, Some(old), _) => FileChange::deleted(old),
                (Delta::Modified | Delta::Typechange, Some(old), _) => FileChange::modified(old),
                (Delta::Renamed, Some(old), Some(new)) => FileChange::renamed(old, new),
                (status, old, new) => {
                    tracing::debug!(?status, ?old, ?new, "ignoring delta");
                    continue;
                }
            };
            changes.push(change);
        }

        Ok(changes)
    }

    fn old_content(&self, path: &str) -> Result<String, MutscopeError> {
        self.blob_text(self.base_tree, path)
    }

    fn new_content(&self, path: &str) -> Result<String, MutscopeError> {
        match (self.target, self.head_tree) {
            (DiffTarget::Head, Some(head)) => self.blob_text(head, path),
            _ => {
                let root = self
                    .repo
                    .workdir()
                    .ok_or_else(|| MutscopeError::Git("repository has no working directory".into()))?;
                let full: PathBuf = root.join(path);
                let bytes = std::fs::read(&full)?;
                String::from_utf8(bytes)
                    .map_err(|e| MutscopeError::Git(format!("'{path}' is not valid UTF-8: {e}")))
            }
        }
    }
}

/// Resolve `rev` to a full commit hash in the repository containing `repo_path`.
///
/// # Errors
///
/// Returns [`MutscopeError::Git`] if the repository or revision cannot be resolved.
pub fn resolve_commit(repo_path: &Path, rev: &str) -> Result<String, MutscopeError> {
    let repo = Repository::discover(repo_path)
        .map_err(|e| MutscopeError::Git(format!("failed to open repository: {e}")))?;
    let commit = repo
        .revparse_single(rev)
        .and_then(|obj| obj.peel_to_commit())
        .map_err(|e| MutscopeError::Git(format!("failed to resolve '{rev}': {e}")))?;
    Ok(commit.id().to_string())
}

/// Compute the line-level change set between the two sides of `source`.
///
/// Only files accepted by `filter` (on either path) are considered. Files
/// whose content cannot be read or whose patch cannot be parsed are recorded
/// as [`FileFailure`]s and the remaining files are still processed. Files
/// without content differences are omitted, except renames, which always get
/// a record under their `old:new` key.
///
/// # Errors
///
/// Returns an error only if the list of changed files cannot be obtained.
pub fn extract_changes(
    source: &dyn ChangeSource,
    filter: &SourceFilter,
) -> Result<ChangeSet, MutscopeError> {
    let mut files = source.changes()?;
    files.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.path().cmp(b.path())));

    let mut changes = ChangeSet::new();
    for file in files {
        let interesting = [&file.old_path, &file.new_path]
            .into_iter()
            .flatten()
            .any(|p| filter.matches(p));
        if !interesting {
            continue;
        }

        let old = match read_side(&file.old_path, |p| source.old_content(p)) {
            Ok(content) => content,
            Err(e) => {
                record_failure(&mut changes, &file, FailureKind::UnreadableBlob, &e);
                continue;
            }
        };
        let new = match read_side(&file.new_path, |p| source.new_content(p)) {
            Ok(content) => content,
            Err(e) => {
                record_failure(&mut changes, &file, FailureKind::UnreadableBlob, &e);
                continue;
            }
        };

        let old_path = file.old_path.as_deref().unwrap_or(file.path());
        let new_path = file.new_path.as_deref().unwrap_or(file.path());
        let record = match diff_contents(&old, &new, old_path, new_path) {
            Ok(record) => record,
            Err(e) => {
                record_failure(&mut changes, &file, FailureKind::DiffParse, &e);
                continue;
            }
        };

        if record.is_empty() && file.kind != ChangeKind::Renamed {
            tracing::debug!(path = file.path(), "no content difference");
            continue;
        }

        tracing::debug!(
            kind = %file.kind,
            path = file.path(),
            removed = record.removed.len(),
            added = record.added.len(),
            "extracted changes"
        );
        changes.insert(file.key(), record);
    }

    tracing::info!(
        files = changes.len(),
        failures = changes.failures().len(),
        "change set ready"
    );
    Ok(changes)
}

fn read_side(
    path: &Option<String>,
    read: impl Fn(&str) -> Result<String, MutscopeError>,
) -> Result<String, MutscopeError> {
    match path {
        Some(p) => read(p),
        None => Ok(String::new()),
    }
}

fn record_failure(changes: &mut ChangeSet, file: &FileChange, kind: FailureKind, err: &MutscopeError) {
    tracing::warn!(path = file.path(), "{kind}: {err}");
    changes.push_failure(FileFailure {
        path: file.path().to_string(),
        kind,
        message: err.to_string(),
    });
}

/// Render a zero-context unified patch between two texts.
///
/// # Errors
///
/// Returns [`MutscopeError::Git`] if libgit2 fails to produce the patch.
pub fn zero_context_patch(
    old: &str,
    new: &str,
    old_path: &str,
    new_path: &str,
) -> Result<String, MutscopeError> {
    let mut opts = DiffOptions::new();
    opts.context_lines(0).interhunk_lines(0);
    let mut patch = Patch::from_buffers(
        old.as_bytes(),
        Some(Path::new(old_path)),
        new.as_bytes(),
        Some(Path::new(new_path)),
        Some(&mut opts),
    )
    .map_err(|e| MutscopeError::Git(format!("failed to diff '{new_path}': {e}")))?;
    let buf = patch
        .to_buf()
        .map_err(|e| MutscopeError::Git(format!("failed to render patch for '{new_path}': {e}")))?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Removed/added line numbers between two texts.
///
/// # Errors
///
/// Returns [`MutscopeError::Parse`] if the generated patch has a malformed
/// hunk header, or [`MutscopeError::Git`] if it cannot be generated.
///
/// # Examples
///
/// ```
/// use mutscope_difflens::extract::diff_contents;
///
/// let old = "a\nb\nc\n";
/// let new = "a\nB\nc\nd\n";
/// let record = diff_contents(old, new, "f.py", "f.py").unwrap();
/// assert_eq!(record.removed, vec![2]);
/// assert_eq!(record.added, vec![2, 4]);
/// ```
pub fn diff_contents(
    old: &str,
    new: &str,
    old_path: &str,
    new_path: &str,
) -> Result<DiffRecord, MutscopeError> {
    let text = zero_context_patch(old, new, old_path, new_path)?;
    let parsed = parse_unified_diff(&text);
    if let Some(failure) = parsed.failures.into_iter().next() {
        return Err(MutscopeError::Parse(failure.message));
    }
    Ok(parsed
        .files
        .iter()
        .map(FileDiff::line_changes)
        .next()
        .unwrap_or_default())
}

/// Build a change set from an existing multi-file unified diff.
///
/// Rename headers yield `old:new` keys; other files are keyed by
/// [`FileDiff::path`]. Malformed hunks are carried over as failures.
///
/// # Examples
///
/// ```
/// use mutscope_difflens::extract::changes_from_patch;
/// use mutscope_difflens::filter::SourceFilter;
///
/// let patch = "--- a/m.py\n+++ b/m.py\n@@ -1 +1 @@\n-x\n+y\n";
/// let changes = changes_from_patch(patch, &SourceFilter::accept_all());
/// assert_eq!(changes.record_for("m.py").unwrap().added, vec![1]);
/// ```
pub fn changes_from_patch(input: &str, filter: &SourceFilter) -> ChangeSet {
    let parsed = parse_unified_diff(input);
    let mut changes = ChangeSet::new();
    for file in &parsed.files {
        let old = file.old_path.to_string_lossy().to_string();
        let new = file.new_path.to_string_lossy().to_string();
        if !filter.matches(&old) && !filter.matches(&new) {
            continue;
        }
        let record = file.line_changes();
        let key = if file.is_rename && old != new {
            ChangeKey::Rename { from: old, to: new }
        } else if record.is_empty() {
            // Mode-only changes carry no line differences.
            continue;
        } else {
            ChangeKey::Path(file.path().to_string_lossy().to_string())
        };
        changes.insert(key, record);
    }
    for failure in parsed.failures {
        if filter.matches(&failure.path) {
            changes.push_failure(failure);
        }
    }
    changes
}
