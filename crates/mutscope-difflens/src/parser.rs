use std::fmt;
use std::path::{Path, PathBuf};

use mutscope_core::{DiffRecord, FailureKind, FileFailure, MutscopeError};

/// A single hunk of a unified diff.
///
/// # Examples
///
/// ```
/// use mutscope_difflens::parser::Hunk;
///
/// let hunk = Hunk {
///     old_start: 3,
///     old_lines: 1,
///     new_start: 3,
///     new_lines: 1,
///     content: "-old\n+new\n".into(),
/// };
/// assert_eq!(hunk.old_lines, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    /// Starting line in the old version.
    pub old_start: u32,
    /// Number of lines in the old version.
    pub old_lines: u32,
    /// Starting line in the new version.
    pub new_start: u32,
    /// Number of lines in the new version.
    pub new_lines: u32,
    /// Body lines, each keeping its `-`, `+` or ` ` prefix.
    pub content: String,
}

/// A complete diff for a single file, containing zero or more hunks.
///
/// # Examples
///
/// ```
/// use mutscope_difflens::parser::parse_unified_diff;
///
/// let diff = "diff --git a/hello.py b/hello.py\n\
///             --- a/hello.py\n\
///             +++ b/hello.py\n\
///             @@ -2 +2 @@\n\
///             -    return 1\n\
///             +    return 2\n";
/// let parsed = parse_unified_diff(diff);
/// assert_eq!(parsed.files.len(), 1);
/// assert_eq!(parsed.files[0].line_changes().removed, vec![2]);
/// ```
#[derive(Debug, Clone)]
pub struct FileDiff {
    /// Path in the old version.
    pub old_path: PathBuf,
    /// Path in the new version.
    pub new_path: PathBuf,
    /// Parsed hunks for this file.
    pub hunks: Vec<Hunk>,
    /// Whether this is a newly created file.
    pub is_new_file: bool,
    /// Whether this file was deleted.
    pub is_deleted_file: bool,
    /// Whether this file was renamed.
    pub is_rename: bool,
}

impl FileDiff {
    fn empty() -> Self {
        Self {
            old_path: PathBuf::new(),
            new_path: PathBuf::new(),
            hunks: Vec::new(),
            is_new_file: false,
            is_deleted_file: false,
            is_rename: false,
        }
    }

    /// Path that identifies this file: the old path unless the file is new.
    pub fn path(&self) -> &Path {
        if self.is_new_file || self.old_path.as_os_str().is_empty() || self.old_path == Path::new("/dev/null") {
            &self.new_path
        } else {
            &self.old_path
        }
    }

    /// Walk every hunk and collect removed/added line numbers.
    ///
    /// Each hunk seeds an old and a new counter from its header. A removed
    /// line records the old counter, an added line the new counter; context
    /// lines advance both without recording.
    pub fn line_changes(&self) -> DiffRecord {
        let mut record = DiffRecord::default();
        for hunk in &self.hunks {
            let mut old_line = hunk.old_start;
            let mut new_line = hunk.new_start;
            for line in hunk.content.lines() {
                match line.as_bytes().first() {
                    Some(b'-') => {
                        record.removed.push(old_line);
                        old_line += 1;
                    }
                    Some(b'+') => {
                        record.added.push(new_line);
                        new_line += 1;
                    }
                    _ => {
                        old_line += 1;
                        new_line += 1;
                    }
                }
            }
        }
        record
    }
}

impl fmt::Display for FileDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} hunks)",
            self.path().display(),
            self.hunks.len()
        )
    }
}

/// Result of parsing a (possibly multi-file) unified diff.
#[derive(Debug, Clone, Default)]
pub struct ParsedDiff {
    /// Files that parsed cleanly.
    pub files: Vec<FileDiff>,
    /// Files dropped because of a malformed hunk header.
    pub failures: Vec<FileFailure>,
}

/// Parse a unified diff string (as produced by `git diff`) into structured [`FileDiff`] entries.
///
/// Handles new, deleted, renamed and binary files (binary files are skipped).
/// Hunk bodies are delimited by the line counts of their header, so removed
/// lines that themselves start with `--` are never mistaken for file headers.
///
/// A malformed hunk header poisons only its own file: the file is reported in
/// [`ParsedDiff::failures`] and parsing resumes at the next `diff --git` line,
/// or at the next `---`/`+++` header pair in patches without `diff --git` lines.
///
/// # Examples
///
/// ```
/// use mutscope_difflens::parser::parse_unified_diff;
///
/// let parsed = parse_unified_diff("");
/// assert!(parsed.files.is_empty());
/// assert!(parsed.failures.is_empty());
/// ```
pub fn parse_unified_diff(input: &str) -> ParsedDiff {
    let mut parsed = ParsedDiff::default();
    let mut current: Option<FileDiff> = None;
    let mut current_hunk: Option<Hunk> = None;
    let mut remaining_old = 0u32;
    let mut remaining_new = 0u32;
    let mut is_binary = false;
    let mut poisoned = false;
    let mut headerless = false;
    let mut lines = input.lines().peekable();

    while let Some(line) = lines.next() {
        if remaining_old > 0 || remaining_new > 0 {
            if let Some(hunk) = current_hunk.as_mut() {
                match line.as_bytes().first() {
                    Some(b'-') => {
                        remaining_old = remaining_old.saturating_sub(1);
                        push_body_line(hunk, line);
                        continue;
                    }
                    Some(b'+') => {
                        remaining_new = remaining_new.saturating_sub(1);
                        push_body_line(hunk, line);
                        continue;
                    }
                    Some(b' ') | None => {
                        remaining_old = remaining_old.saturating_sub(1);
                        remaining_new = remaining_new.saturating_sub(1);
                        push_body_line(hunk, " ");
                        continue;
                    }
                    Some(b'\\') => continue,
                    // Truncated hunk: fall through to header handling.
                    _ => {
                        remaining_old = 0;
                        remaining_new = 0;
                    }
                }
            }
        }

        if line.starts_with("diff --git ") {
            flush_hunk(&mut current, &mut current_hunk);
            finish_file(&mut parsed, current.take(), is_binary, poisoned);
            is_binary = false;
            poisoned = false;
            headerless = false;
            current = Some(FileDiff::empty());
            continue;
        }

        // Implicitly start a file if we see a header but have no current file.
        // This handles standard patches that lack the "diff --git" command line.
        // Inside a poisoned headerless file only a `---`/`+++` pair starts the next one.
        let restarts_poisoned = poisoned
            && headerless
            && lines.peek().is_some_and(|next| next.starts_with("+++ "));
        if line.starts_with("--- ")
            && (current.is_none() || current_hunk.is_some() || restarts_poisoned)
        {
            flush_hunk(&mut current, &mut current_hunk);
            finish_file(&mut parsed, current.take(), is_binary, poisoned);
            is_binary = false;
            poisoned = false;
            headerless = true;
            current = Some(FileDiff::empty());
        }

        if poisoned {
            continue;
        }

        let Some(file) = current.as_mut() else {
            continue;
        };

        if line.starts_with("Binary files ") && line.ends_with(" differ") {
            is_binary = true;
            continue;
        }

        if line.starts_with("new file mode") {
            file.is_new_file = true;
            continue;
        }

        if line.starts_with("deleted file mode") {
            file.is_deleted_file = true;
            continue;
        }

        if let Some(path) = line.strip_prefix("rename from ") {
            file.is_rename = true;
            file.old_path = parse_path(path);
            continue;
        }

        if let Some(path) = line.strip_prefix("rename to ") {
            file.is_rename = true;
            file.new_path = parse_path(path);
            continue;
        }

        if let Some(path) = line.strip_prefix("--- ") {
            file.old_path = parse_path(path);
            if path == "/dev/null" {
                file.is_new_file = true;
            }
            continue;
        }

        if let Some(path) = line.strip_prefix("+++ ") {
            file.new_path = parse_path(path);
            if path == "/dev/null" {
                file.is_deleted_file = true;
            }
            continue;
        }

        if line.starts_with("@@") {
            flush_hunk(&mut current, &mut current_hunk);
            match parse_hunk_header(line) {
                Ok((old_start, old_lines, new_start, new_lines)) => {
                    remaining_old = old_lines;
                    remaining_new = new_lines;
                    current_hunk = Some(Hunk {
                        old_start,
                        old_lines,
                        new_start,
                        new_lines,
                        content: String::new(),
                    });
                }
                Err(e) => {
                    let path = current
                        .as_ref()
                        .map(|f| f.path().to_string_lossy().to_string())
                        .unwrap_or_default();
                    tracing::warn!(path = %path, "skipping file: {e}");
                    parsed.failures.push(FileFailure {
                        path,
                        kind: FailureKind::DiffParse,
                        message: e.to_string(),
                    });
                    poisoned = true;
                }
            }
            continue;
        }
    }

    flush_hunk(&mut current, &mut current_hunk);
    finish_file(&mut parsed, current.take(), is_binary, poisoned);

    parsed
}

fn push_body_line(hunk: &mut Hunk, line: &str) {
    hunk.content.push_str(line);
    hunk.content.push('\n');
}

fn flush_hunk(current: &mut Option<FileDiff>, hunk: &mut Option<Hunk>) {
    if let Some(h) = hunk.take() {
        if let Some(file) = current.as_mut() {
            file.hunks.push(h);
        }
    }
}

fn finish_file(parsed: &mut ParsedDiff, file: Option<FileDiff>, is_binary: bool, poisoned: bool) {
    if let Some(file) = file {
        if !is_binary && !poisoned {
            parsed.files.push(file);
        }
    }
}

fn parse_path(raw: &str) -> PathBuf {
    let normalized = raw.trim_end_matches('\t').trim_matches('"');

    if normalized == "/dev/null" {
        return PathBuf::from("/dev/null");
    }

    let stripped = normalized
        .strip_prefix("a/")
        .or_else(|| normalized.strip_prefix("b/"))
        .unwrap_or(normalized);

    PathBuf::from(stripped)
}

/// Parse a hunk header of the form `@@ -start[,len] +start[,len] @@`.
///
/// A missing length means one line.
///
/// # Errors
///
/// Returns [`MutscopeError::Parse`] if the header is malformed.
///
/// # Examples
///
/// ```
/// use mutscope_difflens::parser::parse_hunk_header;
///
/// assert_eq!(parse_hunk_header("@@ -5,0 +6,3 @@").unwrap(), (5, 0, 6, 3));
/// assert_eq!(parse_hunk_header("@@ -3 +3 @@ def f():").unwrap(), (3, 1, 3, 1));
/// assert!(parse_hunk_header("@@ garbage @@").is_err());
/// ```
pub fn parse_hunk_header(line: &str) -> Result<(u32, u32, u32, u32), MutscopeError> {
    let inner = line
        .strip_prefix("@@ ")
        .and_then(|s| {
            let end = s.find(" @@")?;
            Some(&s[..end])
        })
        .ok_or_else(|| MutscopeError::Parse(format!("invalid hunk header: {line}")))?;

    let parts: Vec<&str> = inner.split(' ').collect();
    if parts.len() != 2 {
        return Err(MutscopeError::Parse(format!("invalid hunk header: {line}")));
    }

    let old = parts[0]
        .strip_prefix('-')
        .ok_or_else(|| MutscopeError::Parse(format!("invalid old range in hunk: {line}")))?;
    let new = parts[1]
        .strip_prefix('+')
        .ok_or_else(|| MutscopeError::Parse(format!("invalid new range in hunk: {line}")))?;

    let (old_start, old_lines) = parse_range(old, line)?;
    let (new_start, new_lines) = parse_range(new, line)?;

    Ok((old_start, old_lines, new_start, new_lines))
}

fn parse_range(range: &str, context: &str) -> Result<(u32, u32), MutscopeError> {
    if let Some((start, count)) = range.split_once(',') {
        let s = start
            .parse()
            .map_err(|_| MutscopeError::Parse(format!("invalid range number in: {context}")))?;
        let c = count
            .parse()
            .map_err(|_| MutscopeError::Parse(format!("invalid range count in: {context}")))?;
        Ok((s, c))
    } else {
        let s = range
            .parse()
            .map_err(|_| MutscopeError::Parse(format!("invalid range number in: {context}")))?;
        Ok((s, 1))
    }
}
