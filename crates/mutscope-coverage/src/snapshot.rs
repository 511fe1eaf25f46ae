//! Line coverage annotated with the tests that executed each line.
//!
//! Snapshots are read from coverage.py data files (SQLite, recorded with
//! `--cov-context=test`) or from the JSON form produced by
//! [`CoverageSnapshot::to_json`].

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::Path;

use mutscope_core::MutscopeError;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};

/// Context recorded for lines executed outside any test.
///
/// It marks a line as executed without naming who executed it and is never
/// a test identifier.
pub const NO_CONTEXT: &str = "";

/// 1-based line number to the set of contexts that executed it.
pub type LineMap = BTreeMap<u32, BTreeSet<String>>;

const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";

/// Coverage of every measured file, keyed by repository-relative path.
///
/// # Examples
///
/// ```
/// use mutscope_coverage::snapshot::CoverageSnapshot;
///
/// let mut snapshot = CoverageSnapshot::new();
/// snapshot.insert("a.py", 3, "tests/test_a.py::test_one|run");
/// snapshot.insert("a.py", 4, "");
///
/// assert!(snapshot.contains_file("a.py"));
/// assert_eq!(snapshot.tests_at("a.py", 3).unwrap().len(), 1);
/// assert!(snapshot.is_context_free("a.py", 4));
/// assert_eq!(snapshot.covered_lines("a.py"), vec![3, 4]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoverageSnapshot {
    files: BTreeMap<String, LineMap>,
}

impl CoverageSnapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `context` executed `line` of `file`.
    pub fn insert(&mut self, file: &str, line: u32, context: &str) {
        self.files
            .entry(file.to_string())
            .or_default()
            .entry(line)
            .or_default()
            .insert(context.to_string());
    }

    /// Register `file` as measured even if none of its lines ran.
    pub fn ensure_file(&mut self, file: &str) {
        self.files.entry(file.to_string()).or_default();
    }

    /// Measured files in path order.
    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// Line map of `file`.
    pub fn file(&self, file: &str) -> Option<&LineMap> {
        self.files.get(file)
    }

    /// Whether `file` was measured.
    pub fn contains_file(&self, file: &str) -> bool {
        self.files.contains_key(file)
    }

    /// Contexts that executed `line` (1-based) of `file`.
    pub fn tests_at(&self, file: &str, line: u32) -> Option<&BTreeSet<String>> {
        self.files.get(file).and_then(|lines| lines.get(&line))
    }

    /// Executed lines of `file`, ascending.
    pub fn covered_lines(&self, file: &str) -> Vec<u32> {
        self.files
            .get(file)
            .map(|lines| lines.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Whether `line` was executed only outside of any test.
    pub fn is_context_free(&self, file: &str, line: u32) -> bool {
        self.tests_at(file, line)
            .is_some_and(|contexts| contexts.iter().all(|c| c == NO_CONTEXT))
    }

    /// Number of measured files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// `true` when no file was measured.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Parse the JSON form `{"file": {"line": ["context", ...]}}`.
    ///
    /// # Errors
    ///
    /// Returns [`MutscopeError::Serialization`] on malformed input.
    ///
    /// # Examples
    ///
    /// ```
    /// use mutscope_coverage::snapshot::CoverageSnapshot;
    ///
    /// let snapshot = CoverageSnapshot::from_json(r#"{"a.py": {"5": ["t1", ""]}}"#).unwrap();
    /// assert!(snapshot.tests_at("a.py", 5).unwrap().contains("t1"));
    /// ```
    pub fn from_json(input: &str) -> Result<Self, MutscopeError> {
        Ok(serde_json::from_str(input)?)
    }

    /// Render the JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`MutscopeError::Serialization`] if encoding fails.
    pub fn to_json(&self) -> Result<String, MutscopeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the JSON form to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`MutscopeError::Io`] if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), MutscopeError> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Load a coverage store, detecting SQLite or JSON by content.
    ///
    /// Absolute file paths under `root` are made relative to it so they
    /// line up with paths reported by version control.
    ///
    /// # Errors
    ///
    /// Returns [`MutscopeError::FileNotFound`] if `path` does not exist,
    /// [`MutscopeError::Coverage`] if a SQLite store cannot be read, or
    /// [`MutscopeError::Serialization`] for malformed JSON.
    pub fn load(path: &Path, root: &Path) -> Result<Self, MutscopeError> {
        if !path.exists() {
            return Err(MutscopeError::FileNotFound(path.to_path_buf()));
        }

        let mut header = [0u8; 16];
        let is_sqlite = {
            let mut file = std::fs::File::open(path)?;
            let read = file.read(&mut header)?;
            read == header.len() && &header == SQLITE_MAGIC
        };

        let raw = if is_sqlite {
            load_sqlite(path)?
        } else {
            Self::from_json(&std::fs::read_to_string(path)?)?
        };

        let mut snapshot = Self::new();
        for (file, lines) in raw.files {
            let relative = relativize(&file, root);
            snapshot.ensure_file(&relative);
            for (line, contexts) in lines {
                for context in contexts {
                    snapshot.insert(&relative, line, &context);
                }
            }
        }

        tracing::debug!(
            path = %path.display(),
            files = snapshot.len(),
            sqlite = is_sqlite,
            "loaded coverage snapshot"
        );
        Ok(snapshot)
    }
}

impl FromIterator<(String, u32, String)> for CoverageSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, u32, String)>>(iter: I) -> Self {
        let mut snapshot = Self::new();
        for (file, line, context) in iter {
            snapshot.insert(&file, line, &context);
        }
        snapshot
    }
}

fn db_error(e: rusqlite::Error) -> MutscopeError {
    MutscopeError::Coverage(format!("failed to read coverage data: {e}"))
}

fn load_sqlite(path: &Path) -> Result<CoverageSnapshot, MutscopeError> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| MutscopeError::Coverage(format!("failed to open coverage data: {e}")))?;

    let mut snapshot = CoverageSnapshot::new();

    if table_exists(&conn, "file")? {
        let mut stmt = conn.prepare("SELECT path FROM file").map_err(db_error)?;
        let paths = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(db_error)?;
        for path in paths {
            snapshot.ensure_file(&path.map_err(db_error)?);
        }
    }

    if table_exists(&conn, "line_bits")? {
        let mut stmt = conn
            .prepare(
                "SELECT file.path, context.context, line_bits.numbits
                 FROM line_bits
                 JOIN file ON file.id = line_bits.file_id
                 JOIN context ON context.id = line_bits.context_id",
            )
            .map_err(db_error)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                ))
            })
            .map_err(db_error)?;
        for row in rows {
            let (file, context, numbits) = row.map_err(db_error)?;
            for line in numbits_to_lines(&numbits) {
                snapshot.insert(&file, line, &context);
            }
        }
    }

    // Branch coverage stores arcs instead of line bitmaps.
    if table_exists(&conn, "arc")? {
        let mut stmt = conn
            .prepare(
                "SELECT file.path, context.context, arc.fromno, arc.tono
                 FROM arc
                 JOIN file ON file.id = arc.file_id
                 JOIN context ON context.id = arc.context_id",
            )
            .map_err(db_error)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })
            .map_err(db_error)?;
        for row in rows {
            let (file, context, from, to) = row.map_err(db_error)?;
            for line in [from, to] {
                if let Ok(line) = u32::try_from(line) {
                    if line > 0 {
                        snapshot.insert(&file, line, &context);
                    }
                }
            }
        }
    }

    Ok(snapshot)
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool, MutscopeError> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get(0),
        )
        .map_err(db_error)?;
    Ok(count > 0)
}

/// Decode a coverage.py *numbits* bitmap: bit `j` of byte `i` marks line `8 * i + j`.
///
/// # Examples
///
/// ```
/// use mutscope_coverage::snapshot::numbits_to_lines;
///
/// assert_eq!(numbits_to_lines(&[0b0000_0110, 0b0000_0001]), vec![1, 2, 8]);
/// ```
pub fn numbits_to_lines(numbits: &[u8]) -> Vec<u32> {
    let mut lines = Vec::new();
    for (byte_index, byte) in numbits.iter().enumerate() {
        for bit in 0..8u32 {
            if byte & (1 << bit) != 0 {
                lines.push(byte_index as u32 * 8 + bit);
            }
        }
    }
    lines
}

fn relativize(file: &str, root: &Path) -> String {
    let path = Path::new(file);
    if path.is_absolute() {
        if let Ok(rel) = path.strip_prefix(root) {
            return rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
        }
    }
    file.to_string()
}
