//! SQLite storage for mutant records.
//!
//! Mutants are identified by `(file, line_number, rule, occurrence)`. A
//! metadata table keeps run bookkeeping such as the baseline commit and the
//! last test-selection fingerprint.

use std::path::Path;

use mutscope_core::{MutantRecord, MutantStatus, MutscopeError};
use rusqlite::{params, Connection};
use serde::Serialize;

/// Metadata key holding the baseline commit hash.
pub const BASELINE_KEY: &str = "baseline_commit";

/// Metadata key holding the fingerprint of the last analysed test suite.
pub const FINGERPRINT_KEY: &str = "tests_fingerprint";

/// Metadata key holding the digest of the last change set whose renames and
/// line shifts were written to the registry.
pub const RELINKED_KEY: &str = "relinked_changes";

/// Result of rewriting the line numbers of one file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineRewrite {
    /// Mutants whose line number changed.
    pub moved: usize,
    /// Mutants removed because their line no longer exists.
    pub dropped: usize,
}

/// Store of mutant verdicts.
///
/// Readers take `&self`; writers take `&mut self`, so a single writer applies
/// every update of a run in sequence.
pub trait MutantRegistry {
    /// All mutants in enumeration order, optionally restricted to one status.
    ///
    /// # Errors
    ///
    /// Returns [`MutscopeError::Database`] if the store cannot be read.
    fn mutants(&self, status: Option<MutantStatus>) -> Result<Vec<MutantRecord>, MutscopeError>;

    /// Mutants with any status other than `untested`.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`MutantRegistry::mutants`].
    fn tested_mutants(&self) -> Result<Vec<MutantRecord>, MutscopeError> {
        Ok(self
            .mutants(None)?
            .into_iter()
            .filter(|m| m.status.is_tested())
            .collect())
    }

    /// The stored record describing the same mutant, if any.
    ///
    /// # Errors
    ///
    /// Returns [`MutscopeError::Database`] if the store cannot be read.
    fn find(&self, mutant: &MutantRecord) -> Result<Option<MutantRecord>, MutscopeError>;

    /// Verdict of `mutant` that is still valid under `fingerprint`.
    ///
    /// A killed mutant stays killed whatever the fingerprint. Any other
    /// verdict only counts when it was obtained under `fingerprint`;
    /// otherwise, and for unknown mutants, the result is `untested`.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`MutantRegistry::find`].
    fn cached_status(
        &self,
        mutant: &MutantRecord,
        fingerprint: &str,
    ) -> Result<MutantStatus, MutscopeError> {
        Ok(match self.find(mutant)? {
            Some(stored) if stored.status == MutantStatus::Killed => MutantStatus::Killed,
            Some(stored) if stored.tests_fingerprint == fingerprint => stored.status,
            _ => MutantStatus::Untested,
        })
    }

    /// Store `status` for `mutant`, creating the record if needed.
    ///
    /// # Errors
    ///
    /// Returns [`MutscopeError::Database`] if the write fails.
    fn set_status(
        &mut self,
        mutant: &MutantRecord,
        status: MutantStatus,
        fingerprint: &str,
    ) -> Result<(), MutscopeError>;

    /// Insert records that do not exist yet; returns how many were created.
    ///
    /// # Errors
    ///
    /// Returns [`MutscopeError::Database`] if the write fails.
    fn create_mutants(&mut self, mutants: &[MutantRecord]) -> Result<usize, MutscopeError>;

    /// Rewrite the 0-based line numbers of every mutant in `file`.
    ///
    /// `project` maps an old line to its new line, or to `None` when the
    /// line is gone, in which case the mutant is removed.
    ///
    /// # Errors
    ///
    /// Returns [`MutscopeError::Database`] if the write fails; no partial
    /// rewrite is left behind.
    fn rewrite_line_numbers(
        &mut self,
        file: &str,
        project: &dyn Fn(u32) -> Option<u32>,
    ) -> Result<LineRewrite, MutscopeError>;

    /// Read a metadata value.
    ///
    /// # Errors
    ///
    /// Returns [`MutscopeError::Database`] on query failure.
    fn metadata(&self, key: &str) -> Result<Option<String>, MutscopeError>;

    /// Write a metadata value.
    ///
    /// # Errors
    ///
    /// Returns [`MutscopeError::Database`] on write failure.
    fn set_metadata(&mut self, key: &str, value: &str) -> Result<(), MutscopeError>;
}

/// SQLite-backed [`MutantRegistry`].
///
/// # Examples
///
/// ```
/// use mutscope_core::{MutantRecord, MutantStatus};
/// use mutscope_registry::{MutantRegistry, SqliteRegistry};
///
/// let mut registry = SqliteRegistry::in_memory().unwrap();
/// let mutant = MutantRecord::new("a.py", 4, "number", 0);
/// registry.create_mutants(&[mutant.clone()]).unwrap();
/// registry.set_status(&mutant, MutantStatus::Survived, "fp1").unwrap();
///
/// assert_eq!(registry.cached_status(&mutant, "fp1").unwrap(), MutantStatus::Survived);
/// assert_eq!(registry.cached_status(&mutant, "fp2").unwrap(), MutantStatus::Untested);
/// ```
pub struct SqliteRegistry {
    conn: Connection,
}

impl SqliteRegistry {
    /// Open or create a registry database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`MutscopeError::Database`] if the database cannot be opened.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::path::Path;
    /// use mutscope_registry::SqliteRegistry;
    ///
    /// let registry = SqliteRegistry::open(Path::new(".mutscope/registry.db")).unwrap();
    /// ```
    pub fn open(path: &Path) -> Result<Self, MutscopeError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                MutscopeError::Database(format!("failed to create registry directory: {e}"))
            })?;
        }
        let conn = Connection::open(path)
            .map_err(|e| MutscopeError::Database(format!("failed to open database: {e}")))?;

        let registry = Self { conn };
        registry.init_schema()?;
        Ok(registry)
    }

    /// Create an in-memory registry (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`MutscopeError::Database`] if schema creation fails.
    pub fn in_memory() -> Result<Self, MutscopeError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            MutscopeError::Database(format!("failed to create in-memory database: {e}"))
        })?;

        let registry = Self { conn };
        registry.init_schema()?;
        Ok(registry)
    }

    fn init_schema(&self) -> Result<(), MutscopeError> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS metadata (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS mutants (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    file TEXT NOT NULL,
                    line_number INTEGER NOT NULL,
                    rule TEXT NOT NULL,
                    occurrence INTEGER NOT NULL,
                    status TEXT NOT NULL DEFAULT 'untested',
                    tests_fingerprint TEXT NOT NULL DEFAULT '',
                    updated_at TEXT NOT NULL,
                    UNIQUE (file, line_number, rule, occurrence)
                );

                CREATE INDEX IF NOT EXISTS idx_mutants_file ON mutants(file);
                ",
            )
            .map_err(|e| MutscopeError::Database(format!("failed to create schema: {e}")))?;

        Ok(())
    }

    fn query_mutants(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<MutantRecord>, MutscopeError> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| MutscopeError::Database(format!("failed to prepare query: {e}")))?;
        let rows = stmt
            .query_map(params, |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .map_err(|e| MutscopeError::Database(format!("failed to query mutants: {e}")))?;

        let mut mutants = Vec::new();
        for row in rows {
            let (file, line, rule, occurrence, status, fingerprint) =
                row.map_err(|e| MutscopeError::Database(format!("failed to read mutant row: {e}")))?;
            mutants.push(MutantRecord {
                line_number: to_u32(line, "line_number")?,
                occurrence: to_u32(occurrence, "occurrence")?,
                status: status.parse().map_err(MutscopeError::Database)?,
                file,
                rule,
                tests_fingerprint: fingerprint,
            });
        }
        Ok(mutants)
    }
}

fn to_u32(value: i64, column: &str) -> Result<u32, MutscopeError> {
    u32::try_from(value)
        .map_err(|_| MutscopeError::Database(format!("corrupted {column} in registry: {value}")))
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

const SELECT_MUTANTS: &str =
    "SELECT file, line_number, rule, occurrence, status, tests_fingerprint FROM mutants";

impl MutantRegistry for SqliteRegistry {
    fn mutants(&self, status: Option<MutantStatus>) -> Result<Vec<MutantRecord>, MutscopeError> {
        match status {
            Some(status) => self.query_mutants(
                &format!("{SELECT_MUTANTS} WHERE status = ?1 ORDER BY id"),
                &[&status.to_string()],
            ),
            None => self.query_mutants(&format!("{SELECT_MUTANTS} ORDER BY id"), &[]),
        }
    }

    fn find(&self, mutant: &MutantRecord) -> Result<Option<MutantRecord>, MutscopeError> {
        let found = self.query_mutants(
            &format!(
                "{SELECT_MUTANTS} WHERE file = ?1 AND line_number = ?2 AND rule = ?3 AND occurrence = ?4"
            ),
            &[
                &mutant.file,
                &mutant.line_number,
                &mutant.rule,
                &mutant.occurrence,
            ],
        )?;
        Ok(found.into_iter().next())
    }

    fn set_status(
        &mut self,
        mutant: &MutantRecord,
        status: MutantStatus,
        fingerprint: &str,
    ) -> Result<(), MutscopeError> {
        self.conn
            .execute(
                "INSERT INTO mutants
                 (file, line_number, rule, occurrence, status, tests_fingerprint, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (file, line_number, rule, occurrence) DO UPDATE SET
                     status = excluded.status,
                     tests_fingerprint = excluded.tests_fingerprint,
                     updated_at = excluded.updated_at",
                params![
                    mutant.file,
                    mutant.line_number,
                    mutant.rule,
                    mutant.occurrence,
                    status.to_string(),
                    fingerprint,
                    now(),
                ],
            )
            .map_err(|e| MutscopeError::Database(format!("failed to update {mutant}: {e}")))?;
        Ok(())
    }

    fn create_mutants(&mut self, mutants: &[MutantRecord]) -> Result<usize, MutscopeError> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| MutscopeError::Database(format!("failed to begin transaction: {e}")))?;
        let mut created = 0;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR IGNORE INTO mutants
                     (file, line_number, rule, occurrence, status, tests_fingerprint, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )
                .map_err(|e| MutscopeError::Database(format!("failed to prepare insert: {e}")))?;
            let stamp = now();
            for m in mutants {
                created += stmt
                    .execute(params![
                        m.file,
                        m.line_number,
                        m.rule,
                        m.occurrence,
                        m.status.to_string(),
                        m.tests_fingerprint,
                        stamp,
                    ])
                    .map_err(|e| MutscopeError::Database(format!("failed to insert {m}: {e}")))?;
            }
        }
        tx.commit()
            .map_err(|e| MutscopeError::Database(format!("failed to commit mutants: {e}")))?;
        Ok(created)
    }

    fn rewrite_line_numbers(
        &mut self,
        file: &str,
        project: &dyn Fn(u32) -> Option<u32>,
    ) -> Result<LineRewrite, MutscopeError> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| MutscopeError::Database(format!("failed to begin transaction: {e}")))?;

        let rows: Vec<(i64, i64)> = {
            let mut stmt = tx
                .prepare("SELECT id, line_number FROM mutants WHERE file = ?1")
                .map_err(|e| MutscopeError::Database(format!("failed to prepare query: {e}")))?;
            let mapped = stmt
                .query_map(params![file], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
                })
                .map_err(|e| MutscopeError::Database(format!("failed to query mutants: {e}")))?;
            let collected: Vec<(i64, i64)> = mapped
                .collect::<Result<_, _>>()
                .map_err(|e| MutscopeError::Database(format!("failed to read mutant row: {e}")))?;
            collected
        };

        let mut outcome = LineRewrite::default();
        let stamp = now();
        for (id, line) in rows {
            let old = to_u32(line, "line_number")?;
            match project(old) {
                None => {
                    tx.execute("DELETE FROM mutants WHERE id = ?1", params![id])
                        .map_err(|e| MutscopeError::Database(format!("failed to drop mutant: {e}")))?;
                    outcome.dropped += 1;
                }
                Some(new) if new != old => {
                    // Park on a negative line first so intermediate states never collide.
                    tx.execute(
                        "UPDATE mutants SET line_number = ?1, updated_at = ?2 WHERE id = ?3",
                        params![-(i64::from(new) + 1), stamp, id],
                    )
                    .map_err(|e| MutscopeError::Database(format!("failed to move mutant: {e}")))?;
                    outcome.moved += 1;
                }
                Some(_) => {}
            }
        }
        tx.execute(
            "UPDATE mutants SET line_number = -line_number - 1 WHERE file = ?1 AND line_number < 0",
            params![file],
        )
        .map_err(|e| MutscopeError::Database(format!("failed to move mutants: {e}")))?;

        tx.commit()
            .map_err(|e| MutscopeError::Database(format!("failed to commit line rewrite: {e}")))?;

        if outcome != LineRewrite::default() {
            tracing::debug!(file, moved = outcome.moved, dropped = outcome.dropped, "rewrote line numbers");
        }
        Ok(outcome)
    }

    fn metadata(&self, key: &str) -> Result<Option<String>, MutscopeError> {
        let result = self.conn.query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            params![key],
            |row| row.get(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(MutscopeError::Database(format!(
                "failed to get metadata '{key}': {e}"
            ))),
        }
    }

    fn set_metadata(&mut self, key: &str, value: &str) -> Result<(), MutscopeError> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(|e| MutscopeError::Database(format!("failed to set metadata '{key}': {e}")))?;
        Ok(())
    }
}
