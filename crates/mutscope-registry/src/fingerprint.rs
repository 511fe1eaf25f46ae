//! Test-selection fingerprint.
//!
//! A verdict is only reusable while the test suite that produced it is
//! unchanged, so every stored verdict carries a hash of the test files.

use std::path::{Path, PathBuf};

use mutscope_core::MutscopeError;
use sha2::{Digest, Sha256};

/// SHA-256 over the test files under `test_paths`, relative to `root`.
///
/// Directories are walked with `.gitignore` rules applied. Files are hashed
/// in path order together with their relative path, so renaming a test
/// file changes the fingerprint. Missing paths are skipped.
///
/// # Errors
///
/// Returns [`MutscopeError::Io`] if a test file cannot be read.
///
/// # Examples
///
/// ```no_run
/// use std::path::{Path, PathBuf};
/// use mutscope_registry::fingerprint::tests_fingerprint;
///
/// let fp = tests_fingerprint(Path::new("."), &[PathBuf::from("tests")]).unwrap();
/// assert_eq!(fp.len(), 64);
/// ```
pub fn tests_fingerprint(root: &Path, test_paths: &[PathBuf]) -> Result<String, MutscopeError> {
    let mut files: Vec<PathBuf> = Vec::new();
    for test_path in test_paths {
        let start = root.join(test_path);
        if !start.exists() {
            tracing::debug!(path = %start.display(), "test path does not exist");
            continue;
        }
        for entry in ignore::WalkBuilder::new(&start).build() {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            if entry.file_type().is_some_and(|t| t.is_file()) {
                files.push(entry.into_path());
            }
        }
    }
    files.sort();
    files.dedup();

    let mut hasher = Sha256::new();
    for path in &files {
        let relative = path.strip_prefix(root).unwrap_or(path);
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(std::fs::read(path)?);
        hasher.update([0u8]);
    }
    let fingerprint = format!("{:x}", hasher.finalize());
    tracing::debug!(files = files.len(), %fingerprint, "computed tests fingerprint");
    Ok(fingerprint)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn stable_for_same_content() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "tests/test_a.py", "def test_a(): pass\n");
        let paths = [PathBuf::from("tests")];
        let first = tests_fingerprint(dir.path(), &paths).unwrap();
        let second = tests_fingerprint(dir.path(), &paths).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn changes_when_a_test_changes() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "tests/test_a.py", "def test_a(): pass\n");
        let paths = [PathBuf::from("tests")];
        let before = tests_fingerprint(dir.path(), &paths).unwrap();
        write(dir.path(), "tests/test_a.py", "def test_a(): assert 1\n");
        assert_ne!(before, tests_fingerprint(dir.path(), &paths).unwrap());
    }

    #[test]
    fn changes_when_a_test_is_renamed() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "tests/test_a.py", "x\n");
        let paths = [PathBuf::from("tests")];
        let before = tests_fingerprint(dir.path(), &paths).unwrap();
        std::fs::rename(dir.path().join("tests/test_a.py"), dir.path().join("tests/test_b.py")).unwrap();
        assert_ne!(before, tests_fingerprint(dir.path(), &paths).unwrap());
    }

    #[test]
    fn missing_paths_are_skipped() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "conftest.py", "import pytest\n");
        let with_missing = tests_fingerprint(
            dir.path(),
            &[PathBuf::from("conftest.py"), PathBuf::from("nope")],
        )
        .unwrap();
        let without = tests_fingerprint(dir.path(), &[PathBuf::from("conftest.py")]).unwrap();
        assert_eq!(with_missing, without);
    }
}
