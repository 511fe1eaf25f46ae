//! Coverage measurement through the external test command.
//!
//! The command runs under a wall-clock budget. Overrunning the budget is not
//! an error: the child is killed and the result is reported as
//! [`Measurement::Stale`], which callers answer by selecting every test.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use mutscope_core::{CoverageConfig, MutscopeError, RunnerConfig};

use crate::context::runner_test_id;
use crate::select::TestSelection;
use crate::snapshot::CoverageSnapshot;

/// Outcome of one coverage measurement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Measurement {
    /// The command finished and produced coverage data.
    Fresh {
        /// Coverage recorded by the run.
        snapshot: CoverageSnapshot,
        /// Whether the command exited successfully (failing tests still yield coverage).
        success: bool,
    },
    /// The command exceeded its budget and was killed.
    Stale {
        /// Human-readable cause.
        reason: String,
    },
}

/// Invokes the configured test command and reads back its coverage store.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use mutscope_core::{CoverageConfig, RunnerConfig};
/// use mutscope_coverage::runner::TestRunner;
/// use mutscope_coverage::select::{ChangedTests, TestSelection};
///
/// let runner = TestRunner::from_config(
///     &RunnerConfig::default(),
///     &CoverageConfig::default(),
///     Path::new("/repo"),
/// )
/// .unwrap();
///
/// let tests: ChangedTests = ["tests/test_a.py::test_x"].into_iter().collect();
/// let argv = runner.command_line(&TestSelection::Only(tests));
/// assert_eq!(argv[0], "python");
/// assert_eq!(argv.last().unwrap(), "tests/test_a.py::test_x");
/// ```
#[derive(Debug, Clone)]
pub struct TestRunner {
    program: String,
    args: Vec<String>,
    root: PathBuf,
    coverage_file: PathBuf,
    timeout: Duration,
}

impl TestRunner {
    /// Build a runner from configuration, resolving relative paths against `root`.
    ///
    /// # Errors
    ///
    /// Returns [`MutscopeError::Config`] if the command is blank.
    pub fn from_config(
        runner: &RunnerConfig,
        coverage: &CoverageConfig,
        root: &Path,
    ) -> Result<Self, MutscopeError> {
        let mut words = runner.command.split_whitespace().map(str::to_string);
        let program = words
            .next()
            .ok_or_else(|| MutscopeError::Config("runner.command must not be empty".into()))?;
        let mut args: Vec<String> = words.collect();
        args.extend(runner.args.iter().cloned());

        Ok(Self {
            program,
            args,
            root: root.to_path_buf(),
            coverage_file: root.join(&coverage.current),
            timeout: Duration::from_secs(runner.timeout_secs),
        })
    }

    /// Override the wall-clock budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Full argument vector for `selection`, program first.
    ///
    /// [`TestSelection::All`] passes no test ids, which lets the runner
    /// collect the whole suite. Selected contexts are passed as runner ids,
    /// one per test.
    pub fn command_line(&self, selection: &TestSelection) -> Vec<String> {
        let mut argv = Vec::with_capacity(1 + self.args.len());
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        if let Some(tests) = selection.tests() {
            let mut ids: Vec<String> = Vec::with_capacity(tests.len());
            for id in tests.iter().filter_map(runner_test_id) {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            argv.extend(ids);
        }
        argv
    }

    /// Run the test command and load the coverage it recorded.
    ///
    /// A coverage store left at the current location by an earlier run is
    /// deleted first, so only data written by this run is loaded.
    ///
    /// # Errors
    ///
    /// Returns [`MutscopeError::Runner`] if the command cannot be started or
    /// leaves no coverage data behind, [`MutscopeError::Io`] if the old store
    /// cannot be removed, and propagates coverage load errors.
    pub async fn measure(&self, selection: &TestSelection) -> Result<Measurement, MutscopeError> {
        let argv = self.command_line(selection);
        tracing::info!(command = %argv.join(" "), timeout = ?self.timeout, "measuring coverage");

        if self.coverage_file.exists() {
            tracing::debug!(path = %self.coverage_file.display(), "removing leftover coverage");
            std::fs::remove_file(&self.coverage_file)?;
        }

        let child = tokio::process::Command::new(&self.program)
            .args(&argv[1..])
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MutscopeError::Runner(format!("failed to start '{}': {e}", self.program)))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result
                .map_err(|e| MutscopeError::Runner(format!("test command failed: {e}")))?,
            Err(_) => {
                let reason = format!("test command timed out after {:?}", self.timeout);
                tracing::warn!("{reason}; coverage is stale");
                return Ok(Measurement::Stale { reason });
            }
        };

        let success = output.status.success();
        if !success {
            tracing::warn!(
                status = ?output.status.code(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "test command exited unsuccessfully"
            );
        }

        if !self.coverage_file.exists() {
            return Err(MutscopeError::Runner(format!(
                "test command produced no coverage data at {}",
                self.coverage_file.display()
            )));
        }
        let snapshot = CoverageSnapshot::load(&self.coverage_file, &self.root)?;
        Ok(Measurement::Fresh { snapshot, success })
    }
}

/// Move the current coverage store to the previous-store location.
///
/// Returns `false` when there was no current store to move.
///
/// # Errors
///
/// Returns [`MutscopeError::Io`] if the rename fails.
pub fn rotate_coverage(coverage: &CoverageConfig, root: &Path) -> Result<bool, MutscopeError> {
    let current = root.join(&coverage.current);
    if !current.exists() {
        return Ok(false);
    }
    let previous = root.join(&coverage.previous);
    std::fs::rename(&current, &previous)?;
    tracing::debug!(from = %current.display(), to = %previous.display(), "rotated coverage");
    Ok(true)
}

#[cfg(all(test, unix))]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::select::ChangedTests;

    fn shell_runner(dir: &Path, script: &str) -> TestRunner {
        let runner = RunnerConfig {
            command: "sh".into(),
            args: vec!["-c".into(), script.into()],
            ..RunnerConfig::default()
        };
        let coverage = CoverageConfig {
            previous: "old.json".into(),
            current: "cov.json".into(),
        };
        TestRunner::from_config(&runner, &coverage, dir).unwrap()
    }

    #[test]
    fn command_line_appends_selected_tests() {
        let runner = TestRunner::from_config(
            &RunnerConfig {
                command: "python -m pytest".into(),
                args: vec!["--cov-context=test".into()],
                ..RunnerConfig::default()
            },
            &CoverageConfig::default(),
            Path::new("/repo"),
        )
        .unwrap();

        let all = runner.command_line(&TestSelection::All);
        assert_eq!(all, vec!["python", "-m", "pytest", "--cov-context=test"]);

        let tests: ChangedTests = ["t::a|setup", "t::a|run", "t::b|run"].into_iter().collect();
        let only = runner.command_line(&TestSelection::Only(tests));
        assert_eq!(&only[4..], ["t::a", "t::b"]);
    }

    #[tokio::test]
    async fn fresh_measurement_loads_coverage() {
        let dir = TempDir::new().unwrap();
        let runner = shell_runner(dir.path(), r#"echo '{"a.py": {"1": ["t1"]}}' > cov.json"#);

        let measurement = runner.measure(&TestSelection::All).await.unwrap();
        match measurement {
            Measurement::Fresh { snapshot, success } => {
                assert!(success);
                assert!(snapshot.tests_at("a.py", 1).unwrap().contains("t1"));
            }
            other => panic!("expected fresh measurement, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failing_tests_still_yield_coverage() {
        let dir = TempDir::new().unwrap();
        let runner = shell_runner(dir.path(), r#"echo '{}' > cov.json; exit 1"#);
        let measurement = runner.measure(&TestSelection::All).await.unwrap();
        assert!(matches!(measurement, Measurement::Fresh { success: false, .. }));
    }

    #[tokio::test]
    async fn overrun_is_stale_not_error() {
        let dir = TempDir::new().unwrap();
        let runner = shell_runner(dir.path(), "sleep 5").with_timeout(Duration::from_millis(100));
        let measurement = runner.measure(&TestSelection::All).await.unwrap();
        assert!(matches!(measurement, Measurement::Stale { .. }));
    }

    #[tokio::test]
    async fn missing_coverage_is_runner_error() {
        let dir = TempDir::new().unwrap();
        let runner = shell_runner(dir.path(), "true");
        let result = runner.measure(&TestSelection::All).await;
        assert!(matches!(result, Err(MutscopeError::Runner(_))));
    }

    #[tokio::test]
    async fn leftover_coverage_is_not_reported_as_fresh() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("cov.json"), r#"{"old.py": {"1": ["t_old"]}}"#).unwrap();
        let runner = shell_runner(dir.path(), "true");

        let result = runner.measure(&TestSelection::All).await;
        assert!(matches!(result, Err(MutscopeError::Runner(_))));
        assert!(!dir.path().join("cov.json").exists());
    }

    #[test]
    fn rotate_moves_current_to_previous() {
        let dir = TempDir::new().unwrap();
        let coverage = CoverageConfig {
            previous: "old.json".into(),
            current: "cov.json".into(),
        };
        assert!(!rotate_coverage(&coverage, dir.path()).unwrap());

        std::fs::write(dir.path().join("cov.json"), "{}").unwrap();
        assert!(rotate_coverage(&coverage, dir.path()).unwrap());
        assert!(dir.path().join("old.json").exists());
        assert!(!dir.path().join("cov.json").exists());
    }
}
