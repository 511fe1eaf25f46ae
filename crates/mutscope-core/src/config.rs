use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::MutscopeError;

/// Top-level configuration loaded from `.mutscope.toml`.
///
/// Every section is optional; missing keys fall back to defaults.
///
/// # Examples
///
/// ```
/// use mutscope_core::MutscopeConfig;
///
/// let config = MutscopeConfig::default();
/// assert_eq!(config.source.include, vec!["**/*.py"]);
/// assert_eq!(config.runner.timeout_secs, 1800);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MutscopeConfig {
    /// Which files take part in diff extraction.
    #[serde(default)]
    pub source: SourceConfig,
    /// Locations of the previous and current coverage stores.
    #[serde(default)]
    pub coverage: CoverageConfig,
    /// External test runner settings.
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Mutant registry settings.
    #[serde(default)]
    pub registry: RegistryConfig,
}

impl MutscopeConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`MutscopeError::Io`] if the file cannot be read, or
    /// [`MutscopeError::Toml`] if the content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use mutscope_core::MutscopeConfig;
    /// use std::path::Path;
    ///
    /// let config = MutscopeConfig::from_file(Path::new(".mutscope.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, MutscopeError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`MutscopeError::Toml`] if parsing fails, or
    /// [`MutscopeError::Config`] if the runner command is blank.
    ///
    /// # Examples
    ///
    /// ```
    /// use mutscope_core::MutscopeConfig;
    ///
    /// let toml = r#"
    /// [runner]
    /// timeout_secs = 60
    /// "#;
    /// let config = MutscopeConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.runner.timeout_secs, 60);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, MutscopeError> {
        let config: Self = toml::from_str(content)?;
        if config.runner.command.trim().is_empty() {
            return Err(MutscopeError::Config("runner.command must not be empty".into()));
        }
        Ok(config)
    }

    /// Load `path` if given, otherwise `.mutscope.toml` in `root` when it exists,
    /// otherwise defaults.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`MutscopeConfig::from_file`].
    pub fn resolve(path: Option<&Path>, root: &Path) -> Result<Self, MutscopeError> {
        match path {
            Some(p) => Self::from_file(p),
            None => {
                let default_path = root.join(".mutscope.toml");
                if default_path.exists() {
                    Self::from_file(&default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}

/// Source file selection for diff extraction.
///
/// # Examples
///
/// ```
/// use mutscope_core::SourceConfig;
///
/// let config = SourceConfig::default();
/// assert!(config.exclude.is_empty());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Glob patterns of source files of interest (default: `["**/*.py"]`).
    #[serde(default = "default_include")]
    pub include: Vec<String>,
    /// Glob patterns excluded even when included.
    #[serde(default)]
    pub exclude: Vec<String>,
}

fn default_include() -> Vec<String> {
    vec!["**/*.py".into()]
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            include: default_include(),
            exclude: Vec::new(),
        }
    }
}

/// Coverage store locations, relative to the repository root.
///
/// # Examples
///
/// ```
/// use mutscope_core::CoverageConfig;
/// use std::path::PathBuf;
///
/// let config = CoverageConfig::default();
/// assert_eq!(config.previous, PathBuf::from(".coverage_old"));
/// assert_eq!(config.current, PathBuf::from(".coverage"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageConfig {
    /// Coverage store of the baseline run (default: `.coverage_old`).
    #[serde(default = "default_previous")]
    pub previous: PathBuf,
    /// Coverage store of the current run (default: `.coverage`).
    #[serde(default = "default_current")]
    pub current: PathBuf,
}

fn default_previous() -> PathBuf {
    PathBuf::from(".coverage_old")
}

fn default_current() -> PathBuf {
    PathBuf::from(".coverage")
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            previous: default_previous(),
            current: default_current(),
        }
    }
}

/// External test runner configuration.
///
/// # Examples
///
/// ```
/// use mutscope_core::RunnerConfig;
///
/// let config = RunnerConfig::default();
/// assert_eq!(config.command, "python -m pytest");
/// assert_eq!(config.test_paths, vec![std::path::PathBuf::from("tests")]);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Test command, split on whitespace (default: `python -m pytest`).
    #[serde(default = "default_command")]
    pub command: String,
    /// Extra arguments enabling per-test coverage contexts.
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Wall-clock budget for one coverage measurement, in seconds (default: 1800).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Paths hashed into the test-selection fingerprint (default: `["tests"]`).
    #[serde(default = "default_test_paths")]
    pub test_paths: Vec<PathBuf>,
}

fn default_command() -> String {
    "python -m pytest".into()
}

fn default_args() -> Vec<String> {
    vec!["--cov-context=test".into(), "-q".into()]
}

fn default_timeout_secs() -> u64 {
    1800
}

fn default_test_paths() -> Vec<PathBuf> {
    vec![PathBuf::from("tests")]
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: default_args(),
            timeout_secs: default_timeout_secs(),
            test_paths: default_test_paths(),
        }
    }
}

/// Mutant registry configuration.
///
/// # Examples
///
/// ```
/// use mutscope_core::RegistryConfig;
/// use std::path::PathBuf;
///
/// let config = RegistryConfig::default();
/// assert_eq!(config.path, PathBuf::from(".mutscope/registry.db"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// SQLite database holding mutant records (default: `.mutscope/registry.db`).
    #[serde(default = "default_registry_path")]
    pub path: PathBuf,
}

fn default_registry_path() -> PathBuf {
    PathBuf::from(".mutscope/registry.db")
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: default_registry_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = MutscopeConfig::default();
        assert_eq!(config.source.include, vec!["**/*.py"]);
        assert!(config.source.exclude.is_empty());
        assert_eq!(config.coverage.previous, PathBuf::from(".coverage_old"));
        assert_eq!(config.coverage.current, PathBuf::from(".coverage"));
        assert_eq!(config.runner.command, "python -m pytest");
        assert_eq!(config.runner.args, vec!["--cov-context=test", "-q"]);
        assert_eq!(config.runner.timeout_secs, 1800);
        assert_eq!(config.registry.path, PathBuf::from(".mutscope/registry.db"));
    }

    #[test]
    fn parse_full_toml() {
        let toml = r#"
[source]
include = ["src/**/*.py", "lib/*.py"]
exclude = ["src/generated/**"]

[coverage]
previous = "cov/old.json"
current = "cov/new.json"

[runner]
command = "pytest"
args = ["--cov-context=test"]
timeout_secs = 120
test_paths = ["tests", "conftest.py"]

[registry]
path = "state/mutants.db"
"#;
        let config = MutscopeConfig::from_toml(toml).unwrap();
        assert_eq!(config.source.include.len(), 2);
        assert_eq!(config.source.exclude, vec!["src/generated/**"]);
        assert_eq!(config.coverage.previous, PathBuf::from("cov/old.json"));
        assert_eq!(config.runner.command, "pytest");
        assert_eq!(config.runner.timeout_secs, 120);
        assert_eq!(config.runner.test_paths.len(), 2);
        assert_eq!(config.registry.path, PathBuf::from("state/mutants.db"));
    }

    #[test]
    fn empty_toml_gives_defaults() {
        let config = MutscopeConfig::from_toml("").unwrap();
        assert_eq!(config.runner.timeout_secs, 1800);
        assert_eq!(config.source.include, vec!["**/*.py"]);
    }

    #[test]
    fn blank_runner_command_is_rejected() {
        let result = MutscopeConfig::from_toml("[runner]\ncommand = \"  \"\n");
        assert!(matches!(result, Err(MutscopeError::Config(_))));
    }

    #[test]
    fn invalid_toml_returns_error() {
        let result = MutscopeConfig::from_toml("{{invalid}}");
        assert!(result.is_err());
    }

    #[test]
    fn resolve_without_file_gives_defaults() {
        let config = MutscopeConfig::resolve(None, Path::new("/nonexistent/dir")).unwrap();
        assert_eq!(config.coverage.current, PathBuf::from(".coverage"));
    }
}
