use std::path::PathBuf;

/// Errors that can occur across mutscope.
///
/// Each variant wraps a specific error domain. Library crates use this type
/// directly; the binary crate reports it through `miette`.
///
/// Per-file diff problems are not errors: they are collected as
/// [`FileFailure`](crate::FileFailure) entries on the change set.
///
/// # Examples
///
/// ```
/// use mutscope_core::MutscopeError;
///
/// let err = MutscopeError::Config("missing test command".into());
/// assert!(err.to_string().contains("missing test command"));
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum MutscopeError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    #[diagnostic(help("check .mutscope.toml or run 'mutscope init'"))]
    Config(String),

    /// Git operation failure.
    #[error("git error: {0}")]
    Git(String),

    /// Unified diff parsing failure.
    #[error("diff parse error: {0}")]
    Parse(String),

    /// Coverage data could not be read or interpreted.
    #[error("coverage error: {0}")]
    Coverage(String),

    /// Mutant registry failure.
    #[error("database error: {0}")]
    Database(String),

    /// The external test runner failed to start or exited unsuccessfully.
    #[error("test runner error: {0}")]
    Runner(String),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A required file was not found.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),
}
