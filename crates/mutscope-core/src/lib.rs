//! Core types, configuration, and error handling for mutscope.
//!
//! This crate provides the shared foundation used by all other mutscope crates:
//! - [`MutscopeError`] — unified error type using `thiserror`
//! - [`MutscopeConfig`] — configuration loaded from `.mutscope.toml`
//! - Shared types: [`ChangeSet`], [`ChangeKey`], [`DiffRecord`], [`MutantRecord`],
//!   [`MutantStatus`], [`FileFailure`], [`OutputFormat`]

mod config;
mod error;
mod types;

pub use config::{CoverageConfig, MutscopeConfig, RegistryConfig, RunnerConfig, SourceConfig};
pub use error::MutscopeError;
pub use types::{
    ChangeKey, ChangeSet, DiffRecord, FailureKind, FileFailure, MutantRecord, MutantStatus,
    OutputFormat,
};

/// A convenience `Result` type for mutscope operations.
pub type Result<T> = std::result::Result<T, MutscopeError>;
