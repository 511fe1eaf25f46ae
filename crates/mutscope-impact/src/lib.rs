//! End-to-end incremental impact analysis.
//!
//! [`pipeline::analyze`] combines a change set, two coverage snapshots and
//! the mutant registry into an [`pipeline::ImpactReport`];
//! [`pipeline::apply`] writes the consequences back to the registry.

pub mod pipeline;
pub mod report;

pub use pipeline::{analyze, apply, ApplyOutcome, ImpactReport};
pub use report::ChangeSummary;
