//! Per-test line coverage and changed-test selection.
//!
//! Loads coverage snapshots annotated with test contexts, pairs two of them
//! across a change set, and decides which tests have to run again. The
//! [`runner`] module regenerates a snapshot by invoking the external test
//! command under a wall-clock budget.

pub mod align;
pub mod context;
pub mod runner;
pub mod select;
pub mod snapshot;
