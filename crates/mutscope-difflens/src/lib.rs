//! Structural line-level change extraction.
//!
//! Turns the difference between a baseline commit and the current state into
//! per-file removed/added line numbers. Uses git2 for tree walking, rename
//! detection and zero-context patch generation, and a unified diff parser
//! for line bookkeeping.

pub mod extract;
pub mod filter;
pub mod parser;
