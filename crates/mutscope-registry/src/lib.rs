//! Persistent mutant verdicts and their upkeep across source changes.
//!
//! The [`store::MutantRegistry`] trait is the only mutable resource of an
//! analysis run. [`relink`] keeps records attached to their code across
//! renames and edits, [`affected`] decides which records need a retest.

pub mod affected;
pub mod fingerprint;
pub mod memory;
pub mod relink;
pub mod store;

pub use memory::MemoryRegistry;
pub use store::{LineRewrite, MutantRegistry, SqliteRegistry};
