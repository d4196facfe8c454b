//! Consolidation of independently planned task lists.
//!
//! Planning runs once per confirmed issue, so the same fix can be planned
//! twice and related fixes know nothing of each other. Consolidation merges
//! duplicates, injects cross-plan dependencies, assigns parallel groups and
//! produces one execution order. Consolidator suggestions are normalized in
//! `suggestion` before the engine uses any of them.

pub mod engine;
pub mod suggestion;

pub use engine::{consolidate, consolidate_in_store, Consolidated};
pub use suggestion::{ConsolidationResult, CrossDependency, Duplicate, ParallelGroup, Suggestion};
