//! Agent execution and consolidation scheduling for remediation runs.
//!
//! - `agent`: the work-unit contract and the single-unit executor
//! - `orchestration`: fan-out batches and convergence rounds
//! - `consolidation`: merging planned task lists into one ordered plan
//! - `state`, `workflow`: persisted run state

pub mod agent;
pub mod config;
pub mod consolidation;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod state;
pub mod workflow;

pub use error::{Error, Result};
