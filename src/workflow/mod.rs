//! Run lifecycle types for the remediation pipeline.
//!
//! A run moves through the phases in order; its metadata is persisted by the
//! state store so `remedy status` can report where a run stands.

mod types;

pub use types::{Phase, RunId, RunMetadata, RunStatus};
