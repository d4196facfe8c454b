//! Core domain models for remediation runs.
//!
//! Tasks and issues as the pipeline persists them, plus the ordering-only
//! graph projection used by consolidation.

pub mod graph;
pub mod issue;
pub mod task;

pub use graph::{GraphNode, TaskGraph, TopologicalOrder};
pub use issue::{Issue, IssuePatch, IssueStatus};
pub use task::{AcceptanceCriterion, Task, TaskId, TaskStatus};
