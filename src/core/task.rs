//! Task data model for remediation plans.
//!
//! Tasks are produced by the planning stage, rewritten by consolidation
//! (dependency rewrite, group reassignment, removal) and only move to a
//! terminal status in the execution stage.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Identifier of a task within a plan.
///
/// Planners emit short human ids (`T1`, `fix-auth-3`), so this wraps the
/// string as-is instead of generating one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Task status in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created by the planner, not yet executed.
    #[default]
    Pending,
    /// Picked up by the execution stage.
    InProgress,
    /// Executed and verified.
    Done,
    /// Execution or verification failed.
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Done => write!(f, "done"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One acceptance criterion, optionally checked by a shell command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptanceCriterion {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_command: Option<String>,
}

/// A single remediation task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    /// Ids of tasks that must complete first. Never contains `id` once
    /// consolidated.
    #[serde(default)]
    pub depends_on: Vec<TaskId>,
    /// Files the task expects to touch.
    #[serde(default)]
    pub files: Vec<PathBuf>,
    /// Commands that must pass after the task is applied.
    #[serde(default)]
    pub checks: Vec<String>,
    #[serde(default)]
    pub acceptance: Vec<AcceptanceCriterion>,
    /// Execution tier; strictly greater than every dependency's tier after
    /// consolidation.
    #[serde(default)]
    pub parallel_group: u32,
    #[serde(default)]
    pub status: TaskStatus,
}

impl Task {
    /// Create a pending task with no dependencies.
    pub fn new(id: impl Into<TaskId>, title: &str) -> Self {
        Self {
            id: id.into(),
            title: title.to_string(),
            depends_on: Vec::new(),
            files: Vec::new(),
            checks: Vec::new(),
            acceptance: Vec::new(),
            parallel_group: 0,
            status: TaskStatus::Pending,
        }
    }

    /// Builder-style dependency list.
    pub fn depending_on<I, T>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskId>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Add a dependency unless it is already present or is the task itself.
    ///
    /// Returns true if the list changed.
    pub fn add_dependency(&mut self, dep: TaskId) -> bool {
        if dep == self.id || self.depends_on.contains(&dep) {
            return false;
        }
        self.depends_on.push(dep);
        true
    }

    /// Drop repeated entries and self-references, keeping first-seen order.
    pub fn normalize_dependencies(&mut self) {
        let mut seen = std::collections::HashSet::new();
        let own = self.id.clone();
        self.depends_on
            .retain(|dep| *dep != own && seen.insert(dep.clone()));
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, TaskStatus::Done | TaskStatus::Failed)
    }
}
