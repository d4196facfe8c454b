//! Issue data model.
//!
//! Issues come out of the investigation stage as `UNVALIDATED` and are
//! settled by validator units into one of the terminal statuses.

use crate::core::task::TaskId;
use serde::{Deserialize, Serialize};

/// Validation status of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueStatus {
    #[default]
    Unvalidated,
    Confirmed,
    False,
    Partial,
    Misdiagnosed,
}

impl IssueStatus {
    pub const ALL: [IssueStatus; 5] = [
        IssueStatus::Unvalidated,
        IssueStatus::Confirmed,
        IssueStatus::False,
        IssueStatus::Partial,
        IssueStatus::Misdiagnosed,
    ];

    /// Whether validation has settled this issue.
    pub fn is_settled(&self) -> bool {
        !matches!(self, IssueStatus::Unvalidated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::Unvalidated => "UNVALIDATED",
            IssueStatus::Confirmed => "CONFIRMED",
            IssueStatus::False => "FALSE",
            IssueStatus::Partial => "PARTIAL",
            IssueStatus::Misdiagnosed => "MISDIAGNOSED",
        }
    }
}

impl std::fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IssueStatus {
    type Err = String;

    /// Lenient: validators write `confirmed`, `Confirmed` or `CONFIRMED`, and
    /// `false_positive` for `FALSE`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "UNVALIDATED" => Ok(IssueStatus::Unvalidated),
            "CONFIRMED" => Ok(IssueStatus::Confirmed),
            "FALSE" | "FALSE_POSITIVE" => Ok(IssueStatus::False),
            "PARTIAL" => Ok(IssueStatus::Partial),
            "MISDIAGNOSED" => Ok(IssueStatus::Misdiagnosed),
            _ => Err(format!("unknown issue status: {}", s)),
        }
    }
}

/// A reported issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: IssueStatus,
    #[serde(default)]
    pub related_task_ids: Vec<TaskId>,
    /// Free-form reasoning recorded by the validator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_note: Option<String>,
}

impl Issue {
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            status: IssueStatus::Unvalidated,
            related_task_ids: Vec::new(),
            validation_note: None,
        }
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, patch: &IssuePatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(ids) = &patch.related_task_ids {
            self.related_task_ids = ids.clone();
        }
        if let Some(note) = &patch.validation_note {
            self.validation_note = Some(note.clone());
        }
    }
}

/// Partial update for one issue. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuePatch {
    pub status: Option<IssueStatus>,
    pub related_task_ids: Option<Vec<TaskId>>,
    pub validation_note: Option<String>,
}

impl IssuePatch {
    pub fn status(status: IssueStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.validation_note = Some(note.into());
        self
    }
}
