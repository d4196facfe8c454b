//! Run identity and lifecycle types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a remediation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 characters of the UUID, for log lines and status output.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Pipeline phases, in execution order.
///
/// Investigate finds issues, validate settles them, plan turns confirmed
/// issues into tasks, review critiques the plan, consolidate merges and
/// orders the tasks, execute applies them and verify checks the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Investigate,
    Validate,
    Plan,
    Review,
    Consolidate,
    Execute,
    Verify,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Phase::Investigate,
        Phase::Validate,
        Phase::Plan,
        Phase::Review,
        Phase::Consolidate,
        Phase::Execute,
        Phase::Verify,
    ];

    /// The phase after this one, or `None` after verify.
    pub fn next(self) -> Option<Phase> {
        let position = Self::ALL.iter().position(|p| *p == self)?;
        Self::ALL.get(position + 1).copied()
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Investigate => write!(f, "investigate"),
            Phase::Validate => write!(f, "validate"),
            Phase::Plan => write!(f, "plan"),
            Phase::Review => write!(f, "review"),
            Phase::Consolidate => write!(f, "consolidate"),
            Phase::Execute => write!(f, "execute"),
            Phase::Verify => write!(f, "verify"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Persisted record of where a run stands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    pub id: RunId,
    pub phase: Phase,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunMetadata {
    /// New pending run at the first phase.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: RunId::new(),
            phase: Phase::Investigate,
            status: RunStatus::Pending,
            started_at: now,
            updated_at: now,
        }
    }

    /// Move to `phase` and mark the run as running.
    pub fn enter(&mut self, phase: Phase) {
        self.phase = phase;
        self.status = RunStatus::Running;
        self.touch();
    }

    /// Finish the current phase. Completing verify completes the run.
    pub fn complete_phase(&mut self) {
        match self.phase.next() {
            Some(next) => self.phase = next,
            None => self.status = RunStatus::Completed,
        }
        self.touch();
    }

    pub fn fail(&mut self) {
        self.status = RunStatus::Failed;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl Default for RunMetadata {
    fn default() -> Self {
        Self::new()
    }
}
