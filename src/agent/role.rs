//! Agent roles and their execution policy.
//!
//! Each role in the remediation pipeline has a fixed capability set and a
//! default execution configuration (timeout, retries, backend).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backend used when neither the request nor the role configuration names one.
pub const DEFAULT_BACKEND: &str = "claude";

/// Default retry delay between transport-level attempts.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2_000;

/// Identity of a work unit in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Investigator,
    Validator,
    Planner,
    Reviewer,
    Consolidator,
    Executor,
    Verifier,
}

impl Role {
    pub const ALL: [Role; 7] = [
        Role::Investigator,
        Role::Validator,
        Role::Planner,
        Role::Reviewer,
        Role::Consolidator,
        Role::Executor,
        Role::Verifier,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Investigator => "investigator",
            Role::Validator => "validator",
            Role::Planner => "planner",
            Role::Reviewer => "reviewer",
            Role::Consolidator => "consolidator",
            Role::Executor => "executor",
            Role::Verifier => "verifier",
        }
    }

    /// What a unit in this role may do in the work directory.
    ///
    /// Only the executor mutates the repository; everything upstream of it
    /// is read-only analysis.
    pub fn capabilities(&self) -> Capabilities {
        match self {
            Role::Investigator | Role::Reviewer | Role::Consolidator => Capabilities::READ_ONLY,
            Role::Validator | Role::Verifier => Capabilities {
                execute_commands: true,
                ..Capabilities::READ_ONLY
            },
            Role::Planner => Capabilities::READ_ONLY,
            Role::Executor => Capabilities {
                read: true,
                write: true,
                execute_commands: true,
                create_branch: true,
                commit: true,
                open_pr: false,
            },
        }
    }

    /// Default timeout, retry and backend policy for this role.
    pub fn default_config(&self) -> ExecutionConfig {
        let (timeout_secs, max_retries) = match self {
            Role::Investigator => (600, 2),
            Role::Validator => (300, 2),
            Role::Planner => (600, 2),
            Role::Reviewer => (300, 1),
            Role::Consolidator => (300, 1),
            Role::Executor => (1_800, 1),
            Role::Verifier => (900, 1),
        };
        ExecutionConfig {
            timeout_ms: timeout_secs * 1_000,
            max_retries,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            backend: DEFAULT_BACKEND.to_string(),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Role::ALL
            .iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| format!("unknown role: {}", s))
    }
}

/// Permission flags handed to the backend for a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Capabilities {
    pub read: bool,
    pub write: bool,
    pub execute_commands: bool,
    pub create_branch: bool,
    pub commit: bool,
    pub open_pr: bool,
}

impl Capabilities {
    pub const READ_ONLY: Capabilities = Capabilities {
        read: true,
        write: false,
        execute_commands: false,
        create_branch: false,
        commit: false,
        open_pr: false,
    };
}

/// Execution policy for one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Wall-clock bound per attempt.
    pub timeout_ms: u64,
    /// Extra transport-level attempts after the first. 0 means one attempt.
    pub max_retries: u32,
    /// Pause between transport-level attempts.
    pub retry_delay_ms: u64,
    /// Backend id used when the request carries no override.
    pub backend: String,
}

impl ExecutionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay_ms(mut self, retry_delay_ms: u64) -> Self {
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    pub fn with_backend(mut self, backend: &str) -> Self {
        self.backend = backend.to_string();
        self
    }
}
