//! Work request and response for one delegated unit.

use crate::agent::role::Role;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// One unit of delegated work.
///
/// Requests are values: before-execute hooks receive one and return a new
/// one rather than mutating shared state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkRequest<I> {
    pub role: Role,
    pub work_dir: PathBuf,
    pub input: I,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_override: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl<I> WorkRequest<I> {
    pub fn new(role: Role, work_dir: impl Into<PathBuf>, input: I) -> Self {
        Self {
            role,
            work_dir: work_dir.into(),
            input,
            backend_override: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_backend(mut self, backend: &str) -> Self {
        self.backend_override = Some(backend.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Why a unit failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The resolved backend is missing or reported unavailable. Never retried.
    NotAvailable,
    /// An attempt outlived its timeout. Never retried.
    Timeout,
    /// The backend call failed; retried up to the role's `max_retries`.
    Transport,
    /// The backend answered but the role parser rejected the text. Reported
    /// once, never retried.
    Parse,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::NotAvailable => write!(f, "not_available"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Transport => write!(f, "transport"),
            FailureKind::Parse => write!(f, "parse"),
        }
    }
}

/// Usage and timing for one unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub input_units: u64,
    pub output_units: u64,
    pub total_units: u64,
    pub duration_ms: u64,
    pub retries: u32,
    pub backend_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_estimate: Option<f64>,
}

impl Metrics {
    /// Zero usage, only timing, retries and backend filled in.
    pub fn empty(backend_id: &str, duration_ms: u64, retries: u32) -> Self {
        Self {
            duration_ms,
            retries,
            backend_id: backend_id.to_string(),
            ..Default::default()
        }
    }
}

/// Outcome of one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkResponse<O> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<O>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    pub metrics: Metrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
}

impl<O> WorkResponse<O> {
    pub fn succeeded(output: O, metrics: Metrics, raw_output: String) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
            failure: None,
            metrics,
            raw_output: Some(raw_output),
        }
    }

    pub fn failed(kind: FailureKind, error: impl Into<String>, metrics: Metrics) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            failure: Some(kind),
            metrics,
            raw_output: None,
        }
    }

    pub fn with_raw_output(mut self, raw: String) -> Self {
        self.raw_output = Some(raw);
        self
    }

    pub fn is_timeout(&self) -> bool {
        self.failure == Some(FailureKind::Timeout)
    }
}
