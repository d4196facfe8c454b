//! Backends that perform the delegated work behind a request.
//!
//! A backend takes prompt text and a working directory and returns raw text
//! plus usage counts. The executor owns timeouts and retries; backends only
//! need to honor the cancellation token they are handed so that an abandoned
//! call can release its resources.

use crate::agent::role::{Capabilities, Role};
use crate::error::{Error, Result};
use crate::rlog_debug;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Per-call options passed to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendOptions {
    pub role: Role,
    pub capabilities: Capabilities,
}

impl BackendOptions {
    pub fn for_role(role: Role) -> Self {
        Self {
            role,
            capabilities: role.capabilities(),
        }
    }
}

/// Raw outcome of one backend call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResult {
    pub success: bool,
    pub response_text: String,
    pub input_units: u64,
    pub output_units: u64,
    pub cost_estimate: Option<f64>,
    pub error: Option<String>,
}

impl RawResult {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            success: true,
            response_text: text.into(),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_units(mut self, input: u64, output: u64) -> Self {
        self.input_units = input;
        self.output_units = output;
        self
    }
}

/// Callback for streamed progress text.
pub type ProgressFn = Arc<dyn Fn(&str) + Send + Sync>;

/// External capability that performs a unit's work.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Registry id, reported in metrics.
    fn id(&self) -> &str;

    async fn is_available(&self) -> bool;

    async fn execute(
        &self,
        prompt: &str,
        work_dir: &Path,
        options: &BackendOptions,
        cancel: CancellationToken,
    ) -> Result<RawResult>;

    /// Streaming variant. Backends without incremental output fall back to
    /// `execute` and report nothing through `on_progress`.
    async fn execute_streaming(
        &self,
        prompt: &str,
        work_dir: &Path,
        on_progress: ProgressFn,
        options: &BackendOptions,
        cancel: CancellationToken,
    ) -> Result<RawResult> {
        let _ = on_progress;
        self.execute(prompt, work_dir, options, cancel).await
    }
}

/// Backends by id.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn Backend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under its own id, replacing any previous one.
    pub fn register(&mut self, backend: Arc<dyn Backend>) {
        self.backends.insert(backend.id().to_string(), backend);
    }

    pub fn with(mut self, backend: Arc<dyn Backend>) -> Self {
        self.register(backend);
        self
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Backend>> {
        self.backends.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.backends.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.ids())
            .finish()
    }
}

/// Backend that runs a local CLI with the prompt as its last argument.
///
/// When `json_output` is set the CLI is expected to print a headless-mode
/// JSON envelope (`result`, `is_error`, `usage`, `total_cost_usd`); otherwise
/// stdout is the response text.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    id: String,
    program: PathBuf,
    args: Vec<String>,
    json_output: bool,
}

#[derive(Debug, Deserialize)]
struct JsonEnvelope {
    result: Option<String>,
    #[serde(default)]
    is_error: bool,
    error: Option<String>,
    total_cost_usd: Option<f64>,
    usage: Option<JsonUsage>,
}

#[derive(Debug, Deserialize)]
struct JsonUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

impl CommandBackend {
    /// Build from a whitespace-separated command line.
    pub fn from_command_line(id: &str, command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace().map(String::from);
        let program = parts
            .next()
            .ok_or_else(|| Error::Validation(format!("backend {} has an empty command", id)))?;
        Ok(Self {
            id: id.to_string(),
            program: PathBuf::from(program),
            args: parts.collect(),
            json_output: false,
        })
    }

    pub fn with_json_output(mut self, json_output: bool) -> Self {
        self.json_output = json_output;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Interpret the CLI's stdout.
    pub fn parse_stdout(&self, stdout: &str) -> RawResult {
        if !self.json_output {
            return RawResult::ok(stdout.trim());
        }
        match serde_json::from_str::<JsonEnvelope>(stdout.trim()) {
            Ok(envelope) => {
                let (input_units, output_units) = envelope
                    .usage
                    .map(|u| (u.input_tokens, u.output_tokens))
                    .unwrap_or((0, 0));
                let mut raw = if envelope.is_error {
                    RawResult::failed(
                        envelope
                            .error
                            .or(envelope.result)
                            .unwrap_or_else(|| "backend reported an error".to_string()),
                    )
                } else {
                    RawResult::ok(envelope.result.unwrap_or_default())
                };
                raw.input_units = input_units;
                raw.output_units = output_units;
                raw.cost_estimate = envelope.total_cost_usd;
                raw
            }
            // Some CLIs print plain text even when asked for JSON.
            Err(_) => RawResult::ok(stdout.trim()),
        }
    }
}

#[async_trait]
impl Backend for CommandBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn is_available(&self) -> bool {
        which::which(&self.program).is_ok()
    }

    async fn execute(
        &self,
        prompt: &str,
        work_dir: &Path,
        _options: &BackendOptions,
        cancel: CancellationToken,
    ) -> Result<RawResult> {
        rlog_debug!(
            "CommandBackend[{}]: {} {:?} in {}",
            self.id,
            self.program.display(),
            self.args,
            work_dir.display()
        );
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(prompt)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Dropping the wait future on cancellation drops the child, which
        // kills it because of kill_on_drop.
        let output = tokio::select! {
            output = child.wait_with_output() => output?,
            _ = cancel.cancelled() => {
                return Err(Error::Transport(format!("{} call cancelled", self.id)));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = if stderr.trim().is_empty() {
                format!(
                    "{} exited with code {}",
                    self.id,
                    output.status.code().unwrap_or(-1)
                )
            } else {
                stderr.trim().to_string()
            };
            return Ok(RawResult::failed(message));
        }
        Ok(self.parse_stdout(&stdout))
    }
}
