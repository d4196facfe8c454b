//! Test fixtures for integration tests.
//!
//! Provides:
//! - `MockBackend`, a backend driven by directives in the prompt text
//! - `EchoAgent` and `TitleValidator`, minimal role agents
//! - Task builders for graph scenarios

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use remedy::agent::{
    AgentExecutor, Backend, BackendOptions, BackendRegistry, ProgressFn, RawResult, Role,
    RoleAgent, WorkRequest,
};
use remedy::core::{Issue, Task};
use remedy::orchestration::{parse_verdict, ValidationVerdict};
use remedy::{Error, Result};

pub const MOCK_BACKEND: &str = "mock";

/// Backend that answers according to directives in the prompt.
///
/// - `fail` returns a transport error
/// - `refuse` returns an unsuccessful raw result
/// - `hang` waits until cancelled
/// - `sleep:<ms>:<rest>` waits, then handles `<rest>`
/// - `flaky:<n>:<rest>` fails the first `n` calls with this prompt
/// - anything else is echoed back
pub struct MockBackend {
    available: bool,
    calls: AtomicU32,
    streamed: AtomicU32,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    seen: Mutex<HashMap<String, u32>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::with_availability(true))
    }

    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self::with_availability(false))
    }

    fn with_availability(available: bool) -> Self {
        Self {
            available,
            calls: AtomicU32::new(0),
            streamed: AtomicU32::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn streamed(&self) -> u32 {
        self.streamed.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    /// How many calls carried exactly `prompt`.
    pub fn calls_with(&self, prompt: &str) -> usize {
        self.prompts().iter().filter(|p| p.as_str() == prompt).count()
    }

    pub fn registry(self: &Arc<Self>) -> BackendRegistry {
        BackendRegistry::new().with(self.clone())
    }

    async fn respond(&self, prompt: &str, cancel: &CancellationToken) -> Result<RawResult> {
        let mut directive = prompt.to_string();
        loop {
            if let Some(rest) = directive.strip_prefix("sleep:") {
                let (ms, rest) = rest.split_once(':').unwrap_or((rest, ""));
                let ms: u64 = ms.parse().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                directive = rest.to_string();
                continue;
            }
            if let Some(rest) = directive.strip_prefix("flaky:") {
                let (n, rest) = rest.split_once(':').unwrap_or((rest, ""));
                let n: u32 = n.parse().unwrap_or(0);
                let count = {
                    let mut seen = self.seen.lock().unwrap();
                    let count = seen.entry(prompt.to_string()).or_insert(0);
                    *count += 1;
                    *count
                };
                if count <= n {
                    return Err(Error::Transport(format!("flaky call {}", count)));
                }
                directive = rest.to_string();
                continue;
            }
            break;
        }

        match directive.as_str() {
            "fail" => Err(Error::Transport("connection reset".to_string())),
            "refuse" => Ok(RawResult::failed("backend refused")),
            "hang" => {
                cancel.cancelled().await;
                Err(Error::Transport("cancelled".to_string()))
            }
            text => Ok(RawResult::ok(text).with_units(100, 20)),
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn id(&self) -> &str {
        MOCK_BACKEND
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn execute(
        &self,
        prompt: &str,
        _work_dir: &Path,
        _options: &BackendOptions,
        cancel: CancellationToken,
    ) -> Result<RawResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = self.respond(prompt, &cancel).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn execute_streaming(
        &self,
        prompt: &str,
        work_dir: &Path,
        on_progress: ProgressFn,
        options: &BackendOptions,
        cancel: CancellationToken,
    ) -> Result<RawResult> {
        self.streamed.fetch_add(1, Ordering::SeqCst);
        on_progress(prompt);
        self.execute(prompt, work_dir, options, cancel).await
    }
}

/// Sends its input verbatim; output starting with `garbage` fails to parse
/// and `panic` panics inside the parser.
pub struct EchoAgent;

impl RoleAgent for EchoAgent {
    type Input = String;
    type Output = String;

    fn role(&self) -> Role {
        Role::Investigator
    }

    fn build_prompt(&self, request: &WorkRequest<String>) -> String {
        request.input.clone()
    }

    fn parse_output(&self, raw: &str) -> Result<String> {
        if raw == "panic" {
            panic!("parser blew up");
        }
        if raw.starts_with("garbage") {
            return Err(Error::Parse(format!("unreadable: {}", raw)));
        }
        Ok(raw.to_string())
    }
}

/// Validator whose prompt is the issue title, so titles script the backend.
pub struct TitleValidator;

impl RoleAgent for TitleValidator {
    type Input = Issue;
    type Output = ValidationVerdict;

    fn role(&self) -> Role {
        Role::Validator
    }

    fn build_prompt(&self, request: &WorkRequest<Issue>) -> String {
        request.input.title.clone()
    }

    fn parse_output(&self, raw: &str) -> Result<ValidationVerdict> {
        parse_verdict(raw)
    }
}

/// Echo executor on the mock backend with a 1ms retry delay.
pub fn echo_executor(
    backend: &Arc<MockBackend>,
    max_retries: u32,
    timeout_ms: u64,
) -> Arc<AgentExecutor<EchoAgent>> {
    Arc::new(
        AgentExecutor::new(EchoAgent, backend.registry()).with_config(
            Role::Investigator
                .default_config()
                .with_backend(MOCK_BACKEND)
                .with_max_retries(max_retries)
                .with_timeout_ms(timeout_ms)
                .with_retry_delay_ms(1),
        ),
    )
}

pub fn validator_executor(backend: &Arc<MockBackend>) -> Arc<AgentExecutor<TitleValidator>> {
    Arc::new(
        AgentExecutor::new(TitleValidator, backend.registry()).with_config(
            Role::Validator
                .default_config()
                .with_backend(MOCK_BACKEND)
                .with_max_retries(0)
                .with_timeout_ms(5_000),
        ),
    )
}

pub fn echo_request(input: &str) -> WorkRequest<String> {
    WorkRequest::new(Role::Investigator, ".", input.to_string())
}

pub fn verdict(status: &str) -> String {
    format!(r#"{{"status": "{}", "reason": "checked"}}"#, status)
}

/// Task `id` depending on `deps`.
pub fn task(id: &str, deps: &[&str]) -> Task {
    Task::new(id, &format!("{} description", id)).depending_on(deps.iter().copied())
}

/// `T1 <- T2 <- ... <- Tn`, each depending on the previous.
pub fn linear_chain(n: usize) -> Vec<Task> {
    (1..=n)
        .map(|i| {
            let id = format!("T{}", i);
            let prev = format!("T{}", i - 1);
            if i == 1 {
                task(&id, &[])
            } else {
                task(&id, &[prev.as_str()])
            }
        })
        .collect()
}

/// Layered acyclic task set: task `i` may depend on any earlier task.
///
/// Edges come from a fixed linear congruential sequence so every run sees
/// the same graph. Tasks are returned in reverse creation order so the input
/// is never already sorted.
pub fn layered_dag(n: usize, seed: u64) -> Vec<Task> {
    let mut state = seed;
    let mut next = move || {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        state >> 33
    };
    let mut tasks: Vec<Task> = (0..n)
        .map(|i| {
            let deps: Vec<String> = (0..i)
                .filter(|_| next() % 4 == 0)
                .map(|j| format!("N{}", j))
                .collect();
            Task::new(format!("N{}", i), "layered").depending_on(deps)
        })
        .collect();
    tasks.reverse();
    tasks
}
