//! Single-unit executor.
//!
//! `AgentExecutor` runs one work request against a backend: before hooks,
//! availability check, then up to `max_retries + 1` attempts, each raced
//! against the role timeout. Every outcome, including failure, comes back as
//! a `WorkResponse`; nothing here returns `Err`.

use crate::agent::backend::{Backend, BackendOptions, BackendRegistry, ProgressFn, RawResult};
use crate::agent::hooks::HookSet;
use crate::agent::role::{ExecutionConfig, Role};
use crate::agent::unit::{FailureKind, Metrics, WorkRequest, WorkResponse};
use crate::error::Result;
use crate::{rlog_debug, rlog_trace, rlog_warn};
use std::path::Path;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Role-specific half of a unit: how to phrase the request for a backend and
/// how to read the answer back.
pub trait RoleAgent: Send + Sync + 'static {
    type Input: Clone + Send + Sync + 'static;
    type Output: Send + Sync + 'static;

    fn role(&self) -> Role;

    fn build_prompt(&self, request: &WorkRequest<Self::Input>) -> String;

    /// Parse raw backend text. Errors become parse-failure responses.
    fn parse_output(&self, raw: &str) -> Result<Self::Output>;
}

/// Runs work requests for one role agent.
pub struct AgentExecutor<A: RoleAgent> {
    agent: A,
    backends: BackendRegistry,
    config: ExecutionConfig,
    progress: Option<ProgressFn>,
}

impl<A: RoleAgent> AgentExecutor<A> {
    /// Executor using the role's default execution configuration.
    pub fn new(agent: A, backends: BackendRegistry) -> Self {
        let config = agent.role().default_config();
        Self {
            agent,
            backends,
            config,
            progress: None,
        }
    }

    pub fn with_config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }

    /// Stream backend progress through `progress` instead of a single call.
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn agent(&self) -> &A {
        &self.agent
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Execute one request.
    pub async fn execute(
        &self,
        request: WorkRequest<A::Input>,
        hooks: &HookSet<A::Input, A::Output>,
    ) -> WorkResponse<A::Output> {
        let started = Instant::now();
        let request = hooks.run_before(request);
        let backend_id = request
            .backend_override
            .clone()
            .unwrap_or_else(|| self.config.backend.clone());

        let backend = match self.backends.get(&backend_id) {
            Some(backend) => backend,
            None => {
                return self.fail(
                    &request,
                    hooks,
                    FailureKind::NotAvailable,
                    format!("backend {} is not registered", backend_id),
                    Metrics::empty(&backend_id, elapsed_ms(started), 0),
                );
            }
        };
        if !backend.is_available().await {
            return self.fail(
                &request,
                hooks,
                FailureKind::NotAvailable,
                format!("backend {} is not available", backend_id),
                Metrics::empty(&backend_id, elapsed_ms(started), 0),
            );
        }

        let prompt = self.agent.build_prompt(&request);
        let options = BackendOptions::for_role(request.role);
        let timeout = self.config.timeout();
        let max_attempts = self.config.max_retries.saturating_add(1);
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            rlog_debug!(
                "{} unit: attempt {}/{} on {}",
                request.role,
                attempts,
                max_attempts,
                backend_id
            );

            let cancel = CancellationToken::new();
            let call = self.call(
                backend.as_ref(),
                &prompt,
                &request.work_dir,
                &options,
                cancel.clone(),
            );
            let error = match tokio::time::timeout(timeout, call).await {
                Err(_) => {
                    // The race is lost: tell the backend to stop, stop waiting.
                    cancel.cancel();
                    return self.fail(
                        &request,
                        hooks,
                        FailureKind::Timeout,
                        format!("timed out after {}ms", self.config.timeout_ms),
                        Metrics::empty(&backend_id, elapsed_ms(started), attempts - 1),
                    );
                }
                Ok(Ok(raw)) if raw.success => {
                    return self.finish(&request, hooks, raw, &backend_id, started, attempts - 1);
                }
                Ok(Ok(raw)) => raw
                    .error
                    .unwrap_or_else(|| format!("{} reported failure", backend_id)),
                Ok(Err(e)) => e.to_string(),
            };

            if attempts >= max_attempts {
                return self.fail(
                    &request,
                    hooks,
                    FailureKind::Transport,
                    error,
                    Metrics::empty(&backend_id, elapsed_ms(started), attempts - 1),
                );
            }
            rlog_warn!(
                "{} unit: attempt {} failed ({}), retrying in {}ms",
                request.role,
                attempts,
                error,
                self.config.retry_delay_ms
            );
            tokio::time::sleep(self.config.retry_delay()).await;
        }
    }

    async fn call(
        &self,
        backend: &dyn Backend,
        prompt: &str,
        work_dir: &Path,
        options: &BackendOptions,
        cancel: CancellationToken,
    ) -> Result<RawResult> {
        match &self.progress {
            Some(progress) => {
                backend
                    .execute_streaming(prompt, work_dir, progress.clone(), options, cancel)
                    .await
            }
            None => backend.execute(prompt, work_dir, options, cancel).await,
        }
    }

    /// Parse a transport-level success. A parse failure is terminal and
    /// does not consume a retry.
    fn finish(
        &self,
        request: &WorkRequest<A::Input>,
        hooks: &HookSet<A::Input, A::Output>,
        raw: RawResult,
        backend_id: &str,
        started: Instant,
        retries: u32,
    ) -> WorkResponse<A::Output> {
        rlog_trace!("{} unit raw output: {}", request.role, raw.response_text);
        match self.agent.parse_output(&raw.response_text) {
            Ok(output) => {
                let metrics = Metrics {
                    input_units: raw.input_units,
                    output_units: raw.output_units,
                    total_units: raw.input_units + raw.output_units,
                    duration_ms: elapsed_ms(started),
                    retries,
                    backend_id: backend_id.to_string(),
                    cost_estimate: raw.cost_estimate,
                };
                hooks.run_after(WorkResponse::succeeded(output, metrics, raw.response_text))
            }
            Err(e) => self
                .fail(
                    request,
                    hooks,
                    FailureKind::Parse,
                    format!("parse failed: {}", e),
                    Metrics::empty(backend_id, elapsed_ms(started), retries),
                )
                .with_raw_output(raw.response_text),
        }
    }

    fn fail(
        &self,
        request: &WorkRequest<A::Input>,
        hooks: &HookSet<A::Input, A::Output>,
        kind: FailureKind,
        error: String,
        metrics: Metrics,
    ) -> WorkResponse<A::Output> {
        rlog_warn!("{} unit failed [{}]: {}", request.role, kind, error);
        hooks.run_on_error(request, kind, &error);
        WorkResponse::failed(kind, error, metrics)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
