//! Fan-out scheduler for running many units concurrently.
//!
//! Units are split into batches according to the strategy; every unit in a
//! batch is spawned at once and the batch is awaited in full before the next
//! one starts. Results always come back in submission order.

use crate::agent::{AgentExecutor, FailureKind, HookSet, Metrics, RoleAgent, WorkRequest, WorkResponse};
use crate::{rlog, rlog_error, rlog_warn};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Batch size for `Limited` when `max_concurrent` is unset.
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// How units are grouped into batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Every unit at once.
    #[default]
    All,
    /// Every unit at once; kept distinct for configuration compatibility.
    Wave,
    /// Sequential batches of `max_concurrent` units.
    Limited,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::All => write!(f, "all"),
            Strategy::Wave => write!(f, "wave"),
            Strategy::Limited => write!(f, "limited"),
        }
    }
}

/// Fan-out configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FanOutConfig {
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub max_concurrent: Option<usize>,
    /// Stop launching batches after one that contained a failure.
    #[serde(default)]
    pub fail_fast: bool,
    /// Deadline for each batch; stragglers are reported as timeouts.
    #[serde(default)]
    pub batch_timeout_ms: Option<u64>,
}

impl FanOutConfig {
    pub fn limited(max_concurrent: usize) -> Self {
        Self {
            strategy: Strategy::Limited,
            max_concurrent: Some(max_concurrent),
            ..Default::default()
        }
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_batch_timeout_ms(mut self, batch_timeout_ms: u64) -> Self {
        self.batch_timeout_ms = Some(batch_timeout_ms);
        self
    }

    /// Units per batch for `total` units.
    pub fn batch_size(&self, total: usize) -> usize {
        match self.strategy {
            Strategy::All | Strategy::Wave => total.max(1),
            Strategy::Limited => self.max_concurrent.unwrap_or(DEFAULT_MAX_CONCURRENT).max(1),
        }
    }
}

/// One unit: the executor to run it and its request.
pub type WorkUnit<A> = (Arc<AgentExecutor<A>>, WorkRequest<<A as RoleAgent>::Input>);

/// Outcome of a fan-out.
#[derive(Debug, Clone)]
pub struct AggregateResult<O> {
    /// Responses of every dispatched unit, in submission order. Units skipped
    /// by fail-fast are absent; they are always a suffix of the input.
    pub responses: Vec<WorkResponse<O>>,
    pub success_count: usize,
    pub failure_count: usize,
    pub input_units: u64,
    pub output_units: u64,
    pub retries: u64,
    /// Slowest unit's duration, not the sum.
    pub duration_ms: u64,
    /// Units never dispatched because fail-fast stopped the run.
    pub skipped: usize,
    pub aborted: bool,
}

impl<O> AggregateResult<O> {
    fn from_responses(responses: Vec<WorkResponse<O>>, skipped: usize) -> Self {
        let success_count = responses.iter().filter(|r| r.success).count();
        Self {
            success_count,
            failure_count: responses.len() - success_count,
            input_units: responses.iter().map(|r| r.metrics.input_units).sum(),
            output_units: responses.iter().map(|r| r.metrics.output_units).sum(),
            retries: responses.iter().map(|r| u64::from(r.metrics.retries)).sum(),
            duration_ms: responses
                .iter()
                .map(|r| r.metrics.duration_ms)
                .max()
                .unwrap_or(0),
            skipped,
            aborted: skipped > 0,
            responses,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.failure_count == 0 && self.skipped == 0
    }

    /// Parsed outputs of successful units, in submission order.
    pub fn outputs(&self) -> impl Iterator<Item = &O> {
        self.responses.iter().filter_map(|r| r.output.as_ref())
    }
}

/// Runs batches of units under a `FanOutConfig`.
#[derive(Debug, Clone, Default)]
pub struct FanOutScheduler {
    config: FanOutConfig,
}

impl FanOutScheduler {
    pub fn new(config: FanOutConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FanOutConfig {
        &self.config
    }

    /// Run every unit and aggregate the responses.
    pub async fn execute_many<A: RoleAgent>(
        &self,
        units: Vec<WorkUnit<A>>,
        hooks: &HookSet<A::Input, A::Output>,
    ) -> AggregateResult<A::Output> {
        let total = units.len();
        let batch_size = self.config.batch_size(total);
        let batch_timeout = self.config.batch_timeout_ms.map(Duration::from_millis);
        rlog!(
            "fan-out: {} units, strategy={}, batch size {}",
            total,
            self.config.strategy,
            batch_size
        );

        let mut results: Vec<(usize, WorkResponse<A::Output>)> = Vec::with_capacity(total);
        let mut pending = units.into_iter().enumerate().peekable();
        let mut batch_number = 0;

        while pending.peek().is_some() {
            batch_number += 1;
            let batch: Vec<_> = pending.by_ref().take(batch_size).collect();
            let mut batch_failed = false;

            let mut in_flight: FuturesUnordered<_> = batch
                .into_iter()
                .map(|(index, (executor, request))| {
                    let backend_id = request
                        .backend_override
                        .clone()
                        .unwrap_or_else(|| executor.config().backend.clone());
                    let hooks = hooks.clone();
                    let handle = tokio::spawn(async move {
                        match batch_timeout {
                            Some(limit) => tokio::time::timeout(limit, executor.execute(request, &hooks))
                                .await
                                .unwrap_or_else(|_| {
                                    WorkResponse::failed(
                                        FailureKind::Timeout,
                                        format!("batch deadline of {}ms passed", limit.as_millis()),
                                        Metrics::empty(&backend_id, limit.as_millis() as u64, 0),
                                    )
                                }),
                            None => executor.execute(request, &hooks).await,
                        }
                    });
                    async move { (index, handle.await) }
                })
                .collect();

            while let Some((index, joined)) = in_flight.next().await {
                let response = joined.unwrap_or_else(|e| {
                    rlog_error!("fan-out: unit {} did not complete: {}", index, e);
                    WorkResponse::failed(
                        FailureKind::Transport,
                        format!("unit task failed: {}", e),
                        Metrics::default(),
                    )
                });
                batch_failed |= !response.success;
                results.push((index, response));
            }

            if batch_failed && self.config.fail_fast && pending.peek().is_some() {
                let skipped = pending.count();
                rlog_warn!(
                    "fan-out: batch {} had failures, fail-fast skips {} remaining units",
                    batch_number,
                    skipped
                );
                results.sort_by_key(|(index, _)| *index);
                return AggregateResult::from_responses(
                    results.into_iter().map(|(_, r)| r).collect(),
                    skipped,
                );
            }
        }

        results.sort_by_key(|(index, _)| *index);
        let aggregate =
            AggregateResult::from_responses(results.into_iter().map(|(_, r)| r).collect(), 0);
        rlog!(
            "fan-out: {} succeeded, {} failed",
            aggregate.success_count,
            aggregate.failure_count
        );
        aggregate
    }
}
