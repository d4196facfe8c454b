//! Convergence rounds over persisted state.
//!
//! Each round re-reads the items that still lack a valid result, fans out one
//! unit per item and records every outcome. Only items that failed in the
//! previous round are retried, so an item that converged is never handed to
//! another unit.

use crate::agent::{AgentExecutor, HookSet, RoleAgent, WorkRequest, WorkResponse};
use crate::error::Result;
use crate::orchestration::fan_out::{FanOutConfig, FanOutScheduler, WorkUnit};
use crate::{rlog, rlog_debug, rlog_warn};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Category recorded for items fail-fast never dispatched.
pub const SKIPPED_CATEGORY: &str = "skipped";
/// Category recorded when persisting an outcome failed.
pub const RECORD_FAILED_CATEGORY: &str = "record_failed";

/// Whether one item converged, and how to count it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundOutcome {
    pub converged: bool,
    pub category: String,
}

impl RoundOutcome {
    pub fn converged(category: impl Into<String>) -> Self {
        Self {
            converged: true,
            category: category.into(),
        }
    }

    pub fn pending(category: impl Into<String>) -> Self {
        Self {
            converged: false,
            category: category.into(),
        }
    }
}

/// A set of persisted items that units drive towards a valid result.
#[async_trait]
pub trait ConvergenceTarget: Send + Sync {
    type Agent: RoleAgent;
    type Item: Send + Sync;

    /// Current snapshot of items without a valid result.
    async fn unconverged(&self) -> Result<Vec<Self::Item>>;

    /// Stable key used to track an item across rounds.
    fn key(&self, item: &Self::Item) -> String;

    fn request_for(&self, item: &Self::Item) -> WorkRequest<<Self::Agent as RoleAgent>::Input>;

    /// Persist a unit's response for `item` and classify it.
    async fn record(
        &self,
        item: &Self::Item,
        response: &WorkResponse<<Self::Agent as RoleAgent>::Output>,
    ) -> Result<RoundOutcome>;
}

/// Retry budget and per-round fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundConfig {
    /// Rounds after the first.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_round_delay_ms")]
    pub round_delay_ms: u64,
    #[serde(default)]
    pub fan_out: FanOutConfig,
}

fn default_max_retries() -> u32 {
    2
}

fn default_round_delay_ms() -> u64 {
    1000
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            round_delay_ms: default_round_delay_ms(),
            fan_out: FanOutConfig::default(),
        }
    }
}

impl RoundConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_round_delay_ms(mut self, round_delay_ms: u64) -> Self {
        self.round_delay_ms = round_delay_ms;
        self
    }

    pub fn with_fan_out(mut self, fan_out: FanOutConfig) -> Self {
        self.fan_out = fan_out;
        self
    }
}

/// Counts for one round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoundSummary {
    pub round: u32,
    pub attempted: usize,
    pub converged: usize,
    pub unconverged: usize,
    pub outcomes: BTreeMap<String, usize>,
}

/// Totals across all rounds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConvergenceReport {
    pub rounds: Vec<RoundSummary>,
    pub total_converged: usize,
    pub outcomes: BTreeMap<String, usize>,
    /// Items still unconverged according to state after the last round.
    pub unconverged: Vec<String>,
}

impl ConvergenceReport {
    pub fn rounds_run(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_converged(&self) -> bool {
        self.unconverged.is_empty()
    }
}

/// Run up to `max_retries + 1` rounds over `target`.
///
/// Round 1 covers every unconverged item. Later rounds cover the current
/// snapshot restricted to items that did not converge in the round before.
/// Stops early once nothing is left to retry.
///
/// # Errors
/// Only a failure to read the unconverged snapshot aborts the run; a failed
/// `record` is counted under `record_failed` and the item stays pending.
pub async fn run_convergence_rounds<T: ConvergenceTarget>(
    target: &T,
    executor: Arc<AgentExecutor<T::Agent>>,
    hooks: &HookSet<<T::Agent as RoleAgent>::Input, <T::Agent as RoleAgent>::Output>,
    config: &RoundConfig,
) -> Result<ConvergenceReport> {
    let scheduler = FanOutScheduler::new(config.fan_out.clone());
    let max_rounds = config.max_retries.saturating_add(1);
    let mut report = ConvergenceReport::default();
    let mut retry_keys: Option<HashSet<String>> = None;

    for round in 1..=max_rounds {
        if round > 1 && config.round_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(config.round_delay_ms)).await;
        }

        let mut items = target.unconverged().await?;
        if let Some(keys) = &retry_keys {
            items.retain(|item| keys.contains(&target.key(item)));
        }
        if items.is_empty() {
            rlog_debug!("convergence: nothing left before round {}", round);
            break;
        }
        rlog!("convergence: round {}/{} over {} items", round, max_rounds, items.len());

        let units: Vec<WorkUnit<T::Agent>> = items
            .iter()
            .map(|item| (executor.clone(), target.request_for(item)))
            .collect();
        let aggregate = scheduler.execute_many(units, hooks).await;

        let mut summary = RoundSummary {
            round,
            attempted: items.len(),
            ..Default::default()
        };
        let mut next_keys = HashSet::new();

        for (item, response) in items.iter().zip(aggregate.responses.iter()) {
            let outcome = match target.record(item, response).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    rlog_warn!("convergence: recording {} failed: {}", target.key(item), e);
                    RoundOutcome::pending(RECORD_FAILED_CATEGORY)
                }
            };
            *summary.outcomes.entry(outcome.category).or_default() += 1;
            if outcome.converged {
                summary.converged += 1;
            } else {
                next_keys.insert(target.key(item));
            }
        }
        for item in items.iter().skip(aggregate.responses.len()) {
            *summary.outcomes.entry(SKIPPED_CATEGORY.to_string()).or_default() += 1;
            next_keys.insert(target.key(item));
        }
        summary.unconverged = next_keys.len();

        rlog!(
            "convergence: round {} converged {}, {} pending",
            round,
            summary.converged,
            summary.unconverged
        );
        report.total_converged += summary.converged;
        for (category, count) in &summary.outcomes {
            *report.outcomes.entry(category.clone()).or_default() += count;
        }
        report.rounds.push(summary);

        if next_keys.is_empty() {
            break;
        }
        retry_keys = Some(next_keys);
    }

    let remaining = target.unconverged().await?;
    report.unconverged = remaining.iter().map(|item| target.key(item)).collect();
    if !report.unconverged.is_empty() {
        rlog_warn!(
            "convergence: {} items unconverged after {} rounds",
            report.unconverged.len(),
            report.rounds.len()
        );
    }
    Ok(report)
}
