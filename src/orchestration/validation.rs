//! Issue validation as a convergence target.
//!
//! Validator units settle `UNVALIDATED` issues. Each verdict is written back
//! through the state store as soon as it arrives, so an interrupted run
//! resumes with only the issues that are still unvalidated.

use crate::agent::parse::extract_json;
use crate::agent::{AgentExecutor, HookSet, Role, RoleAgent, WorkRequest, WorkResponse};
use crate::core::{Issue, IssuePatch, IssueStatus};
use crate::error::{Error, Result};
use crate::orchestration::convergence::{
    run_convergence_rounds, ConvergenceReport, ConvergenceTarget, RoundConfig, RoundOutcome,
};
use crate::state::StateStore;
use crate::rlog_debug;
use async_trait::async_trait;
use serde::Serialize;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A validator's answer for one issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationVerdict {
    pub status: IssueStatus,
    pub reason: Option<String>,
}

/// Read a verdict out of raw validator text.
///
/// Accepts `status` or `verdict` for the status and `reason`, `note` or
/// `explanation` for the reasoning. Status matching is case-insensitive.
pub fn parse_verdict(raw: &str) -> Result<ValidationVerdict> {
    let value = extract_json(raw)
        .ok_or_else(|| Error::Parse("no JSON verdict in validator output".to_string()))?;
    let status = ["status", "verdict"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .ok_or_else(|| Error::Parse("verdict has no status".to_string()))?;
    let status = status.parse::<IssueStatus>().map_err(Error::Parse)?;
    let reason = ["reason", "note", "explanation"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(String::from);
    Ok(ValidationVerdict { status, reason })
}

/// Validator role agent using the plain JSON verdict protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatorAgent;

impl RoleAgent for ValidatorAgent {
    type Input = Issue;
    type Output = ValidationVerdict;

    fn role(&self) -> Role {
        Role::Validator
    }

    fn build_prompt(&self, request: &WorkRequest<Issue>) -> String {
        let issue = &request.input;
        format!(
            "Validate issue {id}: {title}\n\n\
             Inspect the code in {dir} and decide whether the issue is real.\n\
             Answer with JSON only: {{\"status\": \"CONFIRMED\" | \"FALSE\" | \"PARTIAL\" | \"MISDIAGNOSED\", \"reason\": \"...\"}}",
            id = issue.id,
            title = issue.title,
            dir = request.work_dir.display()
        )
    }

    fn parse_output(&self, raw: &str) -> Result<ValidationVerdict> {
        parse_verdict(raw)
    }
}

/// Unvalidated issues of one work directory.
pub struct IssueValidation<A> {
    store: Arc<dyn StateStore>,
    work_dir: PathBuf,
    _agent: PhantomData<fn() -> A>,
}

impl<A> IssueValidation<A> {
    pub fn new(store: Arc<dyn StateStore>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            work_dir: work_dir.into(),
            _agent: PhantomData,
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }
}

#[async_trait]
impl<A> ConvergenceTarget for IssueValidation<A>
where
    A: RoleAgent<Input = Issue, Output = ValidationVerdict>,
{
    type Agent = A;
    type Item = Issue;

    async fn unconverged(&self) -> Result<Vec<Issue>> {
        let issues = self.store.load_issues(&self.work_dir).await?;
        Ok(issues
            .into_iter()
            .filter(|issue| !issue.status.is_settled())
            .collect())
    }

    fn key(&self, item: &Issue) -> String {
        item.id.clone()
    }

    fn request_for(&self, item: &Issue) -> WorkRequest<Issue> {
        WorkRequest::new(Role::Validator, self.work_dir.clone(), item.clone())
            .with_metadata("issue_id", item.id.clone())
    }

    async fn record(
        &self,
        item: &Issue,
        response: &WorkResponse<ValidationVerdict>,
    ) -> Result<RoundOutcome> {
        let verdict = match (&response.output, response.failure) {
            (Some(verdict), _) => verdict,
            (None, Some(kind)) => return Ok(RoundOutcome::pending(format!("failed_{}", kind))),
            (None, None) => return Ok(RoundOutcome::pending("failed")),
        };
        if !verdict.status.is_settled() {
            rlog_debug!("validation: {} still undetermined", item.id);
            return Ok(RoundOutcome::pending(IssueStatus::Unvalidated.as_str()));
        }

        let mut patch = IssuePatch::status(verdict.status);
        if let Some(reason) = &verdict.reason {
            patch = patch.with_note(reason.clone());
        }
        self.store.update_issue(&self.work_dir, &item.id, &patch).await?;
        Ok(RoundOutcome::converged(verdict.status.as_str()))
    }
}

/// Validate every unvalidated issue under `work_dir`.
pub async fn validate_issues<A>(
    store: Arc<dyn StateStore>,
    work_dir: &Path,
    executor: Arc<AgentExecutor<A>>,
    hooks: &HookSet<Issue, ValidationVerdict>,
    config: &RoundConfig,
) -> Result<ConvergenceReport>
where
    A: RoleAgent<Input = Issue, Output = ValidationVerdict>,
{
    let target = IssueValidation::<A>::new(store, work_dir);
    run_convergence_rounds(&target, executor, hooks, config).await
}
