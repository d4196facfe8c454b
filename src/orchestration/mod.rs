//! Running many units: fan-out batches and convergence rounds.
//!
//! `FanOutScheduler` dispatches a list of units under a batching strategy and
//! aggregates their metrics. `run_convergence_rounds` repeats fan-outs over
//! persisted state until every item has a valid result or the retry budget
//! runs out; issue validation is its main user.

pub mod convergence;
pub mod fan_out;
pub mod validation;

pub use convergence::{
    run_convergence_rounds, ConvergenceReport, ConvergenceTarget, RoundConfig, RoundOutcome,
    RoundSummary,
};
pub use fan_out::{AggregateResult, FanOutConfig, FanOutScheduler, Strategy, WorkUnit};
pub use validation::{
    parse_verdict, validate_issues, IssueValidation, ValidationVerdict, ValidatorAgent,
};
