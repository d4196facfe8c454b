//! Fan-out scheduler: concurrency limits, ordering and fail-fast.

use remedy::agent::{FailureKind, HookSet};
use remedy::orchestration::{FanOutConfig, FanOutScheduler, Strategy, WorkUnit};

use crate::fixtures::{echo_executor, echo_request, EchoAgent, MockBackend};

fn units(backend: &std::sync::Arc<MockBackend>, prompts: &[&str]) -> Vec<WorkUnit<EchoAgent>> {
    let executor = echo_executor(backend, 0, 5_000);
    prompts
        .iter()
        .map(|p| (executor.clone(), echo_request(p)))
        .collect()
}

/// Test: Limited concurrency
/// Given 6 units with staggered durations and max_concurrent = 2
/// When they are executed
/// Then at most 2 are in flight and results keep submission order
#[tokio::test]
async fn test_limited_bounds_in_flight_and_keeps_order() {
    let backend = MockBackend::new();
    let prompts = [
        "sleep:60:u0",
        "sleep:10:u1",
        "sleep:50:u2",
        "sleep:5:u3",
        "sleep:40:u4",
        "sleep:1:u5",
    ];
    let aggregate = FanOutScheduler::new(FanOutConfig::limited(2))
        .execute_many(units(&backend, &prompts), &HookSet::new())
        .await;

    assert_eq!(backend.max_in_flight(), 2);
    assert_eq!(aggregate.success_count, 6);
    let outputs: Vec<&String> = aggregate.outputs().collect();
    assert_eq!(outputs, vec!["u0", "u1", "u2", "u3", "u4", "u5"]);
}

/// Test: All strategy dispatches everything at once
#[tokio::test]
async fn test_all_runs_every_unit_concurrently() {
    let backend = MockBackend::new();
    let prompts = ["sleep:80:a", "sleep:80:b", "sleep:80:c", "sleep:80:d", "sleep:80:e"];
    let aggregate = FanOutScheduler::new(FanOutConfig::default())
        .execute_many(units(&backend, &prompts), &HookSet::new())
        .await;

    assert_eq!(backend.max_in_flight(), 5);
    assert!(aggregate.all_succeeded());
}

/// Test: Wave behaves like all
#[tokio::test]
async fn test_wave_runs_every_unit_concurrently() {
    let backend = MockBackend::new();
    let config = FanOutConfig {
        strategy: Strategy::Wave,
        ..Default::default()
    };
    let aggregate = FanOutScheduler::new(config)
        .execute_many(units(&backend, &["sleep:60:a", "sleep:60:b", "sleep:60:c"]), &HookSet::new())
        .await;

    assert_eq!(backend.max_in_flight(), 3);
    assert_eq!(aggregate.responses.len(), 3);
}

/// Test: Fail-fast stops later batches
/// Given limited batches of 2 and a failure in the first batch
/// When fail_fast is set
/// Then no unit of the second batch is dispatched
#[tokio::test]
async fn test_fail_fast_never_dispatches_next_batch() {
    let backend = MockBackend::new();
    let prompts = ["ok0", "fail", "ok2", "ok3", "ok4"];
    let aggregate = FanOutScheduler::new(FanOutConfig::limited(2).with_fail_fast(true))
        .execute_many(units(&backend, &prompts), &HookSet::new())
        .await;

    assert_eq!(backend.calls(), 2);
    assert_eq!(backend.prompts().len(), 2);
    assert!(!backend.prompts().iter().any(|p| p.starts_with("ok2")));
    assert_eq!(aggregate.responses.len(), 2);
    assert_eq!(aggregate.success_count, 1);
    assert_eq!(aggregate.failure_count, 1);
    assert_eq!(aggregate.skipped, 3);
    assert!(aggregate.aborted);
}

/// Test: Without fail-fast every batch runs
#[tokio::test]
async fn test_failures_without_fail_fast() {
    let backend = MockBackend::new();
    let prompts = ["ok0", "fail", "ok2", "ok3", "ok4"];
    let aggregate = FanOutScheduler::new(FanOutConfig::limited(2))
        .execute_many(units(&backend, &prompts), &HookSet::new())
        .await;

    assert_eq!(backend.calls(), 5);
    assert_eq!(aggregate.failure_count, 1);
    assert_eq!(aggregate.responses[1].failure, Some(FailureKind::Transport));
    assert!(!aggregate.aborted);
}

/// Test: Fail-fast with a clean last batch has nothing to skip
#[tokio::test]
async fn test_fail_fast_in_last_batch() {
    let backend = MockBackend::new();
    let aggregate = FanOutScheduler::new(FanOutConfig::limited(2).with_fail_fast(true))
        .execute_many(units(&backend, &["ok0", "ok1", "fail"]), &HookSet::new())
        .await;

    assert_eq!(backend.calls(), 3);
    assert_eq!(aggregate.skipped, 0);
    assert!(!aggregate.aborted);
}

/// Test: Aggregate metrics
/// Then units and retries are summed and duration is the slowest unit
#[tokio::test]
async fn test_aggregate_metrics() {
    let backend = MockBackend::new();
    let executor = echo_executor(&backend, 2, 5_000);
    let units = vec![
        (executor.clone(), echo_request("sleep:120:slow")),
        (executor.clone(), echo_request("flaky:2:fast")),
        (executor.clone(), echo_request("quick")),
    ];
    let aggregate = FanOutScheduler::default()
        .execute_many(units, &HookSet::new())
        .await;

    assert_eq!(aggregate.success_count, 3);
    assert_eq!(aggregate.input_units, 300);
    assert_eq!(aggregate.output_units, 60);
    assert_eq!(aggregate.retries, 2);
    let slowest = aggregate.responses[0].metrics.duration_ms;
    assert!(slowest >= 120);
    assert_eq!(aggregate.duration_ms, slowest);
}

/// Test: Batch deadline
/// Given a unit that never answers and a 50ms batch timeout
/// Then it is reported as a timeout while its batch mates succeed
#[tokio::test]
async fn test_batch_timeout() {
    let backend = MockBackend::new();
    let aggregate = FanOutScheduler::new(FanOutConfig::default().with_batch_timeout_ms(50))
        .execute_many(units(&backend, &["fine", "hang"]), &HookSet::new())
        .await;

    assert!(aggregate.responses[0].success);
    assert_eq!(aggregate.responses[1].failure, Some(FailureKind::Timeout));
    assert_eq!(aggregate.failure_count, 1);
}

/// Test: A panicking unit becomes a transport failure
#[tokio::test]
async fn test_panicking_unit_is_contained() {
    let backend = MockBackend::new();
    let aggregate = FanOutScheduler::default()
        .execute_many(units(&backend, &["panic", "fine"]), &HookSet::new())
        .await;

    assert_eq!(aggregate.responses.len(), 2);
    assert_eq!(aggregate.responses[0].failure, Some(FailureKind::Transport));
    assert!(aggregate.responses[1].success);
}

/// Test: Empty input
#[tokio::test]
async fn test_empty_fan_out() {
    let aggregate = FanOutScheduler::new(FanOutConfig::limited(3))
        .execute_many::<EchoAgent>(Vec::new(), &HookSet::new())
        .await;
    assert!(aggregate.responses.is_empty());
    assert!(aggregate.all_succeeded());
    assert_eq!(aggregate.duration_ms, 0);
}
