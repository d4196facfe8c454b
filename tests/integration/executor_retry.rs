//! Single-unit executor: retries, timeouts, availability and hooks.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use remedy::agent::{AgentExecutor, FailureKind, HookSet, Role, WorkRequest, WorkResponse};

use crate::fixtures::{echo_executor, echo_request, EchoAgent, MockBackend, MOCK_BACKEND};

/// Test: Exhausted retries
/// Given a unit that always fails at transport level and max_retries = n
/// When it is executed
/// Then it is attempted n + 1 times and reports retries = n
#[tokio::test]
async fn test_always_failing_unit_is_attempted_n_plus_one_times() {
    for n in 0..=3 {
        let backend = MockBackend::new();
        let response = echo_executor(&backend, n, 5_000)
            .execute(echo_request("fail"), &HookSet::new())
            .await;

        assert!(!response.success);
        assert_eq!(response.failure, Some(FailureKind::Transport));
        assert_eq!(response.metrics.retries, n);
        assert_eq!(backend.calls(), n + 1, "max_retries = {}", n);
        assert_eq!(response.error.as_deref(), Some("Backend error: connection reset"));
    }
}

/// Test: Recovery after transient failures
/// Given a unit that fails k times and then succeeds, with k < n + 1
/// When it is executed with max_retries = n
/// Then it succeeds and reports retries = k
#[tokio::test]
async fn test_transient_failures_then_success() {
    let n = 3;
    for k in 0..=n {
        let backend = MockBackend::new();
        let prompt = format!("flaky:{}:done", k);
        let response = echo_executor(&backend, n, 5_000)
            .execute(echo_request(&prompt), &HookSet::new())
            .await;

        assert!(response.success, "k = {}", k);
        assert_eq!(response.output.as_deref(), Some("done"));
        assert_eq!(response.metrics.retries, k);
        assert_eq!(backend.calls(), k + 1);
    }
}

/// Test: Unbounded retry setting
/// Given max_retries at its largest value and a unit that recovers
/// Then the attempt budget does not overflow and the unit succeeds
#[tokio::test]
async fn test_max_retry_setting_does_not_overflow() {
    let backend = MockBackend::new();
    let response = echo_executor(&backend, u32::MAX, 5_000)
        .execute(echo_request("flaky:2:done"), &HookSet::new())
        .await;
    assert!(response.success);
    assert_eq!(response.metrics.retries, 2);
    assert_eq!(backend.calls(), 3);
}

/// Test: Unsuccessful raw results are retried like transport errors
#[tokio::test]
async fn test_refused_result_is_retried() {
    let backend = MockBackend::new();
    let response = echo_executor(&backend, 2, 5_000)
        .execute(echo_request("refuse"), &HookSet::new())
        .await;
    assert_eq!(response.failure, Some(FailureKind::Transport));
    assert_eq!(response.error.as_deref(), Some("backend refused"));
    assert_eq!(backend.calls(), 3);
}

/// Test: Timeout is terminal
/// Given a backend that never answers and generous max_retries
/// When the attempt outlives its timeout
/// Then no further attempt is made
#[tokio::test]
async fn test_timeout_is_never_retried() {
    let backend = MockBackend::new();
    let started = Instant::now();
    let response = echo_executor(&backend, 5, 50)
        .execute(echo_request("hang"), &HookSet::new())
        .await;

    assert!(response.is_timeout());
    assert_eq!(response.metrics.retries, 0);
    assert_eq!(backend.calls(), 1);
    assert!(started.elapsed() < Duration::from_secs(5));
}

/// Test: Timeout after transport retries keeps the retry count
#[tokio::test]
async fn test_timeout_after_retries() {
    let backend = MockBackend::new();
    let response = echo_executor(&backend, 5, 50)
        .execute(echo_request("flaky:2:hang"), &HookSet::new())
        .await;

    assert_eq!(response.failure, Some(FailureKind::Timeout));
    assert_eq!(response.metrics.retries, 2);
    assert_eq!(backend.calls(), 3);
}

/// Test: Parse failures surface once with the raw text attached
#[tokio::test]
async fn test_parse_failure_reported_once() {
    let backend = MockBackend::new();
    let response = echo_executor(&backend, 3, 5_000)
        .execute(echo_request("garbage output"), &HookSet::new())
        .await;

    assert_eq!(response.failure, Some(FailureKind::Parse));
    assert_eq!(response.raw_output.as_deref(), Some("garbage output"));
    assert_eq!(response.metrics.input_units, 0);
    assert_eq!(response.metrics.backend_id, MOCK_BACKEND);
    assert_eq!(backend.calls(), 1);
}

/// Test: Unavailable backend
/// Given a registered backend that reports itself unavailable
/// Then the unit fails as not available without any call
#[tokio::test]
async fn test_unavailable_backend() {
    let backend = MockBackend::unavailable();
    let response = echo_executor(&backend, 3, 5_000)
        .execute(echo_request("hello"), &HookSet::new())
        .await;

    assert_eq!(response.failure, Some(FailureKind::NotAvailable));
    assert_eq!(response.metrics.retries, 0);
    assert_eq!(backend.calls(), 0);
}

/// Test: Backend override picks a different registry entry
#[tokio::test]
async fn test_backend_override_resolution() {
    let backend = MockBackend::new();
    let executor = AgentExecutor::new(EchoAgent, backend.registry())
        .with_config(Role::Investigator.default_config().with_backend("absent"));

    let missing = executor.execute(echo_request("hi"), &HookSet::new()).await;
    assert_eq!(missing.failure, Some(FailureKind::NotAvailable));
    assert_eq!(missing.metrics.backend_id, "absent");

    let found = executor
        .execute(echo_request("hi").with_backend(MOCK_BACKEND), &HookSet::new())
        .await;
    assert!(found.success);
    assert_eq!(found.metrics.backend_id, MOCK_BACKEND);
    assert_eq!(found.metrics.total_units, 120);
}

/// Test: Hook ordering and triggers
/// Given two before hooks, an after hook and an error hook
/// Then before hooks chain in registration order, after hooks see only
/// successes and error hooks see every failure with its kind
#[tokio::test]
async fn test_hooks() {
    let backend = MockBackend::new();
    let errors: Arc<Mutex<Vec<FailureKind>>> = Arc::new(Mutex::new(Vec::new()));
    let after_calls = Arc::new(AtomicU32::new(0));

    let recorded = errors.clone();
    let counted = after_calls.clone();
    let hooks = HookSet::new()
        .before(|mut req: WorkRequest<String>| {
            req.input = format!("{}-a", req.input);
            req
        })
        .before(|mut req: WorkRequest<String>| {
            req.input = format!("{}-b", req.input);
            req
        })
        .after(move |mut resp: WorkResponse<String>| {
            counted.fetch_add(1, Ordering::SeqCst);
            resp.output = resp.output.map(|o| o.to_uppercase());
            resp
        })
        .on_error(move |_req: &WorkRequest<String>, kind, _err: &str| {
            recorded.lock().unwrap().push(kind);
        });

    let executor = echo_executor(&backend, 1, 5_000);
    let ok = executor.execute(echo_request("x"), &hooks).await;
    assert_eq!(ok.output.as_deref(), Some("X-A-B"));
    assert_eq!(backend.prompts(), vec!["x-a-b".to_string()]);

    let failed = executor.execute(echo_request("garbage"), &hooks).await;
    assert!(!failed.success);

    assert_eq!(after_calls.load(Ordering::SeqCst), 1);
    assert_eq!(*errors.lock().unwrap(), vec![FailureKind::Parse]);
}

/// Test: Progress callbacks switch the executor to streaming calls
#[tokio::test]
async fn test_streaming_with_progress() {
    let backend = MockBackend::new();
    let progress: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = progress.clone();
    let executor = AgentExecutor::new(EchoAgent, backend.registry())
        .with_config(Role::Investigator.default_config().with_backend(MOCK_BACKEND))
        .with_progress(Arc::new(move |text: &str| sink.lock().unwrap().push(text.to_string())));

    let response = executor.execute(echo_request("streamed"), &HookSet::new()).await;
    assert!(response.success);
    assert_eq!(backend.streamed(), 1);
    assert_eq!(*progress.lock().unwrap(), vec!["streamed".to_string()]);
}
