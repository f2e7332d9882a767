//! Circuit breaker behaviour observed through the gateway and the invoker

use crate::{user_request, TestGateway};
use futures::future::join_all;
use gateway_core::{CallerContext, Dependency, GatewayError, PerDependency};
use gateway_facade::{AccessError, HealthStatus};
use gateway_resilience::{CircuitState, DependencyPolicy, ResilientInvoker, RetryPolicy};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

fn signed_in() -> CallerContext {
    CallerContext::authenticated("user-1", "session-1", chrono::Utc::now(), None)
}

fn invoker_without_retries() -> ResilientInvoker {
    ResilientInvoker::new(PerDependency::from_fn(|_| DependencyPolicy {
        retry: RetryPolicy::no_retries(),
        ..Default::default()
    }))
}

async fn trip_completion_breaker(harness: &TestGateway, caller: &CallerContext) {
    harness.completion.set_failing(true);
    for _ in 0..5 {
        let err = harness
            .gateway
            .call_completion(caller, user_request("hello"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AccessError::DependencyUnavailable {
                dependency: "completion-service",
                breaker_open: false,
                ..
            }
        ));
    }
}

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_at_threshold_and_stops_calling() {
    let harness = TestGateway::new();
    let gateway = &harness.gateway;
    let user = signed_in();

    trip_completion_breaker(&harness, &user).await;
    assert_eq!(harness.completion.calls(), 5);
    assert_eq!(gateway.breaker_state(Dependency::CompletionService), CircuitState::Open);

    for _ in 0..3 {
        let err = gateway
            .call_completion(&user, user_request("hello"))
            .await
            .unwrap_err();
        assert!(err.is_breaker_open());
    }
    assert_eq!(harness.completion.calls(), 5);

    // Still open one second short of the reset timeout
    tokio::time::advance(Duration::from_secs(29)).await;
    assert!(!gateway.would_admit(Dependency::CompletionService));
    let err = gateway
        .call_completion(&user, user_request("hello"))
        .await
        .unwrap_err();
    assert!(err.is_breaker_open());
    assert_eq!(harness.completion.calls(), 5);

    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(gateway.would_admit(Dependency::CompletionService));

    harness.completion.set_failing(false);
    gateway
        .call_completion(&user, user_request("hello"))
        .await
        .unwrap();
    assert_eq!(harness.completion.calls(), 6);
    assert_eq!(gateway.breaker_state(Dependency::CompletionService), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_open_breaker_degrades_health() {
    let harness = TestGateway::new();
    trip_completion_breaker(&harness, &signed_in()).await;

    let health = harness.gateway.health();
    assert_eq!(health.status, HealthStatus::Degraded);
    let completion = health.dependency(Dependency::CompletionService).unwrap();
    assert_eq!(completion.state, "open");
    assert_eq!(completion.consecutive_failures, 5);
    assert_eq!(completion.retry_in_ms, Some(30_000));

    // A fail-closed dependency going down makes the gateway unhealthy
    harness.gateway.force_open(Dependency::SecretStore);
    assert_eq!(harness.gateway.health().status, HealthStatus::Unhealthy);

    let metrics = harness.rendered_metrics();
    assert!(metrics.contains(r#"gateway_breaker_state{dependency="completion-service"} 1"#));
    assert!(metrics.contains(r#"gateway_breaker_state{dependency="secret-store"} 1"#));
}

#[tokio::test(start_paused = true)]
async fn test_failed_probe_reopens_with_longer_timeout() {
    let harness = TestGateway::new();
    let gateway = &harness.gateway;
    let user = signed_in();

    trip_completion_breaker(&harness, &user).await;
    tokio::time::advance(Duration::from_secs(30)).await;

    // Probe fails: open again, reset timeout doubled
    let err = gateway
        .call_completion(&user, user_request("hello"))
        .await
        .unwrap_err();
    assert!(!err.is_breaker_open());
    assert_eq!(harness.completion.calls(), 6);
    assert_eq!(gateway.breaker_state(Dependency::CompletionService), CircuitState::Open);
    let health = gateway.health();
    let completion = health.dependency(Dependency::CompletionService).unwrap();
    assert_eq!(completion.reset_timeout_ms, 60_000);
    assert_eq!(completion.retry_in_ms, Some(60_000));

    tokio::time::advance(Duration::from_secs(30)).await;
    assert!(gateway
        .call_completion(&user, user_request("hello"))
        .await
        .unwrap_err()
        .is_breaker_open());
    assert_eq!(harness.completion.calls(), 6);

    // Probe succeeds: closed, counters and timeout back to their defaults
    tokio::time::advance(Duration::from_secs(30)).await;
    harness.completion.set_failing(false);
    gateway
        .call_completion(&user, user_request("hello"))
        .await
        .unwrap();
    let health = gateway.health();
    let completion = health.dependency(Dependency::CompletionService).unwrap();
    assert_eq!(completion.state, "closed");
    assert_eq!(completion.consecutive_failures, 0);
    assert_eq!(completion.reset_timeout_ms, 30_000);
    assert_eq!(health.status, HealthStatus::Healthy);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_admits_exactly_one_probe() {
    const CALLERS: usize = 10;
    let invoker = invoker_without_retries();
    let breaker = invoker.breakers().get(Dependency::SpeechService);
    breaker.force_open();
    tokio::time::advance(breaker.config().reset_timeout).await;

    let calls = AtomicU32::new(0);
    let calls_ref = &calls;
    let attempts = (0..CALLERS).map(|_| {
        invoker.invoke(Dependency::SpeechService, move || async move {
            calls_ref.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, GatewayError>("audio")
        })
    });
    let results = join_all(attempts).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(GatewayError::BreakerOpen { .. })))
            .count(),
        CALLERS - 1
    );
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.snapshot().rejected_calls, (CALLERS - 1) as u64);
}

#[tokio::test(start_paused = true)]
async fn test_probe_failure_records_new_open_time() {
    let invoker = invoker_without_retries();
    let breaker = invoker.breakers().get(Dependency::CompletionService);

    for _ in 0..breaker.config().failure_threshold {
        let _ = invoker
            .invoke(Dependency::CompletionService, || async {
                Err::<(), _>(GatewayError::from_status(Dependency::CompletionService, 502, "bad gateway"))
            })
            .await;
    }
    let first = breaker.snapshot();
    assert_eq!(first.state, CircuitState::Open);

    tokio::time::advance(first.current_reset_timeout).await;
    let err = invoker
        .invoke(Dependency::CompletionService, || async {
            Err::<(), _>(GatewayError::from_status(Dependency::CompletionService, 502, "bad gateway"))
        })
        .await
        .unwrap_err();
    assert!(!err.is_breaker_open());

    let reopened = breaker.snapshot();
    assert_eq!(reopened.state, CircuitState::Open);
    assert!(reopened.opened_at > first.opened_at);
    assert!(!reopened.half_open_probe_in_flight);
    assert_eq!(reopened.current_reset_timeout, first.current_reset_timeout * 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_probe_counts_as_failure() {
    let invoker = invoker_without_retries();
    let breaker = invoker.breakers().get(Dependency::SpeechService);
    breaker.force_open();
    tokio::time::advance(breaker.config().reset_timeout).await;

    let probe = invoker.invoke(Dependency::SpeechService, || async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok::<_, GatewayError>(())
    });
    assert!(tokio::time::timeout(Duration::from_secs(1), probe).await.is_err());

    let snapshot = breaker.snapshot();
    assert_eq!(snapshot.state, CircuitState::Open);
    assert!(!snapshot.half_open_probe_in_flight);
}
