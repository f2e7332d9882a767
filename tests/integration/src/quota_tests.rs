//! Guest quota under concurrency

use crate::{shared_secret_config, user_request, TestGateway};
use futures::future::join_all;
use gateway_core::CallerContext;
use gateway_facade::AccessError;
use gateway_security::{QuotaConfig, QuotaTracker};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

#[test]
fn test_parallel_consumers_get_exactly_the_limit() {
    let tracker = QuotaTracker::new(QuotaConfig::default());
    let guest = CallerContext::guest("guest-threads");
    let admitted = AtomicU32::new(0);
    let rejected = AtomicU32::new(0);

    std::thread::scope(|scope| {
        for _ in 0..16 {
            scope.spawn(|| {
                for _ in 0..4 {
                    match tracker.check_and_consume(&guest) {
                        Ok(_) => admitted.fetch_add(1, Ordering::SeqCst),
                        Err(_) => rejected.fetch_add(1, Ordering::SeqCst),
                    };
                }
            });
        }
    });

    assert_eq!(admitted.load(Ordering::SeqCst), 5);
    assert_eq!(rejected.load(Ordering::SeqCst), 59);
    assert_eq!(tracker.usage("guest-threads").unwrap().used, 5);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_guest_messages_admit_exactly_five() {
    let harness = TestGateway::new();
    harness.completion.set_delay(Duration::from_millis(50));
    let guest = CallerContext::guest("guest-burst");

    let results = join_all(
        (0..20).map(|i| harness.gateway.call_completion(&guest, user_request(&format!("message {i}")))),
    )
    .await;

    let ok = results.iter().filter(|r| r.is_ok()).count();
    let exceeded = results
        .iter()
        .filter(|r| matches!(r, Err(AccessError::QuotaExceeded { used: 5, limit: 5 })))
        .count();
    assert_eq!(ok, 5);
    assert_eq!(exceeded, 15);
    assert_eq!(harness.completion.calls(), 5);
    assert!(harness
        .rendered_metrics()
        .contains("gateway_quota_rejections_total 15"));
}

#[tokio::test(start_paused = true)]
async fn test_failed_messages_are_refunded_under_contention() {
    let harness = TestGateway::new();
    harness.completion.fail_next(2);
    let guest = CallerContext::guest("guest-refund");

    let results = join_all((0..5).map(|_| harness.gateway.call_completion(&guest, user_request("hi")))).await;
    assert_eq!(results.iter().filter(|r| r.is_err()).count(), 2);
    assert_eq!(harness.gateway.quota().usage("guest-refund").unwrap().used, 3);

    // The refunded messages can be sent again, and no more
    for _ in 0..2 {
        harness
            .gateway
            .call_completion(&guest, user_request("again"))
            .await
            .unwrap();
    }
    let err = harness
        .gateway
        .call_completion(&guest, user_request("one too many"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 429);
}

#[tokio::test]
async fn test_sessions_are_counted_separately() {
    let harness = TestGateway::new();
    let first = CallerContext::guest("guest-a");
    let second = CallerContext::guest("guest-b");

    for _ in 0..5 {
        harness.gateway.call_completion(&first, user_request("hi")).await.unwrap();
    }
    assert!(matches!(
        harness.gateway.call_completion(&first, user_request("hi")).await,
        Err(AccessError::QuotaExceeded { .. })
    ));
    harness.gateway.call_completion(&second, user_request("hi")).await.unwrap();

    // Signed-in callers are never counted
    let user = CallerContext::authenticated("user-1", "guest-a", chrono::Utc::now(), None);
    for _ in 0..10 {
        harness.gateway.call_completion(&user, user_request("hi")).await.unwrap();
    }
    assert_eq!(harness.gateway.quota().tracked_sessions(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_quota_window_restarts() {
    let mut config = shared_secret_config();
    config.quota.guest_message_limit = 2;
    config.quota.window = Some(Duration::from_secs(3600));
    let harness = TestGateway::with_config(config);
    let guest = CallerContext::guest("guest-window");

    for _ in 0..2 {
        harness.gateway.call_completion(&guest, user_request("hi")).await.unwrap();
    }
    assert!(harness.gateway.call_completion(&guest, user_request("hi")).await.is_err());
    let usage = harness.gateway.quota().usage("guest-window").unwrap();
    assert_eq!(usage.resets_in, Some(Duration::from_secs(3600)));

    tokio::time::advance(Duration::from_secs(3600)).await;
    harness.gateway.call_completion(&guest, user_request("hi")).await.unwrap();
    assert_eq!(harness.gateway.quota().usage("guest-window").unwrap().used, 1);
}
