//! End-to-end flows through the gateway façade

use crate::{signed_token, user_claims, user_request, TestGateway};
use gateway_core::{CallerContext, Dependency, IdentityClass};
use gateway_facade::AccessError;
use gateway_resilience::CircuitState;
use gateway_security::GuestAccess;
use std::time::Duration;

#[tokio::test]
async fn test_guest_conversation_until_quota() {
    let harness = TestGateway::new();
    let chat = harness.conversations();
    let guest = harness
        .gateway
        .validate_caller(None, &GuestAccess::permitted("browser-1"))
        .await
        .unwrap();
    assert!(guest.is_guest());

    for expected_remaining in (0..5).rev() {
        let reply = chat.send(&guest, "tell me a story").await.unwrap();
        assert_eq!(reply.remaining_guest_messages, Some(expected_remaining));
    }

    let err = chat.send(&guest, "one more?").await.unwrap_err();
    assert_eq!(err, AccessError::QuotaExceeded { used: 5, limit: 5 });
    assert_eq!(err.error_code(), "quota_exceeded");
    assert_eq!(harness.completion.calls(), 5);
    assert_eq!(chat.history(&guest).await.unwrap().len(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_completion_outage_opens_breaker_without_spending_quota() {
    let harness = TestGateway::new();
    let chat = harness.conversations();
    let guest = CallerContext::guest("browser-2");

    for _ in 0..2 {
        chat.send(&guest, "hello").await.unwrap();
    }

    harness.completion.set_failing(true);
    for _ in 0..5 {
        let err = chat.send(&guest, "are you there?").await.unwrap_err();
        assert!(err.is_degraded());
        assert!(!err.is_breaker_open());
    }
    assert_eq!(harness.completion.calls(), 7);
    assert_eq!(
        harness.gateway.breaker_state(Dependency::CompletionService),
        CircuitState::Open
    );

    // Rejected by the breaker without reaching the service
    let err = chat.send(&guest, "are you there?").await.unwrap_err();
    assert!(matches!(
        err,
        AccessError::DependencyUnavailable {
            dependency: "completion-service",
            breaker_open: true,
            ..
        }
    ));
    assert_eq!(err.status_code(), 503);
    assert_eq!(harness.completion.calls(), 7);

    // None of the failed turns were charged or recorded
    assert_eq!(harness.gateway.quota().usage("browser-2").unwrap().used, 2);
    assert_eq!(chat.history(&guest).await.unwrap().len(), 4);

    // Service back, reset timeout elapsed: the probe goes through
    harness.completion.set_failing(false);
    tokio::time::advance(Duration::from_secs(30)).await;
    let reply = chat.send(&guest, "hello again").await.unwrap();
    assert_eq!(reply.remaining_guest_messages, Some(2));
    assert_eq!(
        harness.gateway.breaker_state(Dependency::CompletionService),
        CircuitState::Closed
    );
}

#[tokio::test]
async fn test_signed_in_user_is_not_limited() {
    let harness = TestGateway::new();
    let chat = harness.conversations();
    let token = signed_token(None, &user_claims("user-42", "sess-42"));

    let user = harness
        .gateway
        .validate_caller(Some(&token), &GuestAccess::Denied)
        .await
        .unwrap();
    assert_eq!(user.identity_class(), IdentityClass::Authenticated);
    assert_eq!(user.identity_id(), Some("user-42"));
    assert_eq!(user.session_id(), "sess-42");

    for _ in 0..8 {
        let reply = chat.send(&user, "hi").await.unwrap();
        assert_eq!(reply.remaining_guest_messages, None);
    }
    assert!(harness.gateway.quota().usage("sess-42").is_none());
    // HMAC key fetched once, completion credential fetched once
    assert_eq!(harness.secrets.fetches(), 2);
}

#[tokio::test]
async fn test_invalid_token_falls_back_to_guest_only_where_permitted() {
    let harness = TestGateway::new();
    let mut token = signed_token(None, &user_claims("user-42", "sess-42"));
    token.push('x');

    let caller = harness
        .gateway
        .validate_caller(Some(&token), &GuestAccess::permitted("browser-3"))
        .await
        .unwrap();
    assert!(caller.is_guest());
    assert_eq!(caller.session_id(), "browser-3");

    let err = harness
        .gateway
        .validate_caller(Some(&token), &GuestAccess::Denied)
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::Unauthorized { .. }));
    assert!(harness
        .rendered_metrics()
        .contains(r#"gateway_access_denied_total{reason="unauthorized"} 1"#));
}

#[tokio::test]
async fn test_secret_store_outage_fails_token_validation_closed() {
    let harness = TestGateway::new();
    harness.secrets.set_unreachable(true);
    let token = signed_token(None, &user_claims("user-42", "sess-42"));

    // A presented token that cannot be checked is never downgraded to guest
    let err = harness
        .gateway
        .validate_caller(Some(&token), &GuestAccess::permitted("browser-4"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AccessError::DependencyUnavailable {
            dependency: "secret-store",
            ..
        }
    ));

    // Without a token no verification material is needed
    let guest = harness
        .gateway
        .validate_caller(None, &GuestAccess::permitted("browser-4"))
        .await
        .unwrap();
    assert!(guest.is_guest());
}

#[tokio::test]
async fn test_speech_uses_default_voice_and_degrades() {
    let harness = TestGateway::new();
    let user = CallerContext::authenticated("user-1", "sess-1", chrono::Utc::now(), None);

    let audio = harness
        .gateway
        .call_speech(&user, "Good morning", None)
        .await
        .unwrap();
    assert_eq!(&audio.audio[..], b"Good morning");
    harness
        .gateway
        .call_speech(&user, "Good night", Some("narrator_2"))
        .await
        .unwrap();
    assert_eq!(harness.speech.voices(), ["default", "narrator_2"]);

    harness.speech.set_failing(true);
    let err = harness
        .gateway
        .call_speech(&user, "Hello", None)
        .await
        .unwrap_err();
    assert!(err.is_degraded());
    assert!(matches!(
        err,
        AccessError::DependencyUnavailable {
            dependency: "speech-service",
            ..
        }
    ));

    let err = harness
        .gateway
        .call_speech(&user, "Hello", Some("not a voice"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn test_expired_context_is_refused() {
    let harness = TestGateway::new();
    let issued = chrono::Utc::now() - chrono::Duration::hours(2);
    let expired = CallerContext::authenticated(
        "user-1",
        "sess-1",
        issued,
        Some(issued + chrono::Duration::hours(1)),
    );

    let err = harness
        .gateway
        .call_completion(&expired, user_request("hi"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 401);
    assert_eq!(harness.completion.calls(), 0);
}
