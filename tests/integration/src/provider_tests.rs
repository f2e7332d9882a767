//! The gateway over its HTTP collaborators, against mock servers

use crate::{
    init_tracing, jwks_config, key_set_document, shared_secret_config, signed_token, user_claims,
    user_request, ControlledSecretStore, MockCompletionApi, MockIdentityProvider, MockSpeechApi,
};
use gateway_config::GatewayConfig;
use gateway_core::{CallerContext, Dependency};
use gateway_facade::{AccessError, Gateway, GatewayBuilder};
use gateway_security::GuestAccess;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

fn build(config: GatewayConfig, secrets: Arc<ControlledSecretStore>) -> Gateway {
    init_tracing();
    GatewayBuilder::new(config)
        .secret_source(secrets)
        .build()
        .expect("gateway builds")
}

fn signed_in() -> CallerContext {
    CallerContext::authenticated("user-7", "sess-7", chrono::Utc::now(), None)
}

#[tokio::test]
async fn test_full_flow_over_http() {
    let identity = MockIdentityProvider::start().await;
    identity.publish(key_set_document("k1"), 1).await;
    let completion = MockCompletionApi::start().await;
    completion.reply_for_key("sk-completion-1", "Hello from the model").await;
    let speech = MockSpeechApi::start().await;
    speech.reply_with_audio(b"ID3\x04audio").await;

    let mut config = jwks_config(identity.jwks_url());
    config.providers.completion.base_url = completion.uri();
    config.providers.speech.base_url = speech.uri();
    let gateway = build(config, ControlledSecretStore::with_defaults());

    let token = signed_token(Some("k1"), &user_claims("user-7", "sess-7"));
    let user = gateway
        .validate_caller(Some(&token), &GuestAccess::Denied)
        .await
        .unwrap();
    assert_eq!(user.identity_id(), Some("user-7"));

    // Key set is cached: the second validation does not refetch it
    gateway
        .validate_caller(Some(&token), &GuestAccess::Denied)
        .await
        .unwrap();

    let reply = gateway
        .call_completion(&user, user_request("Hi there"))
        .await
        .unwrap();
    assert_eq!(reply.text, "Hello from the model");
    assert_eq!(reply.usage.map(|u| u.completion_tokens), Some(12));

    let audio = gateway.call_speech(&user, "Hello", None).await.unwrap();
    assert_eq!(&audio.audio[..], b"ID3\x04audio");
    assert_eq!(audio.content_type, "audio/mpeg");
}

#[tokio::test]
async fn test_rotated_credential_is_picked_up_after_rejection() {
    let completion = MockCompletionApi::start().await;
    completion.reply_for_key("sk-completion-2", "rotated").await;
    completion.reject_others().await;

    let mut config = shared_secret_config();
    config.providers.completion.base_url = completion.uri();
    let secrets = ControlledSecretStore::with_defaults();
    let gateway = build(config, secrets.clone());

    // Cache the old key, then rotate it in the store
    for (_, warmed) in gateway.warm_credentials().await {
        warmed.unwrap();
    }
    secrets.insert(crate::COMPLETION_KEY_NAME, "sk-completion-2");

    let reply = gateway
        .call_completion(&signed_in(), user_request("Hi"))
        .await
        .unwrap();
    assert_eq!(reply.text, "rotated");
    assert_eq!(completion.call_count().await, 2);
    assert_eq!(
        gateway.breaker_state(Dependency::CompletionService),
        gateway_resilience::CircuitState::Closed
    );
}

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let completion = MockCompletionApi::start().await;
    completion.fail_with(503, 3).await;

    let mut config = shared_secret_config();
    config.providers.completion.base_url = completion.uri();
    let retry = &mut config.dependencies.completion_service.retry;
    retry.max_retries = 2;
    retry.base_delay = Duration::from_millis(1);
    retry.max_delay = Duration::from_millis(5);
    let gateway = build(config, ControlledSecretStore::with_defaults());

    let guest = CallerContext::guest("browser-9");
    let err = gateway
        .call_completion(&guest, user_request("Hi"))
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
    assert_eq!(completion.call_count().await, 3);
    assert_eq!(gateway.quota().usage("browser-9").unwrap().used, 0);
}

#[tokio::test]
async fn test_identity_provider_outage_denies_presented_tokens() {
    let identity = MockIdentityProvider::start().await;
    Mock::given(method("GET"))
        .and(path(MockIdentityProvider::JWKS_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&identity.server)
        .await;

    let gateway = build(
        jwks_config(identity.jwks_url()),
        ControlledSecretStore::with_defaults(),
    );
    let token = signed_token(Some("k1"), &user_claims("user-7", "sess-7"));

    let err = gateway
        .validate_caller(Some(&token), &GuestAccess::permitted("browser-5"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AccessError::DependencyUnavailable {
            dependency: "token-validator",
            ..
        }
    ));
}

#[tokio::test]
async fn test_unknown_key_id_is_unauthorized() {
    let identity = MockIdentityProvider::start().await;
    identity.publish(key_set_document("k1"), 1).await;
    let gateway = build(
        jwks_config(identity.jwks_url()),
        ControlledSecretStore::with_defaults(),
    );

    // Freshly fetched key set: an unknown kid does not trigger a refetch
    let token = signed_token(Some("k9"), &user_claims("user-7", "sess-7"));
    let err = gateway
        .validate_caller(Some(&token), &GuestAccess::Denied)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 401);
}
