//! Credential cache behaviour: single-flight refresh, expiry, stale serving

use crate::{shared_secret_config, ControlledSecretStore, TestGateway, COMPLETION_KEY_NAME, SPEECH_KEY_NAME};
use futures::future::join_all;
use gateway_config::SecretPolicySettings;
use gateway_core::{CallerContext, Dependency, PerDependency};
use gateway_facade::AccessError;
use gateway_resilience::{DependencyPolicy, ResilientInvoker, RetryPolicy};
use gateway_security::{CacheSource, CredentialCache, SecretPolicy};
use std::sync::Arc;
use std::time::Duration;

fn cache_over(store: Arc<ControlledSecretStore>, ttl: Duration) -> CredentialCache {
    let invoker = ResilientInvoker::new(PerDependency::from_fn(|_| DependencyPolicy {
        retry: RetryPolicy::no_retries(),
        ..Default::default()
    }));
    CredentialCache::new(
        Dependency::SecretStore,
        store,
        Arc::new(invoker),
        SecretPolicy::fail_closed(ttl),
    )
}

fn signed_in() -> CallerContext {
    CallerContext::authenticated("operator", "ops-session", chrono::Utc::now(), None)
}

#[tokio::test(start_paused = true)]
async fn test_fifty_concurrent_gets_fetch_once() {
    let store = ControlledSecretStore::with_defaults();
    store.set_delay(Duration::from_millis(100));
    let cache = cache_over(store.clone(), Duration::from_secs(300));
    let name = crate::secret(COMPLETION_KEY_NAME);

    let results = join_all((0..50).map(|_| cache.get(&name))).await;

    assert_eq!(store.fetches(), 1);
    let first = results[0].as_ref().unwrap();
    assert_eq!(first.expose(), b"sk-completion-1");
    assert!(results
        .iter()
        .all(|r| r.as_ref().is_ok_and(|c| c.same_material(first))));
    assert_eq!(cache.stats().refreshes, 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_descriptor_requests_fetch_once() {
    let harness = TestGateway::new();
    harness.secrets.set_delay(Duration::from_millis(100));
    let operator = signed_in();

    let descriptors = join_all(
        (0..50).map(|_| harness.gateway.fetch_secret(&operator, SPEECH_KEY_NAME)),
    )
    .await;

    assert_eq!(harness.secrets.fetches(), 1);
    let fingerprints: Vec<_> = descriptors
        .into_iter()
        .map(|d| d.unwrap().fingerprint)
        .collect();
    assert!(fingerprints.windows(2).all(|pair| pair[0] == pair[1]));
}

#[tokio::test(start_paused = true)]
async fn test_value_is_reused_until_expiry_then_refreshed_once() {
    let store = ControlledSecretStore::with_defaults();
    let cache = cache_over(store.clone(), Duration::from_secs(60));
    let name = crate::secret(COMPLETION_KEY_NAME);

    let first = cache.lookup(&name).await.unwrap();
    assert_eq!(first.source, CacheSource::Refreshed);
    assert_eq!(first.expires_at - first.fetched_at, Duration::from_secs(60));

    tokio::time::advance(Duration::from_secs(59)).await;
    let second = cache.lookup(&name).await.unwrap();
    assert_eq!(second.source, CacheSource::Hit);
    assert_eq!(second.credential.expose(), first.credential.expose());
    assert_eq!(store.fetches(), 1);
    assert_eq!(cache.age(&name), Some(Duration::from_secs(59)));

    // Rotated upstream; picked up only once the cached copy expires
    store.insert(COMPLETION_KEY_NAME, "sk-completion-2");
    tokio::time::advance(Duration::from_secs(1)).await;
    let refreshed = join_all((0..10).map(|_| cache.lookup(&name))).await;
    assert_eq!(store.fetches(), 2);
    for lookup in refreshed {
        assert_eq!(lookup.unwrap().credential.expose(), b"sk-completion-2");
    }

    assert_eq!(cache.stats().refreshes, 2);
}

#[tokio::test(start_paused = true)]
async fn test_stale_copy_served_within_grace_only() {
    let mut config = shared_secret_config();
    config.secrets.policies.insert(
        COMPLETION_KEY_NAME.to_string(),
        SecretPolicySettings {
            ttl: Some(Duration::from_secs(60)),
            stale_grace: Some(Duration::from_secs(120)),
        },
    );
    config.secrets.default_ttl = Duration::from_secs(60);
    let harness = TestGateway::with_config(config);
    let operator = signed_in();

    let fresh = harness
        .gateway
        .fetch_secret(&operator, COMPLETION_KEY_NAME)
        .await
        .unwrap();
    harness
        .gateway
        .fetch_secret(&operator, SPEECH_KEY_NAME)
        .await
        .unwrap();
    assert_eq!(fresh.source, "refresh");

    harness.secrets.set_unreachable(true);
    tokio::time::advance(Duration::from_secs(90)).await;

    let stale = harness
        .gateway
        .fetch_secret(&operator, COMPLETION_KEY_NAME)
        .await
        .unwrap();
    assert_eq!(stale.source, "stale_served");
    assert_eq!(stale.fingerprint, fresh.fingerprint);

    // No grace configured: fails closed
    let err = harness
        .gateway
        .fetch_secret(&operator, SPEECH_KEY_NAME)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AccessError::DependencyUnavailable {
            dependency: "secret-store",
            ..
        }
    ));

    tokio::time::advance(Duration::from_secs(90)).await;
    assert!(harness
        .gateway
        .fetch_secret(&operator, COMPLETION_KEY_NAME)
        .await
        .is_err());

    let metrics = harness.rendered_metrics();
    assert!(metrics.contains(r#"gateway_secret_cache_total{result="stale_served"} 1"#));
}

#[tokio::test(start_paused = true)]
async fn test_deleted_secret_is_never_served_stale() {
    let store = ControlledSecretStore::with_defaults();
    let invoker = ResilientInvoker::new(PerDependency::from_fn(|_| DependencyPolicy {
        retry: RetryPolicy::no_retries(),
        ..Default::default()
    }));
    let name = crate::secret(COMPLETION_KEY_NAME);
    let cache = CredentialCache::new(
        Dependency::SecretStore,
        store.clone(),
        Arc::new(invoker),
        SecretPolicy::fail_closed(Duration::from_secs(60)),
    )
    .with_policy(
        name.clone(),
        SecretPolicy::fail_closed(Duration::from_secs(60)).with_stale_grace(Duration::from_secs(600)),
    );

    cache.get(&name).await.unwrap();
    assert!(store.remove(COMPLETION_KEY_NAME));
    tokio::time::advance(Duration::from_secs(61)).await;

    assert!(cache.get(&name).await.is_err());
    assert_eq!(cache.age(&name), None);
}

#[tokio::test]
async fn test_guest_cannot_inspect_secrets() {
    let harness = TestGateway::new();
    let err = harness
        .gateway
        .fetch_secret(&CallerContext::guest("guest-1"), COMPLETION_KEY_NAME)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 401);
    assert_eq!(harness.secrets.fetches(), 0);
}
