//! Short-lived credential cache.
//!
//! Secrets are cached per logical name with a TTL. Misses and expired
//! entries are refreshed through the [`ResilientInvoker`], accounted to the
//! cache's dependency, and concurrent refreshes of one name share a single
//! upstream fetch. When a refresh fails, a secret whose policy grants a stale
//! grace period may be served past its TTL; all others fail closed.

use dashmap::DashMap;
use gateway_core::{Credential, Dependency, GatewayError, GatewayResult, SecretName, SecretSource};
use gateway_resilience::{ResilientInvoker, SingleFlight};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Caching policy of one secret
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecretPolicy {
    /// How long a fetched value is fresh
    pub ttl: Duration,
    /// How long past its TTL a value may be served while the source is
    /// failing. `None` fails closed.
    pub stale_grace: Option<Duration>,
}

impl SecretPolicy {
    /// Fail-closed policy with the given TTL
    #[must_use]
    pub fn fail_closed(ttl: Duration) -> Self {
        Self {
            ttl,
            stale_grace: None,
        }
    }

    /// Allow serving a stale value for `grace` past expiry
    #[must_use]
    pub fn with_stale_grace(mut self, grace: Duration) -> Self {
        self.stale_grace = Some(grace);
        self
    }
}

impl Default for SecretPolicy {
    fn default() -> Self {
        Self::fail_closed(Duration::from_secs(300))
    }
}

#[derive(Clone)]
struct CachedSecret {
    value: Credential,
    fetched_at: Instant,
    ttl: Duration,
}

impl CachedSecret {
    fn expires_at(&self) -> Instant {
        self.fetched_at + self.ttl
    }

    fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at()
    }

    fn within_grace(&self, now: Instant, grace: Duration) -> bool {
        now < self.expires_at() + grace
    }
}

/// How a lookup was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    /// Fresh cached value
    Hit,
    /// Fetched from the source during this lookup
    Refreshed,
    /// Expired value served under the stale grace policy
    Stale,
}

impl CacheSource {
    /// Metric label
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Refreshed => "refresh",
            Self::Stale => "stale_served",
        }
    }
}

/// A cached credential with its metadata
#[derive(Debug, Clone)]
pub struct CachedCredential {
    /// The material
    pub credential: Credential,
    /// When it was fetched
    pub fetched_at: Instant,
    /// When it stops being fresh
    pub expires_at: Instant,
    /// How the lookup was satisfied
    pub source: CacheSource,
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Cached entries
    pub entries: usize,
    /// Lookups served from a fresh entry
    pub hits: u64,
    /// Successful upstream fetches
    pub refreshes: u64,
    /// Lookups served from an expired entry
    pub stale_served: u64,
    /// Lookups that failed
    pub unavailable: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    refreshes: AtomicU64,
    stale_served: AtomicU64,
    unavailable: AtomicU64,
}

/// Credential cache over one secret source
pub struct CredentialCache {
    dependency: Dependency,
    source: Arc<dyn SecretSource>,
    invoker: Arc<ResilientInvoker>,
    entries: Arc<DashMap<SecretName, CachedSecret>>,
    inflight: SingleFlight<SecretName, CachedSecret>,
    default_policy: SecretPolicy,
    policies: HashMap<SecretName, SecretPolicy>,
    counters: Arc<Counters>,
}

impl CredentialCache {
    /// Create a cache whose fetches are accounted to `dependency`
    #[must_use]
    pub fn new(
        dependency: Dependency,
        source: Arc<dyn SecretSource>,
        invoker: Arc<ResilientInvoker>,
        default_policy: SecretPolicy,
    ) -> Self {
        Self {
            dependency,
            source,
            invoker,
            entries: Arc::new(DashMap::new()),
            inflight: SingleFlight::new(),
            default_policy,
            policies: HashMap::new(),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Override the policy of one secret
    #[must_use]
    pub fn with_policy(mut self, name: SecretName, policy: SecretPolicy) -> Self {
        self.policies.insert(name, policy);
        self
    }

    /// Dependency fetches are accounted to
    #[must_use]
    pub fn dependency(&self) -> Dependency {
        self.dependency
    }

    /// Policy in force for a secret
    #[must_use]
    pub fn policy_for(&self, name: &SecretName) -> SecretPolicy {
        self.policies.get(name).copied().unwrap_or(self.default_policy)
    }

    /// Get a secret, fetching it if missing or expired
    ///
    /// # Errors
    /// Returns `SecretUnavailable` when the secret cannot be fetched and no
    /// usable cached copy exists
    pub async fn get(&self, name: &SecretName) -> GatewayResult<Credential> {
        self.lookup(name).await.map(|cached| cached.credential)
    }

    /// Like [`Self::get`], with cache metadata
    ///
    /// # Errors
    /// Returns `SecretUnavailable` when the secret cannot be fetched and no
    /// usable cached copy exists
    pub async fn lookup(&self, name: &SecretName) -> GatewayResult<CachedCredential> {
        let policy = self.policy_for(name);

        if let Some(entry) = self.entries.get(name) {
            if entry.is_fresh(Instant::now()) {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!(secret = %name, dependency = %self.dependency, "Credential cache hit");
                return Ok(view(&entry, CacheSource::Hit));
            }
        }

        let fetched = self
            .inflight
            .run(name, || self.refresh(name.clone(), policy.ttl))
            .await;

        match fetched {
            Ok(entry) => Ok(view(&entry, CacheSource::Refreshed)),
            Err(error) => self.fallback(name, policy, error),
        }
    }

    /// Drop a cached secret, e.g. after the upstream rejected it
    pub fn invalidate(&self, name: &SecretName) -> bool {
        let removed = self.entries.remove(name).is_some();
        if removed {
            info!(secret = %name, dependency = %self.dependency, "Credential invalidated");
        }
        removed
    }

    /// Age of the cached entry, if any
    #[must_use]
    pub fn age(&self, name: &SecretName) -> Option<Duration> {
        self.entries
            .get(name)
            .map(|entry| Instant::now().saturating_duration_since(entry.fetched_at))
    }

    /// Cache counters
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            refreshes: self.counters.refreshes.load(Ordering::Relaxed),
            stale_served: self.counters.stale_served.load(Ordering::Relaxed),
            unavailable: self.counters.unavailable.load(Ordering::Relaxed),
        }
    }

    fn refresh(
        &self,
        name: SecretName,
        ttl: Duration,
    ) -> impl std::future::Future<Output = GatewayResult<CachedSecret>> + Send + 'static {
        let dependency = self.dependency;
        let source = self.source.clone();
        let invoker = self.invoker.clone();
        let entries = self.entries.clone();
        let counters = self.counters.clone();

        async move {
            // A refresh that finished while this one was queued already did the work
            if let Some(entry) = entries.get(&name) {
                if entry.is_fresh(Instant::now()) {
                    return Ok(entry.clone());
                }
            }

            let bytes = invoker
                .invoke(dependency, || source.fetch(&name))
                .await?;

            let entry = CachedSecret {
                value: Credential::new(bytes),
                fetched_at: Instant::now(),
                ttl,
            };
            entries.insert(name.clone(), entry.clone());
            counters.refreshes.fetch_add(1, Ordering::Relaxed);
            info!(
                secret = %name,
                dependency = %dependency,
                source = source.name(),
                ttl_secs = ttl.as_secs(),
                "Credential refreshed"
            );
            Ok(entry)
        }
    }

    fn fallback(
        &self,
        name: &SecretName,
        policy: SecretPolicy,
        error: GatewayError,
    ) -> GatewayResult<CachedCredential> {
        if matches!(error, GatewayError::NotFound { .. }) {
            // Deleted upstream: never serve the old value
            self.entries.remove(name);
        } else if let Some(grace) = policy.stale_grace {
            if let Some(entry) = self.entries.get(name) {
                if entry.within_grace(Instant::now(), grace) {
                    self.counters.stale_served.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        secret = %name,
                        dependency = %self.dependency,
                        error = %error,
                        "Serving stale credential"
                    );
                    return Ok(view(&entry, CacheSource::Stale));
                }
            }
        }

        self.counters.unavailable.fetch_add(1, Ordering::Relaxed);
        warn!(
            secret = %name,
            dependency = %self.dependency,
            error = %error,
            "Credential unavailable"
        );
        Err(GatewayError::SecretUnavailable {
            dependency: self.dependency,
            name: name.to_string(),
            cause: error.to_string(),
            breaker_open: error.is_breaker_open(),
        })
    }
}

fn view(entry: &CachedSecret, source: CacheSource) -> CachedCredential {
    CachedCredential {
        credential: entry.value.clone(),
        fetched_at: entry.fetched_at,
        expires_at: entry.expires_at(),
        source,
    }
}

impl std::fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCache")
            .field("dependency", &self.dependency)
            .field("source", &self.source.name())
            .field("entries", &self.entries.len())
            .field("default_policy", &self.default_policy)
            .finish_non_exhaustive()
    }
}
