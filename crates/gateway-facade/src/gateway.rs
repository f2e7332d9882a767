//! The gateway façade.
//!
//! One `Gateway` is built at startup and shared (behind an `Arc`) by every
//! request handler. It owns all breaker, cache and quota state.

use crate::error::{AccessError, AccessResult};
use crate::health::{DependencyHealth, HealthReport};
use crate::observer::MetricsObserver;
use gateway_core::{
    CallerContext, CompletionRequest, CompletionResponse, CompletionService, Credential,
    Dependency, GatewayError, GatewayResult, SecretName, SpeechAudio, SpeechRequest,
    SpeechService,
};
use gateway_resilience::{CircuitState, ResilientInvoker};
use gateway_security::{
    CacheSource, CredentialCache, GuestAccess, PendingQuota, QuotaTracker, RequestValidator,
};
use gateway_telemetry::GatewayMetrics;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Bytes of the SHA-256 digest shown in a fingerprint
const FINGERPRINT_BYTES: usize = 8;

/// Façade-level settings resolved at build time
#[derive(Debug, Clone)]
pub struct FacadeSettings {
    /// Overall deadline of one operation
    pub request_deadline: Duration,
    /// Voice used when the caller does not choose one
    pub default_voice_id: String,
    /// Credential presented to the completion service
    pub completion_credential: SecretName,
    /// Credential presented to the speech service
    pub speech_credential: SecretName,
}

/// Metadata about a secret, never the secret itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretDescriptor {
    /// Logical name
    pub name: String,
    /// Hex prefix of the SHA-256 digest of the material
    pub fingerprint: String,
    /// Length of the material in bytes
    pub length: usize,
    /// Seconds since the material was fetched
    pub age_seconds: u64,
    /// Seconds until the cached copy expires; zero when serving stale
    pub expires_in_seconds: u64,
    /// How the lookup was satisfied
    pub source: &'static str,
}

/// Single entry point for outbound access
pub struct Gateway {
    pub(crate) invoker: Arc<ResilientInvoker>,
    pub(crate) observer: MetricsObserver,
    pub(crate) secrets: Arc<CredentialCache>,
    pub(crate) validator: RequestValidator,
    pub(crate) quota: QuotaTracker,
    pub(crate) completion: Arc<dyn CompletionService>,
    pub(crate) speech: Arc<dyn SpeechService>,
    pub(crate) metrics: GatewayMetrics,
    pub(crate) settings: FacadeSettings,
    pub(crate) started_at: Instant,
}

impl Gateway {
    /// Classify the caller of an inbound request
    ///
    /// # Errors
    /// `Unauthorized` for a missing or bad token where guests are denied;
    /// `DependencyUnavailable` when verification material cannot be obtained
    pub async fn validate_caller(
        &self,
        raw_token: Option<&str>,
        guest: &GuestAccess,
    ) -> AccessResult<CallerContext> {
        let result = self
            .with_deadline(Dependency::TokenValidator, async {
                self.validator
                    .authorize(raw_token, guest)
                    .await
                    .map_err(GatewayError::from)
            })
            .await;
        self.finish(result)
    }

    /// Describe a secret without revealing it. Authenticated callers only.
    ///
    /// # Errors
    /// `Unauthorized` for guests, `ValidationFailed` for a malformed name,
    /// `DependencyUnavailable` when the secret cannot be obtained
    pub async fn fetch_secret(&self, caller: &CallerContext, name: &str) -> AccessResult<SecretDescriptor> {
        let result = self.fetch_secret_inner(caller, name).await;
        self.finish(result)
    }

    /// Send a conversation to the completion service.
    ///
    /// Guests consume one message of their quota. The message is refunded
    /// when no reply is produced.
    ///
    /// # Errors
    /// `ValidationFailed`, `QuotaExceeded`, `Unauthorized` for an expired
    /// context, or `DependencyUnavailable`
    pub async fn call_completion(
        &self,
        caller: &CallerContext,
        request: CompletionRequest,
    ) -> AccessResult<CompletionResponse> {
        let result = self.call_completion_inner(caller, &request).await;
        self.finish(result)
    }

    /// Synthesize speech. `voice_id` falls back to the configured default.
    ///
    /// # Errors
    /// `ValidationFailed`, `Unauthorized` for an expired context, or
    /// `DependencyUnavailable`; callers typically fall back to local
    /// synthesis on the latter
    pub async fn call_speech(
        &self,
        caller: &CallerContext,
        text: &str,
        voice_id: Option<&str>,
    ) -> AccessResult<SpeechAudio> {
        let request = SpeechRequest::new(text, voice_id.unwrap_or(&self.settings.default_voice_id));
        let result = self.call_speech_inner(caller, &request).await;
        self.finish(result)
    }

    /// Fetch the credentials the gateway presents to its AI services and
    /// describe them. Used at startup to fail fast on a missing secret.
    pub async fn warm_credentials(&self) -> Vec<(SecretName, AccessResult<SecretDescriptor>)> {
        let mut results = Vec::with_capacity(2);
        for name in [
            self.settings.completion_credential.clone(),
            self.settings.speech_credential.clone(),
        ] {
            let described = self
                .with_deadline(Dependency::SecretStore, self.describe(name.clone()))
                .await;
            results.push((name, self.finish(described)));
        }
        results
    }

    /// Current breaker state of a dependency
    #[must_use]
    pub fn breaker_state(&self, dependency: Dependency) -> CircuitState {
        self.invoker.breakers().get(dependency).state()
    }

    /// Whether a call to the dependency would currently be attempted
    #[must_use]
    pub fn would_admit(&self, dependency: Dependency) -> bool {
        self.invoker.breakers().get(dependency).would_admit()
    }

    /// Health of every dependency
    #[must_use]
    pub fn health(&self) -> HealthReport {
        let now = Instant::now();
        let dependencies = self
            .invoker
            .breakers()
            .snapshots()
            .iter()
            .map(|snapshot| DependencyHealth::from_snapshot(snapshot, now))
            .collect();
        HealthReport::new(
            dependencies,
            now.saturating_duration_since(self.started_at),
            self.quota.tracked_sessions(),
        )
    }

    /// Close a dependency's breaker (operator action)
    pub fn reset_breaker(&self, dependency: Dependency) {
        self.invoker.breakers().get(dependency).reset();
        self.observer.publish_state(dependency);
    }

    /// Open a dependency's breaker (operator action)
    pub fn force_open(&self, dependency: Dependency) {
        self.invoker.breakers().get(dependency).force_open();
        self.observer.publish_state(dependency);
    }

    /// Guest quota bookkeeping
    #[must_use]
    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    /// Secret store cache
    #[must_use]
    pub fn secrets(&self) -> &CredentialCache {
        &self.secrets
    }

    /// Metrics registry
    #[must_use]
    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    /// Resolved façade settings
    #[must_use]
    pub fn settings(&self) -> &FacadeSettings {
        &self.settings
    }

    async fn fetch_secret_inner(&self, caller: &CallerContext, name: &str) -> GatewayResult<SecretDescriptor> {
        self.require_authenticated(caller, "secret access requires an authenticated caller")?;
        let name = SecretName::new(name)?;
        self.with_deadline(Dependency::SecretStore, self.describe(name))
            .await
    }

    async fn call_completion_inner(
        &self,
        caller: &CallerContext,
        request: &CompletionRequest,
    ) -> GatewayResult<CompletionResponse> {
        self.require_current(caller)?;
        request.validate()?;
        let pending = self.reserve(caller)?;

        let completion = &self.completion;
        let outcome = self
            .with_deadline(
                Dependency::CompletionService,
                self.call_with_credential(
                    Dependency::CompletionService,
                    &self.settings.completion_credential,
                    |credential| async move { completion.complete(&credential, request).await },
                ),
            )
            .await;

        if outcome.is_ok() {
            pending.commit();
        }
        outcome
    }

    async fn call_speech_inner(
        &self,
        caller: &CallerContext,
        request: &SpeechRequest,
    ) -> GatewayResult<SpeechAudio> {
        self.require_current(caller)?;
        request.validate()?;

        let speech = &self.speech;
        self.with_deadline(
            Dependency::SpeechService,
            self.call_with_credential(
                Dependency::SpeechService,
                &self.settings.speech_credential,
                |credential| async move { speech.synthesize(&credential, request).await },
            ),
        )
        .await
    }

    fn require_authenticated(&self, caller: &CallerContext, reason: &str) -> GatewayResult<()> {
        if caller.is_guest() {
            return Err(GatewayError::unauthorized(reason));
        }
        self.require_current(caller)
    }

    fn require_current(&self, caller: &CallerContext) -> GatewayResult<()> {
        if caller.is_expired_at(chrono::Utc::now()) {
            return Err(GatewayError::unauthorized("caller credentials expired"));
        }
        Ok(())
    }

    fn reserve(&self, caller: &CallerContext) -> GatewayResult<PendingQuota<'_>> {
        self.quota.reserve(caller).map_err(|error| {
            self.metrics.record_quota_rejection();
            error
        })
    }

    async fn describe(&self, name: SecretName) -> GatewayResult<SecretDescriptor> {
        let cached = self.secrets.lookup(&name).await;
        self.record_secret_lookup(cached.as_ref().map(|c| c.source));
        let cached = cached?;

        let now = Instant::now();
        let digest = Sha256::digest(cached.credential.expose());
        Ok(SecretDescriptor {
            name: name.to_string(),
            fingerprint: hex::encode(&digest[..FINGERPRINT_BYTES]),
            length: cached.credential.len(),
            age_seconds: now.saturating_duration_since(cached.fetched_at).as_secs(),
            expires_in_seconds: cached.expires_at.saturating_duration_since(now).as_secs(),
            source: cached.source.as_str(),
        })
    }

    async fn credential(&self, name: &SecretName) -> GatewayResult<Credential> {
        let cached = self.secrets.lookup(name).await;
        self.record_secret_lookup(cached.as_ref().map(|c| c.source));
        cached.map(|c| c.credential)
    }

    fn record_secret_lookup(&self, source: Result<CacheSource, &GatewayError>) {
        match source {
            Ok(source) => self.metrics.record_secret_cache(source.as_str()),
            Err(_) => self.metrics.record_secret_cache("unavailable"),
        }
    }

    /// Call a dependency with a credential from the secret store. A
    /// rejected credential is invalidated and the call repeated once with a
    /// freshly fetched one.
    async fn call_with_credential<T, F, Fut>(
        &self,
        dependency: Dependency,
        secret: &SecretName,
        call: F,
    ) -> GatewayResult<T>
    where
        F: Fn(Credential) -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let credential = self.credential(secret).await?;
        let first = self
            .invoker
            .invoke(dependency, || call(credential.clone()))
            .await;

        match first {
            Err(GatewayError::Rejected { message, .. }) => {
                warn!(
                    dependency = %dependency,
                    secret = %secret,
                    reason = %message,
                    "Credential rejected, refetching"
                );
                self.secrets.invalidate(secret);
                let fresh = self.credential(secret).await?;
                if fresh.same_material(&credential) {
                    debug!(secret = %secret, "Secret store returned the rejected credential again");
                }
                self.invoker
                    .invoke(dependency, || call(fresh.clone()))
                    .await
            }
            other => other,
        }
    }

    async fn with_deadline<T>(
        &self,
        dependency: Dependency,
        operation: impl Future<Output = GatewayResult<T>>,
    ) -> GatewayResult<T> {
        let deadline = self.settings.request_deadline;
        tokio::time::timeout(deadline, operation)
            .await
            .unwrap_or_else(|_| {
                warn!(dependency = %dependency, deadline_ms = deadline.as_millis(), "Request deadline elapsed");
                Err(GatewayError::Timeout {
                    dependency,
                    timeout: deadline,
                })
            })
    }

    fn finish<T>(&self, result: GatewayResult<T>) -> AccessResult<T> {
        result.map_err(|error| {
            let access = AccessError::from(error);
            self.metrics.record_access_denied(access.error_code());
            match &access {
                AccessError::DependencyUnavailable { .. } => {
                    info!(error = %access, "Request degraded");
                }
                _ => debug!(error = %access, "Request denied"),
            }
            access
        })
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("settings", &self.settings)
            .field("completion", &self.completion.name())
            .field("speech", &self.speech.name())
            .finish_non_exhaustive()
    }
}
