//! Construction of a [`Gateway`] from configuration.
//!
//! Collaborators default to the HTTP and environment implementations from
//! `gateway-providers`; tests and embedders substitute their own.

use crate::gateway::{FacadeSettings, Gateway};
use crate::observer::MetricsObserver;
use gateway_config::{
    AuthConfig, DependencySettings, GatewayConfig, SecretsConfig, VerificationSettings,
};
use gateway_core::{
    CompletionService, Dependency, GatewayError, PerDependency, SecretName, SecretSource,
    SpeechService,
};
use gateway_providers::{
    EnvSecretSource, HttpCompletionClient, HttpCompletionConfig, HttpKeySetSource,
    HttpSpeechClient, HttpSpeechConfig,
};
use gateway_resilience::{
    CircuitBreakerConfig, DependencyPolicy, ResilientInvoker, RetryConfig, RetryPolicy,
};
use gateway_security::{
    CredentialCache, QuotaConfig, QuotaTracker, RequestValidator, SecretPolicy, ValidatorConfig,
    VerificationMaterial,
};
use gateway_telemetry::GatewayMetrics;
use jsonwebtoken::Algorithm;
use std::str::FromStr;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::info;

/// Builder for [`Gateway`]
#[must_use]
pub struct GatewayBuilder {
    config: GatewayConfig,
    secret_source: Option<Arc<dyn SecretSource>>,
    key_set_source: Option<Arc<dyn SecretSource>>,
    completion: Option<Arc<dyn CompletionService>>,
    speech: Option<Arc<dyn SpeechService>>,
    metrics: Option<GatewayMetrics>,
}

impl GatewayBuilder {
    /// Start from a configuration
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            secret_source: None,
            key_set_source: None,
            completion: None,
            speech: None,
            metrics: None,
        }
    }

    /// Use a specific secret store
    pub fn secret_source(mut self, source: Arc<dyn SecretSource>) -> Self {
        self.secret_source = Some(source);
        self
    }

    /// Use a specific source for the identity provider's key set
    pub fn key_set_source(mut self, source: Arc<dyn SecretSource>) -> Self {
        self.key_set_source = Some(source);
        self
    }

    /// Use a specific completion service
    pub fn completion(mut self, service: Arc<dyn CompletionService>) -> Self {
        self.completion = Some(service);
        self
    }

    /// Use a specific speech service
    pub fn speech(mut self, service: Arc<dyn SpeechService>) -> Self {
        self.speech = Some(service);
        self
    }

    /// Record into an existing metrics registry
    pub fn metrics(mut self, metrics: GatewayMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validate the configuration and assemble the gateway
    ///
    /// # Errors
    /// Returns `Configuration` when the configuration is invalid or a
    /// default collaborator cannot be created
    pub fn build(self) -> Result<Gateway, GatewayError> {
        let config = self.config;
        config
            .validate()
            .map_err(|e| GatewayError::configuration(e.to_string()))?;

        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => GatewayMetrics::new().map_err(|e| GatewayError::internal(e.to_string()))?,
        };

        let invoker = ResilientInvoker::new(
            config
                .dependencies
                .table()
                .map(|_, settings| dependency_policy(settings)),
        );
        let observer = MetricsObserver::new(metrics.clone(), invoker.breakers().clone());
        let invoker = Arc::new(invoker.with_observer(Arc::new(observer.clone())));

        let secret_source = match self.secret_source {
            Some(source) => source,
            None => Arc::new(EnvSecretSource::new(
                config.providers.secret_store.env_prefix.clone(),
            )),
        };
        let secrets = Arc::new(secret_cache(&config.secrets, secret_source, invoker.clone())?);

        let material = verification_material(
            &config,
            self.key_set_source,
            secrets.clone(),
            invoker.clone(),
        )?;
        let validator = RequestValidator::new(validator_config(&config.auth)?, material);

        let completion = match self.completion {
            Some(service) => service,
            None => Arc::new(HttpCompletionClient::new(HttpCompletionConfig::new(
                config.providers.completion.base_url.clone(),
                config.providers.completion.model.clone(),
            ))?),
        };
        let speech = match self.speech {
            Some(service) => service,
            None => Arc::new(HttpSpeechClient::new(
                HttpSpeechConfig::new(
                    config.providers.speech.base_url.clone(),
                    config.providers.speech.model_id.clone(),
                )
                .with_output_format(config.providers.speech.output_format.clone()),
            )?),
        };

        let quota = QuotaTracker::new(QuotaConfig {
            guest_message_limit: config.quota.guest_message_limit,
            window: config.quota.window,
            idle_expiry: config.quota.idle_expiry,
        });

        let settings = FacadeSettings {
            request_deadline: config.facade.request_deadline,
            default_voice_id: config.facade.default_voice_id.clone(),
            completion_credential: SecretName::new(config.secrets.completion_credential.as_str())?,
            speech_credential: SecretName::new(config.secrets.speech_credential.as_str())?,
        };

        info!(
            completion = completion.name(),
            speech = speech.name(),
            guest_message_limit = config.quota.guest_message_limit,
            "Gateway initialized"
        );

        Ok(Gateway {
            invoker,
            observer,
            secrets,
            validator,
            quota,
            completion,
            speech,
            metrics,
            settings,
            started_at: Instant::now(),
        })
    }
}

fn dependency_policy(settings: &DependencySettings) -> DependencyPolicy {
    DependencyPolicy {
        breaker: CircuitBreakerConfig {
            failure_threshold: settings.breaker.failure_threshold,
            failure_window: settings.breaker.failure_window,
            reset_timeout: settings.breaker.reset_timeout,
            max_reset_timeout: settings.breaker.max_reset_timeout,
            reset_backoff_multiplier: settings.breaker.reset_backoff_multiplier,
        },
        retry: RetryPolicy::new(RetryConfig {
            max_retries: settings.retry.max_retries,
            base_delay: settings.retry.base_delay,
            max_delay: settings.retry.max_delay,
            multiplier: settings.retry.multiplier,
            jitter: settings.retry.jitter,
        }),
        attempt_timeout: settings.attempt_timeout,
    }
}

fn secret_cache(
    secrets: &SecretsConfig,
    source: Arc<dyn SecretSource>,
    invoker: Arc<ResilientInvoker>,
) -> Result<CredentialCache, GatewayError> {
    let mut cache = CredentialCache::new(
        Dependency::SecretStore,
        source,
        invoker,
        SecretPolicy::fail_closed(secrets.default_ttl),
    );
    for (name, settings) in &secrets.policies {
        let mut policy = SecretPolicy::fail_closed(settings.ttl.unwrap_or(secrets.default_ttl));
        if let Some(grace) = settings.stale_grace {
            policy = policy.with_stale_grace(grace);
        }
        cache = cache.with_policy(SecretName::new(name.as_str())?, policy);
    }
    Ok(cache)
}

fn verification_material(
    config: &GatewayConfig,
    key_set_source: Option<Arc<dyn SecretSource>>,
    secrets: Arc<CredentialCache>,
    invoker: Arc<ResilientInvoker>,
) -> Result<VerificationMaterial, GatewayError> {
    match &config.auth.verification {
        VerificationSettings::Jwks {
            url,
            cache_ttl,
            logical_name,
        } => {
            let source = match key_set_source {
                Some(source) => source,
                None => Arc::new(HttpKeySetSource::new(
                    url,
                    config.dependencies.token_validator.attempt_timeout,
                )?),
            };
            let cache = CredentialCache::new(
                Dependency::TokenValidator,
                source,
                invoker,
                SecretPolicy::fail_closed(*cache_ttl),
            );
            Ok(VerificationMaterial::Jwks {
                cache: Arc::new(cache),
                document: SecretName::new(logical_name.as_str())?,
            })
        }
        VerificationSettings::SharedSecret { secret } => Ok(VerificationMaterial::SharedSecret {
            cache: secrets,
            secret: SecretName::new(secret.as_str())?,
        }),
    }
}

fn validator_config(auth: &AuthConfig) -> Result<ValidatorConfig, GatewayError> {
    let algorithms = auth
        .algorithms
        .iter()
        .map(|name| {
            Algorithm::from_str(name).map_err(|_| {
                GatewayError::configuration(format!("unsupported token algorithm '{name}'"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ValidatorConfig {
        issuers: auth.issuers.clone(),
        audiences: auth.audiences.clone(),
        algorithms,
        leeway: auth.leeway,
        session_claim: auth.session_claim.clone(),
        rotation_refresh_interval: auth.rotation_refresh_interval,
    })
}
