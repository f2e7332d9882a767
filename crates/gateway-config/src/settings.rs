//! Configuration model.
//!
//! Durations are written as humantime strings (`"30s"`, `"500ms"`). Every
//! section has defaults, so an empty file is a valid configuration once the
//! provider endpoints are filled in.

use gateway_core::{Dependency, PerDependency, SecretName};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use validator::Validate;

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct GatewayConfig {
    /// Breaker, retry and timeout settings per dependency
    #[validate(nested)]
    pub dependencies: DependenciesConfig,
    /// Credential cache policies
    #[validate(nested)]
    pub secrets: SecretsConfig,
    /// Caller token verification
    #[validate(nested)]
    pub auth: AuthConfig,
    /// Guest quota
    #[validate(nested)]
    pub quota: QuotaConfig,
    /// Façade-wide settings
    #[validate(nested)]
    pub facade: FacadeConfig,
    /// Concrete collaborator endpoints
    pub providers: ProvidersConfig,
    /// Log output
    pub logging: LoggingSettings,
}

/// One section per dependency.
///
/// A section that is present replaces the built-in defaults for that
/// dependency; keys omitted inside it take the generic defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DependenciesConfig {
    /// Secret store
    #[serde(default = "DependencySettings::fail_closed")]
    #[validate(nested)]
    pub secret_store: DependencySettings,
    /// Identity provider key fetches
    #[serde(default = "DependencySettings::fail_closed")]
    #[validate(nested)]
    pub token_validator: DependencySettings,
    /// Completion service
    #[serde(default = "DependencySettings::completion")]
    #[validate(nested)]
    pub completion_service: DependencySettings,
    /// Speech service
    #[serde(default = "DependencySettings::speech")]
    #[validate(nested)]
    pub speech_service: DependencySettings,
}

impl Default for DependenciesConfig {
    fn default() -> Self {
        Self {
            secret_store: DependencySettings::fail_closed(),
            token_validator: DependencySettings::fail_closed(),
            completion_service: DependencySettings::completion(),
            speech_service: DependencySettings::speech(),
        }
    }
}

impl DependenciesConfig {
    /// Settings for one dependency
    #[must_use]
    pub fn get(&self, dependency: Dependency) -> &DependencySettings {
        match dependency {
            Dependency::SecretStore => &self.secret_store,
            Dependency::TokenValidator => &self.token_validator,
            Dependency::CompletionService => &self.completion_service,
            Dependency::SpeechService => &self.speech_service,
        }
    }

    /// Settings as a per-dependency table
    #[must_use]
    pub fn table(&self) -> PerDependency<DependencySettings> {
        PerDependency::from_fn(|dep| self.get(dep).clone())
    }
}

/// Resilience settings of a single dependency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DependencySettings {
    /// Circuit breaker
    #[validate(nested)]
    pub breaker: BreakerSettings,
    /// Retry policy
    #[validate(nested)]
    pub retry: RetrySettings,
    /// Deadline of a single attempt
    #[serde(with = "humantime_serde")]
    pub attempt_timeout: Duration,
}

impl Default for DependencySettings {
    fn default() -> Self {
        Self {
            breaker: BreakerSettings::default(),
            retry: RetrySettings::default(),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl DependencySettings {
    /// Low tolerance, short reset: secret store and token validator
    #[must_use]
    pub fn fail_closed() -> Self {
        Self {
            breaker: BreakerSettings {
                failure_threshold: 3,
                reset_timeout: Duration::from_secs(10),
                max_reset_timeout: Duration::from_secs(60),
                ..BreakerSettings::default()
            },
            retry: RetrySettings::default(),
            attempt_timeout: Duration::from_secs(1),
        }
    }

    /// Completion service defaults
    #[must_use]
    pub fn completion() -> Self {
        Self {
            breaker: BreakerSettings::default(),
            retry: RetrySettings::default(),
            attempt_timeout: Duration::from_secs(30),
        }
    }

    /// Speech service defaults
    #[must_use]
    pub fn speech() -> Self {
        Self {
            breaker: BreakerSettings::default(),
            retry: RetrySettings::default(),
            attempt_timeout: Duration::from_secs(20),
        }
    }
}

/// Circuit breaker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct BreakerSettings {
    /// Consecutive failures that open the breaker
    #[validate(range(min = 1, max = 1000))]
    pub failure_threshold: u32,
    /// Failures older than this are forgotten before counting a new one
    #[serde(default, with = "humantime_serde")]
    pub failure_window: Option<Duration>,
    /// Time spent open before a probe is allowed
    #[serde(with = "humantime_serde")]
    pub reset_timeout: Duration,
    /// Upper bound for the grown reset timeout
    #[serde(with = "humantime_serde")]
    pub max_reset_timeout: Duration,
    /// Growth factor applied after each failed probe
    #[validate(range(min = 1.0, max = 10.0))]
    pub reset_backoff_multiplier: f64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Some(Duration::from_secs(60)),
            reset_timeout: Duration::from_secs(30),
            max_reset_timeout: Duration::from_secs(300),
            reset_backoff_multiplier: 2.0,
        }
    }
}

/// Retry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RetrySettings {
    /// Additional attempts after the first
    #[validate(range(max = 10))]
    pub max_retries: u32,
    /// First backoff delay
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Backoff cap
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Backoff multiplier
    #[validate(range(min = 1.0, max = 10.0))]
    pub multiplier: f64,
    /// Jitter factor
    #[validate(range(min = 0.0, max = 1.0))]
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

/// Credential cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SecretsConfig {
    /// TTL applied to secrets without an explicit policy
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,
    /// Per-secret policy overrides, keyed by logical name
    pub policies: HashMap<String, SecretPolicySettings>,
    /// Secret used to call the completion service
    pub completion_credential: String,
    /// Secret used to call the speech service
    pub speech_credential: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            policies: HashMap::new(),
            completion_credential: "completion/api-key".to_string(),
            speech_credential: "speech/api-key".to_string(),
        }
    }
}

/// Policy of a single secret
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretPolicySettings {
    /// TTL override
    #[serde(with = "humantime_serde")]
    pub ttl: Option<Duration>,
    /// How long past expiry a stale copy may be served while the store is
    /// unreachable; absent means fail closed
    #[serde(with = "humantime_serde")]
    pub stale_grace: Option<Duration>,
}

/// Caller token verification
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AuthConfig {
    /// Where the verification material comes from
    pub verification: VerificationSettings,
    /// Accepted issuers (empty disables the check)
    pub issuers: Vec<String>,
    /// Accepted audiences (empty disables the check)
    pub audiences: Vec<String>,
    /// Accepted signing algorithms, e.g. `RS256`
    #[validate(length(min = 1))]
    pub algorithms: Vec<String>,
    /// Clock skew tolerance
    #[serde(with = "humantime_serde")]
    pub leeway: Duration,
    /// Claim carrying the session id; the subject is used when absent
    pub session_claim: String,
    /// Minimum age of the key set before an unknown key id forces a refetch
    #[serde(with = "humantime_serde")]
    pub rotation_refresh_interval: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            verification: VerificationSettings::default(),
            issuers: Vec::new(),
            audiences: Vec::new(),
            algorithms: vec!["RS256".to_string()],
            leeway: Duration::from_secs(60),
            session_claim: "sid".to_string(),
            rotation_refresh_interval: Duration::from_secs(30),
        }
    }
}

/// Source of token verification material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum VerificationSettings {
    /// Keys published by the identity provider
    Jwks {
        /// JWKS document URL
        url: String,
        /// How long a fetched key set is trusted
        #[serde(default = "default_jwks_ttl", with = "humantime_serde")]
        cache_ttl: Duration,
        /// Cache key of the key set
        #[serde(default = "default_jwks_name")]
        logical_name: String,
    },
    /// Symmetric key held in the secret store
    SharedSecret {
        /// Logical name of the HMAC key
        secret: String,
    },
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self::Jwks {
            url: String::new(),
            cache_ttl: default_jwks_ttl(),
            logical_name: default_jwks_name(),
        }
    }
}

fn default_jwks_ttl() -> Duration {
    Duration::from_secs(3600)
}

fn default_jwks_name() -> String {
    "identity-provider/jwks".to_string()
}

/// Guest quota
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct QuotaConfig {
    /// Messages a guest session may send
    #[validate(range(min = 1, max = 10000))]
    pub guest_message_limit: u32,
    /// Counter reset period; absent means the session lifetime
    #[serde(with = "humantime_serde")]
    pub window: Option<Duration>,
    /// Idle counters older than this are swept
    #[serde(with = "humantime_serde")]
    pub idle_expiry: Duration,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            guest_message_limit: 5,
            window: None,
            idle_expiry: Duration::from_secs(24 * 3600),
        }
    }
}

/// Façade-wide settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct FacadeConfig {
    /// Overall deadline of one façade operation
    #[serde(with = "humantime_serde")]
    pub request_deadline: Duration,
    /// Voice used when the caller does not choose one
    #[validate(length(min = 1, max = 64))]
    pub default_voice_id: String,
    /// System prompt prepended to every conversation
    pub system_prompt: Option<String>,
}

impl Default for FacadeConfig {
    fn default() -> Self {
        Self {
            request_deadline: Duration::from_secs(60),
            default_voice_id: "default".to_string(),
            system_prompt: None,
        }
    }
}

/// Concrete collaborator endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Completion service endpoint
    pub completion: CompletionProviderConfig,
    /// Speech service endpoint
    pub speech: SpeechProviderConfig,
    /// Secret store backend
    pub secret_store: SecretStoreProviderConfig,
}

/// OpenAI-compatible completion endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionProviderConfig {
    /// Base URL, without the `/v1/...` path
    pub base_url: String,
    /// Default model
    pub model: String,
}

impl Default for CompletionProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            model: "gpt-4o-mini".to_string(),
        }
    }
}

/// Speech synthesis endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechProviderConfig {
    /// Base URL, without the `/v1/...` path
    pub base_url: String,
    /// Synthesis model
    pub model_id: String,
    /// Requested output format
    pub output_format: String,
}

impl Default for SpeechProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.elevenlabs.io".to_string(),
            model_id: "eleven_multilingual_v2".to_string(),
            output_format: "mp3_44100_128".to_string(),
        }
    }
}

/// Secret store backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretStoreProviderConfig {
    /// Prefix of environment variables holding secrets
    pub env_prefix: String,
}

impl Default for SecretStoreProviderConfig {
    fn default() -> Self {
        Self {
            env_prefix: "GATEWAY_SECRET_".to_string(),
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable
    Pretty,
    /// One JSON object per line
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Algorithms the token verifier understands
pub const SUPPORTED_ALGORITHMS: [&str; 9] = [
    "HS256", "HS384", "HS512", "RS256", "RS384", "RS512", "ES256", "ES384", "EdDSA",
];

impl GatewayConfig {
    /// Validate the whole configuration, reporting every problem at once
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` listing all problems found
    pub fn validate(&self) -> crate::Result<()> {
        let mut problems = Vec::new();

        if let Err(errors) = Validate::validate(self) {
            problems.extend(
                errors
                    .to_string()
                    .lines()
                    .filter(|l| !l.trim().is_empty())
                    .map(str::to_string),
            );
        }

        for dependency in Dependency::ALL {
            let settings = self.dependencies.get(dependency);
            let breaker = &settings.breaker;
            if breaker.reset_timeout.is_zero() {
                problems.push(format!("{dependency}: breaker.reset_timeout must be positive"));
            }
            if breaker.max_reset_timeout < breaker.reset_timeout {
                problems.push(format!(
                    "{dependency}: breaker.max_reset_timeout must be >= reset_timeout"
                ));
            }
            if breaker.failure_window.is_some_and(|w| w.is_zero()) {
                problems.push(format!("{dependency}: breaker.failure_window must be positive"));
            }
            if settings.attempt_timeout.is_zero() {
                problems.push(format!("{dependency}: attempt_timeout must be positive"));
            }
            if settings.retry.max_delay < settings.retry.base_delay {
                problems.push(format!("{dependency}: retry.max_delay must be >= base_delay"));
            }
        }

        if self.secrets.default_ttl.is_zero() {
            problems.push("secrets.default_ttl must be positive".to_string());
        }
        for name in [&self.secrets.completion_credential, &self.secrets.speech_credential] {
            if let Err(e) = SecretName::new(name.as_str()) {
                problems.push(format!("secrets: {e}"));
            }
        }
        for (name, policy) in &self.secrets.policies {
            if let Err(e) = SecretName::new(name.as_str()) {
                problems.push(format!("secrets.policies: {e}"));
            }
            if policy.ttl.is_some_and(|t| t.is_zero()) {
                problems.push(format!("secrets.policies.{name}: ttl must be positive"));
            }
        }

        match &self.auth.verification {
            VerificationSettings::Jwks {
                url,
                cache_ttl,
                logical_name,
            } => {
                if let Err(e) = url::Url::parse(url) {
                    problems.push(format!("auth.verification.url is not a valid URL: {e}"));
                }
                if cache_ttl.is_zero() {
                    problems.push("auth.verification.cache_ttl must be positive".to_string());
                }
                if let Err(e) = SecretName::new(logical_name.as_str()) {
                    problems.push(format!("auth.verification.logical_name: {e}"));
                }
            }
            VerificationSettings::SharedSecret { secret } => {
                if let Err(e) = SecretName::new(secret.as_str()) {
                    problems.push(format!("auth.verification.secret: {e}"));
                }
                if self
                    .secrets
                    .policies
                    .get(secret)
                    .is_some_and(|p| p.stale_grace.is_some())
                {
                    problems.push(format!(
                        "secrets.policies.{secret}: token verification keys must not serve stale values"
                    ));
                }
            }
        }
        for alg in &self.auth.algorithms {
            if !SUPPORTED_ALGORITHMS.contains(&alg.as_str()) {
                problems.push(format!("auth.algorithms: unsupported algorithm '{alg}'"));
            }
        }

        if self.auth.rotation_refresh_interval.is_zero() {
            problems.push("auth.rotation_refresh_interval must be positive".to_string());
        }

        if self.facade.request_deadline.is_zero() {
            problems.push("facade.request_deadline must be positive".to_string());
        }

        for (field, value) in [
            ("providers.completion.base_url", &self.providers.completion.base_url),
            ("providers.speech.base_url", &self.providers.speech.base_url),
        ] {
            if let Err(e) = url::Url::parse(value) {
                problems.push(format!("{field} is not a valid URL: {e}"));
            }
        }
        if self.providers.completion.model.trim().is_empty() {
            problems.push("providers.completion.model must not be empty".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(crate::ConfigError::Invalid(problems))
        }
    }
}
