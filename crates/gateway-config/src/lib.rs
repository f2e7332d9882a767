//! # Gateway Config
//!
//! Configuration management for the access gateway.
//!
//! Configuration is read from a YAML or TOML file, overlaid with `GATEWAY_*`
//! environment variables, and validated once at startup. Invalid settings
//! stop the process before any dependency is contacted.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod settings;

pub use error::{ConfigError, Result};
pub use loader::{load_config, ENV_PREFIX};
pub use settings::{
    AuthConfig, BreakerSettings, CompletionProviderConfig, DependenciesConfig,
    DependencySettings, FacadeConfig, GatewayConfig, LogFormat, LoggingSettings,
    ProvidersConfig, QuotaConfig, RetrySettings, SecretPolicySettings,
    SecretStoreProviderConfig, SecretsConfig, SpeechProviderConfig, VerificationSettings,
    SUPPORTED_ALGORITHMS,
};
