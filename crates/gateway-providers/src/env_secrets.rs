//! Secret source backed by process environment variables.
//!
//! `completion/api-key` with prefix `GATEWAY_SECRET_` is read from
//! `GATEWAY_SECRET_COMPLETION_API_KEY`.

use async_trait::async_trait;
use gateway_core::{Dependency, GatewayError, SecretName, SecretSource};
use tracing::trace;

/// Environment-variable secret store
#[derive(Debug, Clone)]
pub struct EnvSecretSource {
    prefix: String,
}

impl EnvSecretSource {
    /// Create a source reading variables with the given prefix
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Variable that holds a secret
    #[must_use]
    pub fn env_key(&self, name: &SecretName) -> String {
        let suffix: String = name
            .as_str()
            .chars()
            .map(|c| match c {
                '/' | '.' | '-' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();
        format!("{}{suffix}", self.prefix)
    }
}

impl Default for EnvSecretSource {
    fn default() -> Self {
        Self::new("GATEWAY_SECRET_")
    }
}

#[async_trait]
impl SecretSource for EnvSecretSource {
    async fn fetch(&self, name: &SecretName) -> Result<Vec<u8>, GatewayError> {
        let key = self.env_key(name);
        trace!(secret = %name, variable = %key, "Reading secret from environment");

        match std::env::var(&key) {
            Ok(value) if !value.trim().is_empty() => Ok(value.into_bytes()),
            Ok(_) | Err(std::env::VarError::NotPresent) => {
                Err(GatewayError::not_found(Dependency::SecretStore, name.as_str()))
            }
            Err(std::env::VarError::NotUnicode(_)) => Err(GatewayError::dependency(
                Dependency::SecretStore,
                format!("variable {key} is not valid unicode"),
                None,
                false,
            )),
        }
    }

    fn name(&self) -> &str {
        "environment"
    }
}
