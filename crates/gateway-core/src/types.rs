//! Validated domain newtypes.

use crate::error::GatewayError;
use secrecy::{ExposeSecret, SecretVec};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Logical name of a secret, e.g. `completion/api-key`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SecretName(String);

impl SecretName {
    /// Maximum accepted length
    pub const MAX_LEN: usize = 128;

    /// Create a validated secret name
    ///
    /// # Errors
    /// Returns error if the name is empty, too long, or contains characters
    /// outside `[a-z0-9._/-]`
    pub fn new(name: impl Into<String>) -> Result<Self, GatewayError> {
        let name = name.into();
        if name.is_empty() || name.len() > Self::MAX_LEN {
            return Err(GatewayError::validation(
                format!("secret name must be 1-{} characters", Self::MAX_LEN),
                Some("secret_name".to_string()),
                "invalid_secret_name",
            ));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '/' | '-'))
        {
            return Err(GatewayError::validation(
                format!("secret name contains invalid characters: {name}"),
                Some("secret_name".to_string()),
                "invalid_secret_name",
            ));
        }
        Ok(Self(name))
    }

    /// Borrow as str
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SecretName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SecretName {
    type Error = GatewayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SecretName> for String {
    fn from(value: SecretName) -> Self {
        value.0
    }
}

impl AsRef<str> for SecretName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Opaque secret material.
///
/// Cheap to clone and zeroized on final drop. `Debug` is redacted; there is
/// no `Display` or `Serialize` implementation.
#[derive(Clone)]
pub struct Credential(Arc<SecretVec<u8>>);

impl Credential {
    /// Wrap raw bytes
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Arc::new(SecretVec::new(bytes)))
    }

    /// Expose the raw bytes to the SDK layer that needs them
    #[must_use]
    pub fn expose(&self) -> &[u8] {
        self.0.expose_secret()
    }

    /// Expose as UTF-8, e.g. for an authorization header
    ///
    /// # Errors
    /// Returns an internal error if the material is not valid UTF-8
    pub fn expose_str(&self) -> Result<&str, GatewayError> {
        std::str::from_utf8(self.expose())
            .map(str::trim)
            .map_err(|_| GatewayError::internal("credential is not valid UTF-8"))
    }

    /// Length of the material in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.expose().len()
    }

    /// Whether the material is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }

    /// Compare material without exposing it to the caller
    #[must_use]
    pub fn same_material(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl From<&str> for Credential {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes().to_vec())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&"[REDACTED]").finish()
    }
}
