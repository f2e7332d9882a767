//! Authentication error types.

use gateway_core::GatewayError;

/// Result type for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Authentication error type.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// No token was presented.
    #[error("Authentication required")]
    MissingCredentials,

    /// The token is malformed, unsigned by a known key, or has bad claims.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// The token has expired.
    #[error("Credentials expired")]
    ExpiredCredential,

    /// Verification material could not be obtained.
    #[error("Token verification unavailable: {0}")]
    VerifierUnavailable(GatewayError),

    /// The validator is misconfigured.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl AuthError {
    /// Create an invalid token error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidToken(msg.into())
    }

    /// Whether the caller, rather than the verifier, is at fault.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::MissingCredentials | Self::InvalidToken(_) | Self::ExpiredCredential
        )
    }

    /// Get HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MissingCredentials | Self::InvalidToken(_) | Self::ExpiredCredential => 401,
            Self::VerifierUnavailable(_) => 503,
            Self::Configuration(_) => 500,
        }
    }

    /// Get error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingCredentials => "authentication_required",
            Self::InvalidToken(_) => "invalid_token",
            Self::ExpiredCredential => "expired_credentials",
            Self::VerifierUnavailable(_) => "verifier_unavailable",
            Self::Configuration(_) => "configuration_error",
        }
    }
}

impl From<AuthError> for GatewayError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::VerifierUnavailable(inner) => inner,
            AuthError::Configuration(msg) => Self::Configuration(msg),
            client => Self::unauthorized(client.to_string()),
        }
    }
}
