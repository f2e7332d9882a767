//! Public result categories of façade operations.

use gateway_core::{Dependency, GatewayError};
use serde::Serialize;

/// Result type of façade operations
pub type AccessResult<T> = Result<T, AccessError>;

/// Why a façade operation did not produce its payload.
///
/// Every internal failure lands in exactly one of these categories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum AccessError {
    /// Identity missing, invalid or expired where it is required
    #[error("Unauthorized: {reason}")]
    Unauthorized {
        /// Why access was denied
        reason: String,
    },

    /// The guest session used its message allowance; signing in lifts it
    #[error("Guest message limit reached ({used}/{limit})")]
    QuotaExceeded {
        /// Messages used
        used: u32,
        /// Allowance
        limit: u32,
    },

    /// A dependency could not serve the request
    #[error("{dependency} unavailable: {reason}")]
    DependencyUnavailable {
        /// Dependency name, or `gateway` for failures inside the gateway
        dependency: &'static str,
        /// Whether the call was short-circuited by an open breaker
        breaker_open: bool,
        /// Failure summary, free of secret material
        reason: String,
    },

    /// The caller sent malformed input
    #[error("Validation failed: {message}")]
    ValidationFailed {
        /// Offending field, if known
        field: Option<String>,
        /// Stable machine readable code
        code: String,
        /// Human readable message
        message: String,
    },
}

impl AccessError {
    /// Get error code for API responses
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized { .. } => "unauthorized",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::DependencyUnavailable { .. } => "dependency_unavailable",
            Self::ValidationFailed { .. } => "validation_failed",
        }
    }

    /// Get HTTP status code for this error
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Unauthorized { .. } => 401,
            Self::QuotaExceeded { .. } => 429,
            Self::DependencyUnavailable { .. } => 503,
            Self::ValidationFailed { .. } => 400,
        }
    }

    /// Whether the failure is a degraded dependency the caller may fall back from
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::DependencyUnavailable { .. })
    }

    /// Whether the call was refused by an open breaker without an attempt
    #[must_use]
    pub fn is_breaker_open(&self) -> bool {
        matches!(
            self,
            Self::DependencyUnavailable {
                breaker_open: true,
                ..
            }
        )
    }

    fn unavailable(dependency: Option<Dependency>, breaker_open: bool, reason: String) -> Self {
        Self::DependencyUnavailable {
            dependency: dependency.map_or("gateway", Dependency::name),
            breaker_open,
            reason,
        }
    }
}

impl From<GatewayError> for AccessError {
    fn from(err: GatewayError) -> Self {
        let dependency = err.dependency_of();
        let breaker_open = err.is_breaker_open();
        match err {
            GatewayError::Unauthorized { reason } => Self::Unauthorized { reason },
            GatewayError::QuotaExceeded { used, limit } => Self::QuotaExceeded { used, limit },
            GatewayError::Validation {
                message,
                field,
                code,
            } => Self::ValidationFailed {
                field,
                code,
                message,
            },
            GatewayError::BreakerOpen { .. }
            | GatewayError::Timeout { .. }
            | GatewayError::Cancelled { .. }
            | GatewayError::Dependency { .. }
            | GatewayError::Rejected { .. }
            | GatewayError::NotFound { .. }
            | GatewayError::SecretUnavailable { .. }
            | GatewayError::Configuration(_)
            | GatewayError::Internal(_) => Self::unavailable(dependency, breaker_open, err.to_string()),
        }
    }
}
