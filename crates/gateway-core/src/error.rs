//! Error types for the access gateway.
//!
//! `GatewayError` is the internal error carried through the resilience stack.
//! It is `Clone` so that concurrent waiters on a shared fetch can all observe
//! the same outcome.

use crate::dependency::Dependency;
use std::time::Duration;
use thiserror::Error;

/// Result alias used across the gateway crates
pub type GatewayResult<T> = Result<T, GatewayError>;

/// HTTP status codes that indicate a transient upstream condition
const TRANSIENT_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// Internal gateway error
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Caller identity missing, invalid or expired where it is required
    #[error("Unauthorized: {reason}")]
    Unauthorized {
        /// Why access was denied
        reason: String,
    },

    /// Guest session used up its message allowance
    #[error("Quota exceeded: {used}/{limit} messages used")]
    QuotaExceeded {
        /// Messages consumed in the current window
        used: u32,
        /// Configured limit
        limit: u32,
    },

    /// Malformed caller input
    #[error("Validation error: {message}")]
    Validation {
        /// Human readable message
        message: String,
        /// Offending field, if known
        field: Option<String>,
        /// Stable machine readable code
        code: String,
    },

    /// Breaker for the dependency is open, no call was attempted
    #[error("Circuit breaker open for {dependency}")]
    BreakerOpen {
        /// Dependency whose breaker rejected the call
        dependency: Dependency,
    },

    /// A single attempt exceeded its deadline
    #[error("{dependency} call timed out after {timeout:?}")]
    Timeout {
        /// Dependency that was called
        dependency: Dependency,
        /// Deadline that elapsed
        timeout: Duration,
    },

    /// The attempt was abandoned before it completed
    #[error("{dependency} call cancelled")]
    Cancelled {
        /// Dependency that was called
        dependency: Dependency,
    },

    /// The dependency failed
    #[error("{dependency} error: {message}")]
    Dependency {
        /// Dependency that failed
        dependency: Dependency,
        /// Error message
        message: String,
        /// Upstream status code, if any
        status_code: Option<u16>,
        /// Whether the failure is transient
        retryable: bool,
    },

    /// The dependency refused the credential we presented
    #[error("{dependency} rejected the presented credential: {message}")]
    Rejected {
        /// Dependency that refused
        dependency: Dependency,
        /// Error message
        message: String,
    },

    /// The dependency does not know the requested resource
    #[error("{dependency} has no resource named {resource}")]
    NotFound {
        /// Dependency that was asked
        dependency: Dependency,
        /// Resource name
        resource: String,
    },

    /// A secret could not be obtained and no usable cached copy exists
    #[error("Secret unavailable: {name}: {cause}")]
    SecretUnavailable {
        /// Dependency the secret is fetched from
        dependency: Dependency,
        /// Logical secret name
        name: String,
        /// Underlying failure, rendered
        cause: String,
        /// Whether the underlying failure was a breaker short-circuit
        breaker_open: bool,
    },

    /// Invalid configuration detected at startup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Create an unauthorized error
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }

    /// Create a validation error
    pub fn validation(
        message: impl Into<String>,
        field: Option<String>,
        code: impl Into<String>,
    ) -> Self {
        Self::Validation {
            message: message.into(),
            field,
            code: code.into(),
        }
    }

    /// Create a dependency error
    pub fn dependency(
        dependency: Dependency,
        message: impl Into<String>,
        status_code: Option<u16>,
        retryable: bool,
    ) -> Self {
        Self::Dependency {
            dependency,
            message: message.into(),
            status_code,
            retryable,
        }
    }

    /// Create a dependency error from an upstream HTTP status
    pub fn from_status(dependency: Dependency, status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::Rejected {
                dependency,
                message,
            },
            _ => Self::Dependency {
                dependency,
                message,
                status_code: Some(status),
                retryable: TRANSIENT_STATUS_CODES.contains(&status),
            },
        }
    }

    /// Create a not-found error
    pub fn not_found(dependency: Dependency, resource: impl Into<String>) -> Self {
        Self::NotFound {
            dependency,
            resource: resource.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether another attempt could succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Cancelled { .. } => true,
            Self::Dependency {
                retryable,
                status_code,
                ..
            } => *retryable || status_code.is_some_and(|c| TRANSIENT_STATUS_CODES.contains(&c)),
            _ => false,
        }
    }

    /// Whether the error reflects the health of the dependency and must be
    /// counted by its breaker. Caller errors and definitive answers are not.
    #[must_use]
    pub fn is_dependency_failure(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Cancelled { .. } => true,
            Self::Dependency { .. } => self.is_retryable(),
            _ => false,
        }
    }

    /// Whether the error is a breaker short-circuit
    #[must_use]
    pub fn is_breaker_open(&self) -> bool {
        match self {
            Self::BreakerOpen { .. } => true,
            Self::SecretUnavailable { breaker_open, .. } => *breaker_open,
            _ => false,
        }
    }

    /// Dependency the error is attributed to, if any
    #[must_use]
    pub fn dependency_of(&self) -> Option<Dependency> {
        match self {
            Self::BreakerOpen { dependency }
            | Self::Timeout { dependency, .. }
            | Self::Cancelled { dependency }
            | Self::Dependency { dependency, .. }
            | Self::Rejected { dependency, .. }
            | Self::NotFound { dependency, .. } => Some(*dependency),
            Self::SecretUnavailable { dependency, .. } => Some(*dependency),
            _ => None,
        }
    }
}
