//! Caller identity derived once per inbound request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of a session identifier
const MAX_SESSION_ID_LEN: usize = 128;

/// Identity class of a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityClass {
    /// Unauthenticated caller, subject to the guest quota
    Guest,
    /// Caller presented a valid identity token
    Authenticated,
}

impl fmt::Display for IdentityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Guest => write!(f, "guest"),
            Self::Authenticated => write!(f, "authenticated"),
        }
    }
}

/// Immutable caller context
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallerContext {
    identity_class: IdentityClass,
    identity_id: Option<String>,
    session_id: String,
    issued_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl CallerContext {
    /// Guest context bound to a browser session
    #[must_use]
    pub fn guest(session_id: impl Into<String>) -> Self {
        Self {
            identity_class: IdentityClass::Guest,
            identity_id: None,
            session_id: session_id.into(),
            issued_at: Utc::now(),
            expires_at: None,
        }
    }

    /// Authenticated context from verified token claims
    #[must_use]
    pub fn authenticated(
        identity_id: impl Into<String>,
        session_id: impl Into<String>,
        issued_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            identity_class: IdentityClass::Authenticated,
            identity_id: Some(identity_id.into()),
            session_id: session_id.into(),
            issued_at,
            expires_at,
        }
    }

    /// Identity class
    #[must_use]
    pub fn identity_class(&self) -> IdentityClass {
        self.identity_class
    }

    /// Whether the caller is a guest
    #[must_use]
    pub fn is_guest(&self) -> bool {
        self.identity_class == IdentityClass::Guest
    }

    /// Identity id (subject), `None` for guests
    #[must_use]
    pub fn identity_id(&self) -> Option<&str> {
        self.identity_id.as_deref()
    }

    /// Session the request belongs to
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// When the underlying token was issued (creation time for guests)
    #[must_use]
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// When the underlying token expires
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Whether the context has expired at `now`
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    /// Key of the quota counter gating this caller
    #[must_use]
    pub fn quota_key(&self) -> &str {
        self.identity_id.as_deref().unwrap_or(&self.session_id)
    }
}

/// Check that a session identifier is well formed
///
/// # Errors
/// Returns a validation error for empty, oversized or non-token characters
pub fn validate_session_id(session_id: &str) -> Result<(), crate::GatewayError> {
    let well_formed = !session_id.is_empty()
        && session_id.len() <= MAX_SESSION_ID_LEN
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if well_formed {
        Ok(())
    } else {
        Err(crate::GatewayError::validation(
            "session id must be 1-128 characters of [A-Za-z0-9._-]",
            Some("session_id".to_string()),
            "invalid_session_id",
        ))
    }
}

/// Generate a fresh session identifier
#[must_use]
pub fn generate_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
