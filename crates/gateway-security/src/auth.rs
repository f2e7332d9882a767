//! Caller authorization.
//!
//! Verifies bearer tokens issued by the identity provider and classifies the
//! caller as guest or authenticated. Verification material comes from a
//! [`CredentialCache`]: either the provider's published JWKS document or a
//! shared HMAC secret held in the secret store.

use crate::credential_cache::CredentialCache;
use crate::error::{AuthError, Result};
use chrono::{DateTime, Utc};
use gateway_core::{validate_session_id, CallerContext, GatewayError, SecretName};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Header, TokenData, Validation};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Whether an endpoint admits unauthenticated callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestAccess {
    /// A valid token is required
    Denied,
    /// Callers without a valid token proceed as guests of this session
    Permitted {
        /// Browser session the guest belongs to
        session_id: String,
    },
}

impl GuestAccess {
    /// Permit guests of the given session
    pub fn permitted(session_id: impl Into<String>) -> Self {
        Self::Permitted {
            session_id: session_id.into(),
        }
    }
}

/// Where token verification keys come from
#[derive(Debug, Clone)]
pub enum VerificationMaterial {
    /// JWKS document published by the identity provider
    Jwks {
        /// Cache over the key set source
        cache: Arc<CredentialCache>,
        /// Logical name of the document in that cache
        document: SecretName,
    },
    /// HMAC secret held in the secret store
    SharedSecret {
        /// Secret store cache
        cache: Arc<CredentialCache>,
        /// Logical name of the secret
        secret: SecretName,
    },
}

/// Token validation settings
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Accepted issuers; empty accepts any
    pub issuers: Vec<String>,
    /// Accepted audiences; empty skips the check
    pub audiences: Vec<String>,
    /// Accepted signing algorithms
    pub algorithms: Vec<Algorithm>,
    /// Clock skew tolerance
    pub leeway: Duration,
    /// Claim carrying the session id; the subject is used when absent
    pub session_claim: String,
    /// Minimum age of the key set before an unknown key id forces a refetch
    pub rotation_refresh_interval: Duration,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            issuers: Vec::new(),
            audiences: Vec::new(),
            algorithms: vec![Algorithm::RS256],
            leeway: Duration::from_secs(60),
            session_claim: "sid".to_string(),
            rotation_refresh_interval: Duration::from_secs(30),
        }
    }
}

/// Verified token claims
#[derive(Debug, Clone, Deserialize)]
struct TokenClaims {
    sub: String,
    #[serde(default)]
    iat: Option<i64>,
    #[serde(default)]
    exp: Option<i64>,
    #[serde(flatten)]
    additional: HashMap<String, serde_json::Value>,
}

/// Verifies caller tokens
#[derive(Debug)]
pub struct RequestValidator {
    config: ValidatorConfig,
    material: VerificationMaterial,
}

impl RequestValidator {
    /// Create a validator
    #[must_use]
    pub fn new(config: ValidatorConfig, material: VerificationMaterial) -> Self {
        Self { config, material }
    }

    /// Validation settings
    #[must_use]
    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Classify a caller.
    ///
    /// A valid token yields an authenticated context. A missing or invalid
    /// token yields a guest context when `guest` permits it. Verification
    /// material that cannot be obtained always fails, even for guest
    /// endpoints, because the presented token cannot be judged.
    ///
    /// # Errors
    /// Returns the verification failure when guests are denied, or
    /// `VerifierUnavailable` when a presented token cannot be checked
    pub async fn authorize(&self, raw_token: Option<&str>, guest: &GuestAccess) -> Result<CallerContext> {
        let token = raw_token.map(str::trim).filter(|t| !t.is_empty());

        let verified = match token {
            Some(token) => self.verify(token).await,
            None => Err(AuthError::MissingCredentials),
        };

        match (verified, guest) {
            (Ok(context), _) => Ok(context),
            (Err(err @ (AuthError::VerifierUnavailable(_) | AuthError::Configuration(_))), _) => {
                warn!(error = %err, "Token verification unavailable, denying caller");
                Err(err)
            }
            (Err(err), GuestAccess::Permitted { session_id }) => {
                validate_session_id(session_id)
                    .map_err(|e| AuthError::invalid(e.to_string()))?;
                debug!(reason = %err, session_id = %session_id, "Proceeding as guest");
                Ok(CallerContext::guest(session_id.clone()))
            }
            (Err(err), GuestAccess::Denied) => {
                debug!(reason = %err, "Caller denied");
                Err(err)
            }
        }
    }

    /// Verify a token and build the authenticated context
    ///
    /// # Errors
    /// Returns error if the token is invalid, expired, or cannot be checked
    pub async fn verify(&self, token: &str) -> Result<CallerContext> {
        let header = decode_header(token)
            .map_err(|e| AuthError::invalid(format!("Failed to decode token header: {e}")))?;

        if !self.config.algorithms.contains(&header.alg) {
            return Err(AuthError::invalid(format!(
                "Algorithm {:?} is not accepted",
                header.alg
            )));
        }

        let key = self.decoding_key(&header).await?;

        let mut validation = Validation::new(header.alg);
        validation.leeway = self.config.leeway.as_secs();
        validation.algorithms = self.config.algorithms.clone();
        validation.set_required_spec_claims(&["exp", "sub"]);
        if !self.config.issuers.is_empty() {
            validation.set_issuer(&self.config.issuers);
        }
        if self.config.audiences.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&self.config.audiences);
        }

        let data: TokenData<TokenClaims> = decode(token, &key, &validation).map_err(|e| {
            debug!(error = %e, "JWT validation failed");
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::ExpiredCredential,
                _ => AuthError::invalid(format!("Token validation failed: {e}")),
            }
        })?;

        Ok(self.context_from_claims(data.claims))
    }

    fn context_from_claims(&self, claims: TokenClaims) -> CallerContext {
        let session_id = claims
            .additional
            .get(&self.config.session_claim)
            .and_then(serde_json::Value::as_str)
            .filter(|sid| validate_session_id(sid).is_ok())
            .map_or_else(|| claims.sub.clone(), str::to_string);

        let issued_at = claims
            .iat
            .and_then(|iat| DateTime::from_timestamp(iat, 0))
            .unwrap_or_else(Utc::now);
        let expires_at = claims.exp.and_then(|exp| DateTime::from_timestamp(exp, 0));

        CallerContext::authenticated(claims.sub, session_id, issued_at, expires_at)
    }

    async fn decoding_key(&self, header: &Header) -> Result<DecodingKey> {
        match &self.material {
            VerificationMaterial::SharedSecret { cache, secret } => {
                let credential = cache
                    .get(secret)
                    .await
                    .map_err(AuthError::VerifierUnavailable)?;
                Ok(DecodingKey::from_secret(credential.expose()))
            }
            VerificationMaterial::Jwks { cache, document } => {
                self.key_from_jwks(cache, document, header).await
            }
        }
    }

    /// Get decoding key from the key set based on the token header
    async fn key_from_jwks(
        &self,
        cache: &CredentialCache,
        document: &SecretName,
        header: &Header,
    ) -> Result<DecodingKey> {
        let kid = header
            .kid
            .as_deref()
            .ok_or_else(|| AuthError::invalid("Token missing kid header"))?;

        let jwks = load_key_set(cache, document).await?;
        if let Some(jwk) = jwks.find(kid) {
            return DecodingKey::from_jwk(jwk).map_err(|e| AuthError::invalid(format!("Invalid JWK: {e}")));
        }

        // Unknown key id: the provider may have rotated keys
        let old_enough = cache
            .age(document)
            .map_or(true, |age| age >= self.config.rotation_refresh_interval);
        if !old_enough {
            return Err(AuthError::invalid(format!("Key not found in JWKS: {kid}")));
        }

        debug!(kid, "Unknown key id, refreshing key set");
        cache.invalidate(document);
        let jwks = load_key_set(cache, document).await?;
        let jwk = jwks
            .find(kid)
            .ok_or_else(|| AuthError::invalid(format!("Key not found in JWKS: {kid}")))?;

        DecodingKey::from_jwk(jwk).map_err(|e| AuthError::invalid(format!("Invalid JWK: {e}")))
    }
}

async fn load_key_set(cache: &CredentialCache, document: &SecretName) -> Result<JwkSet> {
    let credential = cache
        .get(document)
        .await
        .map_err(AuthError::VerifierUnavailable)?;

    serde_json::from_slice(credential.expose()).map_err(|e| {
        AuthError::VerifierUnavailable(GatewayError::dependency(
            cache.dependency(),
            format!("Malformed key set: {e}"),
            None,
            false,
        ))
    })
}

/// Extract the token from an `Authorization: Bearer <token>` header value
#[must_use]
pub fn bearer_token(header_value: &str) -> Option<&str> {
    let (scheme, token) = header_value.trim().split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") {
        Some(token.trim()).filter(|t| !t.is_empty())
    } else {
        None
    }
}
