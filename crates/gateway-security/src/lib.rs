//! # Gateway Security
//!
//! Caller and credential security for the access gateway.
//!
//! ## Features
//!
//! - **Credential Cache**: TTL-bound secret caching with single-flight refresh
//!   and per-secret stale grace
//! - **Request Validation**: JWT verification against a JWKS document or a
//!   shared secret, with guest fallback where an endpoint permits it
//! - **Guest Quota**: atomic per-session message accounting with refunds

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod credential_cache;
pub mod error;
pub mod quota;

pub use auth::{bearer_token, GuestAccess, RequestValidator, ValidatorConfig, VerificationMaterial};
pub use credential_cache::{
    CacheSource, CacheStats, CachedCredential, CredentialCache, SecretPolicy,
};
pub use error::{AuthError, Result};
pub use quota::{PendingQuota, QuotaConfig, QuotaReservation, QuotaTracker, QuotaUsage};
