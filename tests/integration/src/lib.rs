//! Integration tests for the companion access gateway
//!
//! Covers behaviour that spans crates:
//! - Breaker transitions under a paused clock
//! - Guest quota under concurrency
//! - Credential cache stampedes and expiry
//! - End-to-end chat flows through the façade
//! - The HTTP collaborators against mock servers

pub mod fixtures;
pub mod helpers;
pub mod mock_providers;

// Re-export commonly used items
pub use fixtures::*;
pub use helpers::*;
pub use mock_providers::*;

#[cfg(test)]
mod breaker_tests;
#[cfg(test)]
mod cache_tests;
#[cfg(test)]
mod e2e_tests;
#[cfg(test)]
mod provider_tests;
#[cfg(test)]
mod quota_tests;
