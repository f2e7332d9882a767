//! # Gateway Resilience
//!
//! Resilience patterns guarding the gateway's outbound dependencies:
//! - Circuit breaker per dependency, with a single half-open probe
//! - Retry policy with exponential backoff and jitter
//! - Request coalescing for concurrent fetches of the same key
//! - An invoker combining breaker, attempt timeout, and retries

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod circuit_breaker;
pub mod invoker;
pub mod retry;
pub mod single_flight;

// Re-export main types
pub use circuit_breaker::{
    BreakerSet, BreakerSnapshot, CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitState,
};
pub use invoker::{AttemptOutcome, CallObserver, DependencyPolicy, ResilientInvoker};
pub use retry::{RetryConfig, RetryPolicy};
pub use single_flight::SingleFlight;
