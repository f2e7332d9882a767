//! # Gateway Telemetry
//!
//! Observability for the access gateway.
//!
//! This crate provides:
//! - Structured logging setup (`tracing-subscriber`, pretty or JSON)
//! - Prometheus metrics for dependency calls, breakers, quota and the
//!   credential cache

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod logging;
pub mod metrics;

// Re-export main types
pub use error::TelemetryError;
pub use logging::{init_logging, LoggingConfig};
pub use metrics::GatewayMetrics;
