//! # Gateway Facade
//!
//! The single entry point application code uses to reach the gateway's
//! dependencies.
//!
//! Every operation takes a [`gateway_core::CallerContext`] and returns either
//! its payload or an [`AccessError`] naming one of four categories:
//! unauthorized, quota exceeded, dependency unavailable, validation failed.
//! Raw secret material never leaves the gateway.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod builder;
pub mod conversation;
pub mod error;
pub mod gateway;
pub mod health;
pub mod observer;

pub use builder::GatewayBuilder;
pub use conversation::{ChatReply, ConversationService};
pub use error::{AccessError, AccessResult};
pub use gateway::{FacadeSettings, Gateway, SecretDescriptor};
pub use health::{DependencyHealth, HealthReport, HealthStatus};
pub use observer::MetricsObserver;
