//! # Gateway Core
//!
//! Core types, traits, and error handling for the access gateway.
//!
//! This crate provides the foundational types used throughout the gateway:
//! - The closed set of outbound dependencies
//! - Caller identity context
//! - Request and response types for the completion and speech services
//! - Collaborator traits (secret source, AI services, conversation store)
//! - Error types and handling

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod caller;
pub mod dependency;
pub mod error;
pub mod provider;
pub mod request;
pub mod types;

// Re-export commonly used types
pub use caller::{generate_session_id, validate_session_id, CallerContext, IdentityClass};
pub use dependency::{Criticality, Dependency, PerDependency};
pub use error::{GatewayError, GatewayResult};
pub use provider::{CompletionService, ConversationStore, SecretSource, SpeechService};
pub use request::{
    validate_message_text, ChatMessage, CompletionRequest, CompletionResponse, MessageRole,
    SpeechAudio, SpeechRequest, Usage,
};
pub use types::{Credential, SecretName};
