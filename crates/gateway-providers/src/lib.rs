//! # Gateway Providers
//!
//! Concrete collaborators for the access gateway.
//!
//! - OpenAI-compatible chat completion client
//! - Text-to-speech client
//! - Identity provider key-set (JWKS) source
//! - Environment-variable secret store
//! - In-memory secret store and conversation log

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod completion;
pub mod env_secrets;
pub mod key_set;
pub mod memory;
pub mod speech;

pub use completion::{HttpCompletionClient, HttpCompletionConfig};
pub use env_secrets::EnvSecretSource;
pub use key_set::HttpKeySetSource;
pub use memory::{InMemoryConversationStore, InMemorySecretSource};
pub use speech::{HttpSpeechClient, HttpSpeechConfig};
