//! Interfaces of the external collaborators.
//!
//! The gateway consumes these; concrete HTTP and in-memory implementations
//! live in `gateway-providers`.

use crate::error::GatewayError;
use crate::request::{ChatMessage, CompletionRequest, CompletionResponse, SpeechAudio, SpeechRequest};
use crate::types::{Credential, SecretName};
use async_trait::async_trait;

/// Source of short-lived opaque material addressed by logical name.
///
/// Implemented by the secret store and by the identity provider's published
/// verification keys.
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// Fetch the current material.
    ///
    /// Returns `GatewayError::NotFound` when the name is unknown and a
    /// `GatewayError::Dependency` when the source is unreachable.
    async fn fetch(&self, name: &SecretName) -> Result<Vec<u8>, GatewayError>;

    /// Source identifier for logs
    fn name(&self) -> &str;
}

/// Hosted language-model completion service
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Complete a conversation
    async fn complete(
        &self,
        credential: &Credential,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, GatewayError>;

    /// Provider identifier for logs
    fn name(&self) -> &str;
}

/// Speech synthesis service
#[async_trait]
pub trait SpeechService: Send + Sync {
    /// Synthesize speech for the given text and voice
    async fn synthesize(
        &self,
        credential: &Credential,
        request: &SpeechRequest,
    ) -> Result<SpeechAudio, GatewayError>;

    /// Provider identifier for logs
    fn name(&self) -> &str;
}

/// Per-session append-only conversation log
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Append a message to a session
    async fn append(&self, session_id: &str, message: ChatMessage) -> Result<(), GatewayError>;

    /// Append several messages so that no other append lands between them.
    ///
    /// The default appends one by one; stores shared by concurrent turns
    /// should override it.
    async fn append_all(&self, session_id: &str, messages: Vec<ChatMessage>) -> Result<(), GatewayError> {
        for message in messages {
            self.append(session_id, message).await?;
        }
        Ok(())
    }

    /// Read a session's messages in append order
    async fn read(&self, session_id: &str) -> Result<Vec<ChatMessage>, GatewayError>;
}
