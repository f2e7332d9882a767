//! Request and response types for the outbound AI services.
//!
//! Validation lives here so that malformed input is rejected before any
//! dependency is consulted and never shows up in breaker statistics.

use crate::error::GatewayError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Longest accepted user message, in characters
pub const MAX_MESSAGE_CHARS: usize = 8_000;

/// Longest accepted speech input, in characters
pub const MAX_SPEECH_CHARS: usize = 5_000;

/// Most messages forwarded in one completion request
pub const MAX_CONVERSATION_MESSAGES: usize = 200;

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System prompt
    System,
    /// End user
    User,
    /// Model reply
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// One message of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message author
    pub role: MessageRole,

    /// Text content
    pub content: String,

    /// When the message was recorded
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a system message
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// Create a user message
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create an assistant message
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Validate a single user-authored message body
///
/// # Errors
/// Returns a validation error for blank or oversized text
pub fn validate_message_text(text: &str) -> Result<(), GatewayError> {
    if text.trim().is_empty() {
        return Err(GatewayError::validation(
            "message cannot be empty",
            Some("content".to_string()),
            "empty_message",
        ));
    }
    let chars = text.chars().count();
    if chars > MAX_MESSAGE_CHARS {
        return Err(GatewayError::validation(
            format!("message must be at most {MAX_MESSAGE_CHARS} characters, got {chars}"),
            Some("content".to_string()),
            "message_too_long",
        ));
    }
    Ok(())
}

/// Conversation context sent to the completion service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Ordered conversation, oldest first
    pub messages: Vec<ChatMessage>,

    /// Model override; the provider default is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Sampling temperature (0.0 - 2.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    /// Create a request from a conversation
    #[must_use]
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    /// Set the model
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Validate the request
    ///
    /// # Errors
    /// Returns error if any field is invalid
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.messages.is_empty() {
            return Err(GatewayError::validation(
                "messages cannot be empty",
                Some("messages".to_string()),
                "empty_messages",
            ));
        }

        if self.messages.len() > MAX_CONVERSATION_MESSAGES {
            return Err(GatewayError::validation(
                format!(
                    "at most {MAX_CONVERSATION_MESSAGES} messages are accepted, got {}",
                    self.messages.len()
                ),
                Some("messages".to_string()),
                "too_many_messages",
            ));
        }

        if !self
            .messages
            .iter()
            .any(|m| m.role == MessageRole::User)
        {
            return Err(GatewayError::validation(
                "conversation must contain a user message",
                Some("messages".to_string()),
                "missing_user_message",
            ));
        }

        for message in self.messages.iter().filter(|m| m.role == MessageRole::User) {
            validate_message_text(&message.content)?;
        }

        if let Some(model) = &self.model {
            if model.trim().is_empty() || model.len() > 256 {
                return Err(GatewayError::validation(
                    "model must be 1-256 characters",
                    Some("model".to_string()),
                    "invalid_model",
                ));
            }
        }

        if let Some(max_tokens) = self.max_tokens {
            if max_tokens == 0 || max_tokens > 128_000 {
                return Err(GatewayError::validation(
                    format!("max_tokens must be between 1 and 128000, got {max_tokens}"),
                    Some("max_tokens".to_string()),
                    "invalid_max_tokens",
                ));
            }
        }

        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(GatewayError::validation(
                    format!("temperature must be between 0.0 and 2.0, got {t}"),
                    Some("temperature".to_string()),
                    "invalid_temperature",
                ));
            }
        }

        Ok(())
    }
}

/// Token usage reported by the completion service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens
    pub prompt_tokens: u32,
    /// Completion tokens
    pub completion_tokens: u32,
}

/// Completion service reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Generated text
    pub text: String,
    /// Model that produced it
    pub model: String,
    /// Token usage, when reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Speech synthesis input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeechRequest {
    /// Text to speak
    pub text: String,
    /// Voice identifier at the speech service
    pub voice_id: String,
}

impl SpeechRequest {
    /// Create a speech request
    #[must_use]
    pub fn new(text: impl Into<String>, voice_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice_id: voice_id.into(),
        }
    }

    /// Validate the request
    ///
    /// # Errors
    /// Returns error if text or voice id are malformed
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.text.trim().is_empty() {
            return Err(GatewayError::validation(
                "text cannot be empty",
                Some("text".to_string()),
                "empty_text",
            ));
        }
        let chars = self.text.chars().count();
        if chars > MAX_SPEECH_CHARS {
            return Err(GatewayError::validation(
                format!("text must be at most {MAX_SPEECH_CHARS} characters, got {chars}"),
                Some("text".to_string()),
                "text_too_long",
            ));
        }
        let voice_ok = !self.voice_id.is_empty()
            && self.voice_id.len() <= 64
            && self
                .voice_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !voice_ok {
            return Err(GatewayError::validation(
                "voice_id must be 1-64 characters of [A-Za-z0-9_-]",
                Some("voice_id".to_string()),
                "invalid_voice_id",
            ));
        }
        Ok(())
    }
}

/// Synthesized audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechAudio {
    /// Encoded audio bytes
    pub audio: Bytes,
    /// MIME type reported by the service
    pub content_type: String,
}
