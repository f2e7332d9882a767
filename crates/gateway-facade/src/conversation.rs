//! Chat turns over the conversation store.

use crate::error::{AccessError, AccessResult};
use crate::gateway::Gateway;
use gateway_core::request::MAX_CONVERSATION_MESSAGES;
use gateway_core::{
    validate_message_text, CallerContext, ChatMessage, CompletionRequest, ConversationStore,
    GatewayError,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Reply to one chat turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatReply {
    /// Assistant text
    pub text: String,
    /// Model that answered
    pub model: String,
    /// Guest messages left in the session, `None` for authenticated callers
    pub remaining_guest_messages: Option<u32>,
}

/// Runs chat turns: history in, completion through the gateway, history out
pub struct ConversationService {
    gateway: Arc<Gateway>,
    store: Arc<dyn ConversationStore>,
    system_prompt: Option<String>,
}

impl ConversationService {
    /// Create a service
    #[must_use]
    pub fn new(gateway: Arc<Gateway>, store: Arc<dyn ConversationStore>) -> Self {
        Self {
            gateway,
            store,
            system_prompt: None,
        }
    }

    /// Prepend a system prompt to every conversation
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt.filter(|p| !p.trim().is_empty());
        self
    }

    /// The gateway in use
    #[must_use]
    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Send one user message and return the assistant reply.
    ///
    /// Both messages are appended to the session together, and only after a
    /// reply was produced, so a failed turn leaves the history untouched and
    /// concurrent turns never interleave.
    ///
    /// # Errors
    /// Any façade error of the completion call, or `DependencyUnavailable`
    /// when the conversation store fails
    pub async fn send(&self, caller: &CallerContext, text: &str) -> AccessResult<ChatReply> {
        validate_message_text(text)?;
        let session = caller.session_id();

        let history = self.store.read(session).await.map_err(store_error)?;
        let user_message = ChatMessage::user(text);
        let request = CompletionRequest::new(self.context(&history, &user_message));

        let response = self.gateway.call_completion(caller, request).await?;

        let assistant_message = ChatMessage::assistant(response.text.clone());
        self.store
            .append_all(session, vec![user_message, assistant_message])
            .await
            .map_err(store_error)?;

        let remaining_guest_messages = caller.is_guest().then(|| {
            let quota = self.gateway.quota();
            quota
                .usage(caller.quota_key())
                .map_or(quota.limit(), |usage| usage.limit.saturating_sub(usage.used))
        });
        debug!(session = %session, remaining = ?remaining_guest_messages, "Chat turn completed");

        Ok(ChatReply {
            text: response.text,
            model: response.model,
            remaining_guest_messages,
        })
    }

    /// Messages of the caller's session, oldest first
    ///
    /// # Errors
    /// `DependencyUnavailable` when the conversation store fails
    pub async fn history(&self, caller: &CallerContext) -> AccessResult<Vec<ChatMessage>> {
        self.store
            .read(caller.session_id())
            .await
            .map_err(store_error)
    }

    fn context(&self, history: &[ChatMessage], user_message: &ChatMessage) -> Vec<ChatMessage> {
        let reserved = 1 + usize::from(self.system_prompt.is_some());
        let keep = MAX_CONVERSATION_MESSAGES.saturating_sub(reserved);
        let skip = history.len().saturating_sub(keep);

        self.system_prompt
            .iter()
            .map(ChatMessage::system)
            .chain(
                history
                    .iter()
                    .skip(skip)
                    .filter(|m| m.role != gateway_core::MessageRole::System)
                    .cloned(),
            )
            .chain(std::iter::once(user_message.clone()))
            .collect()
    }
}

fn store_error(error: GatewayError) -> AccessError {
    warn!(error = %error, "Conversation store failed");
    AccessError::from(error)
}

impl std::fmt::Debug for ConversationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationService")
            .field("system_prompt", &self.system_prompt.is_some())
            .finish_non_exhaustive()
    }
}
