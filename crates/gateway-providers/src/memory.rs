//! In-process collaborators for local runs and tests.

use async_trait::async_trait;
use dashmap::DashMap;
use gateway_core::{ChatMessage, ConversationStore, Dependency, GatewayError, SecretName, SecretSource};
use std::sync::atomic::{AtomicU64, Ordering};

/// Secret store held in memory
#[derive(Debug, Default)]
pub struct InMemorySecretSource {
    secrets: DashMap<SecretName, Vec<u8>>,
    fetches: AtomicU64,
}

impl InMemorySecretSource {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a secret
    #[must_use]
    pub fn with_secret(self, name: SecretName, value: impl Into<Vec<u8>>) -> Self {
        self.insert(name, value);
        self
    }

    /// Set or rotate a secret
    pub fn insert(&self, name: SecretName, value: impl Into<Vec<u8>>) {
        self.secrets.insert(name, value.into());
    }

    /// Delete a secret
    pub fn remove(&self, name: &SecretName) -> bool {
        self.secrets.remove(name).is_some()
    }

    /// Number of fetches served, including misses
    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SecretSource for InMemorySecretSource {
    async fn fetch(&self, name: &SecretName) -> Result<Vec<u8>, GatewayError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.secrets
            .get(name)
            .map(|value| value.clone())
            .ok_or_else(|| GatewayError::not_found(Dependency::SecretStore, name.as_str()))
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

/// Conversation log held in memory
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    sessions: DashMap<String, Vec<ChatMessage>>,
}

impl InMemoryConversationStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions with at least one message
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn append(&self, session_id: &str, message: ChatMessage) -> Result<(), GatewayError> {
        self.sessions
            .entry(session_id.to_string())
            .or_default()
            .push(message);
        Ok(())
    }

    async fn append_all(&self, session_id: &str, messages: Vec<ChatMessage>) -> Result<(), GatewayError> {
        self.sessions
            .entry(session_id.to_string())
            .or_default()
            .extend(messages);
        Ok(())
    }

    async fn read(&self, session_id: &str) -> Result<Vec<ChatMessage>, GatewayError> {
        Ok(self
            .sessions
            .get(session_id)
            .map(|messages| messages.clone())
            .unwrap_or_default())
    }
}
