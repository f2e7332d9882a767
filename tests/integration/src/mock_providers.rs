//! Controllable collaborators and mock HTTP services for integration tests

use async_trait::async_trait;
use gateway_core::{
    CompletionRequest, CompletionResponse, CompletionService, Credential, Dependency,
    GatewayError, SecretName, SecretSource, SpeechAudio, SpeechRequest, SpeechService,
};
use gateway_providers::InMemorySecretSource;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Take one unit from a countdown, returning whether one was left
fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Secret store whose latency and reachability can be changed mid-test
#[derive(Default)]
pub struct ControlledSecretStore {
    store: InMemorySecretSource,
    fetches: AtomicU32,
    delay: Mutex<Duration>,
    unreachable: AtomicBool,
}

impl ControlledSecretStore {
    /// Empty store
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Store holding the gateway's usual secrets
    pub fn with_defaults() -> Arc<Self> {
        let store = Self::new();
        store.insert(crate::TOKEN_KEY_NAME, crate::TOKEN_KEY);
        store.insert(crate::COMPLETION_KEY_NAME, "sk-completion-1");
        store.insert(crate::SPEECH_KEY_NAME, "xi-speech-1");
        store
    }

    /// Set or rotate a secret
    pub fn insert(&self, name: &str, value: impl Into<Vec<u8>>) {
        self.store.insert(crate::secret(name), value);
    }

    /// Delete a secret
    pub fn remove(&self, name: &str) -> bool {
        self.store.remove(&crate::secret(name))
    }

    /// Delay every fetch
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Make every fetch fail as if the store were down
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Fetches received, including failed ones
    pub fn fetches(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretSource for ControlledSecretStore {
    async fn fetch(&self, name: &SecretName) -> Result<Vec<u8>, GatewayError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(GatewayError::from_status(
                Dependency::SecretStore,
                503,
                "secret store unreachable",
            ));
        }
        self.store.fetch(name).await
    }

    fn name(&self) -> &str {
        "controlled"
    }
}

/// Completion service that fails on command
#[derive(Default)]
pub struct ScriptedCompletion {
    calls: AtomicU32,
    failures_left: AtomicU32,
    failing: AtomicBool,
    delay: Mutex<Duration>,
    keys_seen: Mutex<Vec<String>>,
}

impl ScriptedCompletion {
    /// Healthy service
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `count` calls with a 503
    pub fn fail_next(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Fail every call until switched back
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delay every call
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Calls received
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Credentials presented, in call order
    pub fn keys_seen(&self) -> Vec<String> {
        self.keys_seen.lock().clone()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(
        &self,
        credential: &Credential,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, GatewayError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.keys_seen
            .lock()
            .push(credential.expose_str().unwrap_or_default().to_string());

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) || take_one(&self.failures_left) {
            return Err(GatewayError::from_status(
                Dependency::CompletionService,
                503,
                "model overloaded",
            ));
        }

        let last = request
            .messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        Ok(CompletionResponse {
            text: format!("reply {call} to '{last}'"),
            model: "scripted".to_string(),
            usage: None,
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Speech service recording the voices it was asked for
#[derive(Default)]
pub struct RecordingSpeech {
    voices: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl RecordingSpeech {
    /// Healthy service
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail every call until switched back
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Voices requested, in call order
    pub fn voices(&self) -> Vec<String> {
        self.voices.lock().clone()
    }
}

#[async_trait]
impl SpeechService for RecordingSpeech {
    async fn synthesize(
        &self,
        _credential: &Credential,
        request: &SpeechRequest,
    ) -> Result<SpeechAudio, GatewayError> {
        self.voices.lock().push(request.voice_id.clone());
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::from_status(Dependency::SpeechService, 500, "synthesis failed"));
        }
        Ok(SpeechAudio {
            audio: request.text.as_bytes().to_vec().into(),
            content_type: "audio/mpeg".to_string(),
        })
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Mock OpenAI-compatible completion endpoint
pub struct MockCompletionApi {
    /// The underlying mock server
    pub server: MockServer,
}

impl MockCompletionApi {
    /// Start a new mock server
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Base URL to configure the client with
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Answer requests bearing `api_key` with `content`
    pub async fn reply_for_key(&self, api_key: &str, content: &str) {
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", format!("Bearer {api_key}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(crate::chat_completion_body(content)))
            .mount(&self.server)
            .await;
    }

    /// Reject every request not matched by an earlier mock
    pub async fn reject_others(&self) {
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}
            })))
            .mount(&self.server)
            .await;
    }

    /// Answer every request with `status`, expecting exactly `times` calls
    pub async fn fail_with(&self, status: u16, times: u64) {
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "error": {"message": "The server had an error", "type": "server_error"}
            })))
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// Requests received so far
    pub async fn call_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map_or(0, |requests| requests.len())
    }
}

/// Mock speech synthesis endpoint
pub struct MockSpeechApi {
    /// The underlying mock server
    pub server: MockServer,
}

impl MockSpeechApi {
    /// Start a new mock server
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Base URL to configure the client with
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Return `audio` for any voice
    pub async fn reply_with_audio(&self, audio: &[u8]) {
        Mock::given(method("POST"))
            .and(path_regex(r"^/v1/text-to-speech/[A-Za-z0-9_-]+$"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "audio/mpeg")
                    .set_body_bytes(audio.to_vec()),
            )
            .mount(&self.server)
            .await;
    }
}

/// Mock identity provider publishing a JWKS document
pub struct MockIdentityProvider {
    /// The underlying mock server
    pub server: MockServer,
}

impl MockIdentityProvider {
    /// Path the key set is served from
    pub const JWKS_PATH: &'static str = "/.well-known/jwks.json";

    /// Start a new mock server
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Full URL of the key set
    pub fn jwks_url(&self) -> String {
        format!("{}{}", self.server.uri(), Self::JWKS_PATH)
    }

    /// Publish `document`, expecting exactly `times` fetches
    pub async fn publish(&self, document: Value, times: u64) {
        Mock::given(method("GET"))
            .and(path(Self::JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(document))
            .expect(times)
            .mount(&self.server)
            .await;
    }
}
