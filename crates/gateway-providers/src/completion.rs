//! OpenAI-compatible chat completion client.
//!
//! Speaks the `/v1/chat/completions` wire format with a bearer credential
//! supplied per call by the gateway, so key rotation never requires
//! rebuilding the client.

use async_trait::async_trait;
use gateway_core::{
    ChatMessage, CompletionRequest, CompletionResponse, CompletionService, Credential, Dependency,
    GatewayError, Usage,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const DEPENDENCY: Dependency = Dependency::CompletionService;

/// Completion client configuration
#[derive(Debug, Clone)]
pub struct HttpCompletionConfig {
    /// Base URL, e.g. `https://api.openai.com`
    pub base_url: String,
    /// Model used when the request does not name one
    pub default_model: String,
    /// Transport-level timeout; the invoker applies its own per-attempt deadline
    pub timeout: Duration,
}

impl HttpCompletionConfig {
    /// Create a configuration
    #[must_use]
    pub fn new(base_url: impl Into<String>, default_model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            default_model: default_model.into(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Set the transport timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// HTTP completion service client
#[derive(Debug, Clone)]
pub struct HttpCompletionClient {
    config: HttpCompletionConfig,
    client: Client,
}

impl HttpCompletionClient {
    /// Create a client
    ///
    /// # Errors
    /// Returns error if the base URL is invalid or the HTTP client cannot be built
    pub fn new(config: HttpCompletionConfig) -> Result<Self, GatewayError> {
        url::Url::parse(&config.base_url).map_err(|e| {
            GatewayError::configuration(format!(
                "invalid completion base URL '{}': {e}",
                config.base_url
            ))
        })?;

        let client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(16)
            .build()
            .map_err(|e| GatewayError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    /// Client configuration
    #[must_use]
    pub fn config(&self) -> &HttpCompletionConfig {
        &self.config
    }

    fn transform_request(&self, request: &CompletionRequest) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: request
                .model
                .clone()
                .unwrap_or_else(|| self.config.default_model.clone()),
            messages: request.messages.iter().map(WireMessage::from_message).collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }

    fn transform_response(response: ChatCompletionResponse) -> Result<CompletionResponse, GatewayError> {
        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                GatewayError::dependency(DEPENDENCY, "response contained no choices", None, false)
            })?;

        Ok(CompletionResponse {
            text,
            model: response.model,
            usage: response.usage.map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            }),
        })
    }
}

/// Map a non-success response to a gateway error
fn map_error_response(status: u16, body: &str) -> GatewayError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| format!("HTTP {status}"));
    GatewayError::from_status(DEPENDENCY, status, message)
}

pub(crate) fn map_transport_error(dependency: Dependency, err: &reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        return GatewayError::dependency(dependency, "transport timeout", None, true);
    }
    GatewayError::dependency(dependency, format!("request failed: {err}"), None, true)
}

#[async_trait]
impl CompletionService for HttpCompletionClient {
    async fn complete(
        &self,
        credential: &Credential,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, GatewayError> {
        let body = self.transform_request(request);
        let url = self.config.completions_url();

        debug!(model = %body.model, messages = body.messages.len(), "Sending completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(credential.expose_str()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error(DEPENDENCY, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Completion service returned an error");
            return Err(map_error_response(status.as_u16(), &body));
        }

        let parsed: ChatCompletionResponse = response.json().await.map_err(|e| {
            GatewayError::dependency(DEPENDENCY, format!("Failed to parse response: {e}"), None, false)
        })?;

        Self::transform_response(parsed)
    }

    fn name(&self) -> &str {
        "http-completion"
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

impl WireMessage {
    fn from_message(message: &ChatMessage) -> Self {
        Self {
            role: message.role.to_string(),
            content: message.content.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    model: String,
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}
