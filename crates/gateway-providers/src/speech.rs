//! Text-to-speech client.
//!
//! Posts text to `/v1/text-to-speech/{voice_id}` and returns the encoded
//! audio. The API key travels in the `xi-api-key` header.

use crate::completion::map_transport_error;
use async_trait::async_trait;
use gateway_core::{Credential, Dependency, GatewayError, SpeechAudio, SpeechRequest, SpeechService};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const DEPENDENCY: Dependency = Dependency::SpeechService;
const API_KEY_HEADER: &str = "xi-api-key";

/// Speech client configuration
#[derive(Debug, Clone)]
pub struct HttpSpeechConfig {
    /// Base URL, e.g. `https://api.elevenlabs.io`
    pub base_url: String,
    /// Synthesis model
    pub model_id: String,
    /// Requested output format, sent as a query parameter
    pub output_format: String,
    /// Transport-level timeout
    pub timeout: Duration,
}

impl HttpSpeechConfig {
    /// Create a configuration
    #[must_use]
    pub fn new(base_url: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model_id: model_id.into(),
            output_format: "mp3_44100_128".to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Set the output format
    #[must_use]
    pub fn with_output_format(mut self, format: impl Into<String>) -> Self {
        self.output_format = format.into();
        self
    }

    /// Set the transport timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// HTTP speech service client
#[derive(Debug, Clone)]
pub struct HttpSpeechClient {
    config: HttpSpeechConfig,
    base_url: url::Url,
    client: Client,
}

impl HttpSpeechClient {
    /// Create a client
    ///
    /// # Errors
    /// Returns error if the base URL is invalid or the HTTP client cannot be built
    pub fn new(config: HttpSpeechConfig) -> Result<Self, GatewayError> {
        let base_url = url::Url::parse(&config.base_url).map_err(|e| {
            GatewayError::configuration(format!("invalid speech base URL '{}': {e}", config.base_url))
        })?;

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            config,
            base_url,
            client,
        })
    }

    fn synthesis_url(&self, voice_id: &str) -> Result<url::Url, GatewayError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| GatewayError::configuration("speech base URL cannot be a base"))?
            .pop_if_empty()
            .extend(["v1", "text-to-speech", voice_id]);
        url.query_pairs_mut()
            .append_pair("output_format", &self.config.output_format);
        Ok(url)
    }
}

#[async_trait]
impl SpeechService for HttpSpeechClient {
    async fn synthesize(
        &self,
        credential: &Credential,
        request: &SpeechRequest,
    ) -> Result<SpeechAudio, GatewayError> {
        let url = self.synthesis_url(&request.voice_id)?;
        debug!(voice = %request.voice_id, chars = request.text.chars().count(), "Sending speech request");

        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, credential.expose_str()?)
            .json(&SynthesisRequest {
                text: &request.text,
                model_id: &self.config.model_id,
            })
            .send()
            .await
            .map_err(|e| map_transport_error(DEPENDENCY, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.detail.message)
                .unwrap_or_else(|_| format!("HTTP {status}"));
            warn!(status = status.as_u16(), "Speech service returned an error");
            return Err(GatewayError::from_status(DEPENDENCY, status.as_u16(), message));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("audio/mpeg")
            .to_string();
        let audio = response.bytes().await.map_err(|e| map_transport_error(DEPENDENCY, &e))?;
        if audio.is_empty() {
            return Err(GatewayError::dependency(DEPENDENCY, "empty audio body", None, true));
        }

        Ok(SpeechAudio {
            audio,
            content_type,
        })
    }

    fn name(&self) -> &str {
        "http-speech"
    }
}

#[derive(Debug, Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    model_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    detail: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}
