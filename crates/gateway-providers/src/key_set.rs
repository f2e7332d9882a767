//! Identity provider key-set source.
//!
//! Fetches the published JWKS document so the credential cache can hold it
//! like any other short-lived material. Fetches are accounted to the token
//! validator dependency.

use crate::completion::map_transport_error;
use async_trait::async_trait;
use gateway_core::{Dependency, GatewayError, SecretName, SecretSource};
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const DEPENDENCY: Dependency = Dependency::TokenValidator;

/// HTTP source of a JWKS document
#[derive(Debug, Clone)]
pub struct HttpKeySetSource {
    url: url::Url,
    client: Client,
}

impl HttpKeySetSource {
    /// Create a source for the given document URL
    ///
    /// # Errors
    /// Returns error if the URL is invalid or the HTTP client cannot be built
    pub fn new(url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let url = url::Url::parse(url)
            .map_err(|e| GatewayError::configuration(format!("invalid JWKS URL '{url}': {e}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::internal(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { url, client })
    }

    /// Document URL
    #[must_use]
    pub fn url(&self) -> &str {
        self.url.as_str()
    }
}

#[derive(Deserialize)]
struct KeySetShape {
    keys: Vec<serde_json::Value>,
}

#[async_trait]
impl SecretSource for HttpKeySetSource {
    async fn fetch(&self, name: &SecretName) -> Result<Vec<u8>, GatewayError> {
        debug!(document = %name, url = %self.url, "Fetching key set");

        let response = self
            .client
            .get(self.url.clone())
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| map_transport_error(DEPENDENCY, &e))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(GatewayError::not_found(DEPENDENCY, name.as_str()));
        }
        if !status.is_success() {
            return Err(GatewayError::from_status(
                DEPENDENCY,
                status.as_u16(),
                format!("key set fetch returned HTTP {status}"),
            ));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| map_transport_error(DEPENDENCY, &e))?;

        // Reject garbage here so a bad document is never cached
        let shape: KeySetShape = serde_json::from_slice(&body).map_err(|e| {
            GatewayError::dependency(DEPENDENCY, format!("malformed key set: {e}"), None, true)
        })?;
        if shape.keys.is_empty() {
            return Err(GatewayError::dependency(DEPENDENCY, "key set is empty", None, true));
        }

        Ok(body.to_vec())
    }

    fn name(&self) -> &str {
        "http-jwks"
    }
}
