//! Test fixtures and sample data for integration tests

use gateway_config::{GatewayConfig, VerificationSettings};
use gateway_core::{ChatMessage, CompletionRequest, SecretName};
use jsonwebtoken::{encode, get_current_timestamp, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};

/// Logical name of the HMAC key callers' tokens are signed with
pub const TOKEN_KEY_NAME: &str = "auth/hmac-key";
/// HMAC key material
pub const TOKEN_KEY: &[u8] = b"integration-signing-key-000000001";
/// `TOKEN_KEY`, base64url encoded for a JWKS `oct` entry
pub const TOKEN_KEY_B64: &str = "aW50ZWdyYXRpb24tc2lnbmluZy1rZXktMDAwMDAwMDAx";

/// Logical name of the completion credential
pub const COMPLETION_KEY_NAME: &str = "completion/api-key";
/// Logical name of the speech credential
pub const SPEECH_KEY_NAME: &str = "speech/api-key";

/// Audience every fixture token carries
pub const AUDIENCE: &str = "companion";

/// Secret name from a literal
pub fn secret(name: &str) -> SecretName {
    SecretName::new(name).expect("valid secret name")
}

/// Configuration verifying tokens with the shared HMAC key in the secret
/// store. Retries are disabled so every attempt is visible to the tests.
pub fn shared_secret_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.auth.verification = VerificationSettings::SharedSecret {
        secret: TOKEN_KEY_NAME.to_string(),
    };
    config.auth.algorithms = vec!["HS256".to_string()];
    config.auth.audiences = vec![AUDIENCE.to_string()];
    for settings in [
        &mut config.dependencies.secret_store,
        &mut config.dependencies.token_validator,
        &mut config.dependencies.completion_service,
        &mut config.dependencies.speech_service,
    ] {
        settings.retry.max_retries = 0;
    }
    config
}

/// Configuration verifying tokens against a JWKS document at `jwks_url`
pub fn jwks_config(jwks_url: impl Into<String>) -> GatewayConfig {
    let mut config = shared_secret_config();
    config.auth.verification = VerificationSettings::Jwks {
        url: jwks_url.into(),
        cache_ttl: std::time::Duration::from_secs(600),
        logical_name: "identity-provider/jwks".to_string(),
    };
    config
}

/// Claims of a signed-in user, valid for an hour
pub fn user_claims(subject: &str, session: &str) -> Value {
    let now = get_current_timestamp();
    json!({
        "sub": subject,
        "sid": session,
        "iat": now,
        "exp": now + 3600,
        "aud": AUDIENCE,
    })
}

/// Sign `claims` with [`TOKEN_KEY`]
pub fn signed_token(kid: Option<&str>, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = kid.map(str::to_string);
    encode(&header, claims, &EncodingKey::from_secret(TOKEN_KEY)).expect("token encodes")
}

/// JWKS document publishing [`TOKEN_KEY`] under `kid`
pub fn key_set_document(kid: &str) -> Value {
    json!({
        "keys": [{"kty": "oct", "kid": kid, "alg": "HS256", "k": TOKEN_KEY_B64}]
    })
}

/// Single user message
pub fn user_request(text: &str) -> CompletionRequest {
    CompletionRequest::new(vec![ChatMessage::user(text)])
}

/// Body of an OpenAI-compatible chat completion
pub fn chat_completion_body(content: &str) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "model": "gpt-4o-mini",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 9, "completion_tokens": 12, "total_tokens": 21}
    })
}
