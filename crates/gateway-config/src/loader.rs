//! Loading configuration from files and the environment.

use crate::error::{ConfigError, Result};
use crate::settings::{GatewayConfig, LogFormat, VerificationSettings};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Prefix of configuration environment overrides
pub const ENV_PREFIX: &str = "GATEWAY_";

impl GatewayConfig {
    /// Parse a configuration file, choosing YAML or TOML by extension
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub async fn from_file(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        match extension.as_str() {
            "yaml" | "yml" => Self::from_yaml(&contents),
            "toml" => Self::from_toml(&contents),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }

    /// Parse YAML text
    ///
    /// # Errors
    /// Returns error on malformed input
    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Parse TOML text
    ///
    /// # Errors
    /// Returns error on malformed input
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `GATEWAY_*` overrides from the given variables
    ///
    /// # Errors
    /// Returns error if a recognised variable has an unusable value
    pub fn apply_env_overrides<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };

            match name {
                "LOG_LEVEL" => self.logging.level = value,
                "LOG_FORMAT" => {
                    self.logging.format = value
                        .parse::<LogFormat>()
                        .map_err(|e| ConfigError::env(&key, e))?;
                }
                "QUOTA_GUEST_MESSAGE_LIMIT" => {
                    self.quota.guest_message_limit = value
                        .parse()
                        .map_err(|e| ConfigError::env(&key, format!("{e}")))?;
                }
                "QUOTA_WINDOW" => self.quota.window = Some(parse_duration(&key, &value)?),
                "KEY_ROTATION_REFRESH_INTERVAL" => {
                    self.auth.rotation_refresh_interval = parse_duration(&key, &value)?;
                }
                "REQUEST_DEADLINE" => {
                    self.facade.request_deadline = parse_duration(&key, &value)?;
                }
                "COMPLETION_BASE_URL" => self.providers.completion.base_url = value,
                "COMPLETION_MODEL" => self.providers.completion.model = value,
                "SPEECH_BASE_URL" => self.providers.speech.base_url = value,
                "SECRET_ENV_PREFIX" => self.providers.secret_store.env_prefix = value,
                "JWKS_URL" => match &mut self.auth.verification {
                    VerificationSettings::Jwks { url, .. } => *url = value,
                    VerificationSettings::SharedSecret { .. } => {
                        self.auth.verification = VerificationSettings::Jwks {
                            url: value,
                            cache_ttl: Duration::from_secs(3600),
                            logical_name: "identity-provider/jwks".to_string(),
                        };
                    }
                },
                _ => continue,
            }

            debug!(variable = %key, "Applied environment override");
        }

        Ok(())
    }
}

fn parse_duration(key: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value).map_err(|e| ConfigError::env(key, e.to_string()))
}

/// Load configuration: file (if given) or defaults, then environment
/// overrides, then validation
///
/// # Errors
/// Returns error if loading, overriding, or validation fails
pub async fn load_config(path: Option<&Path>) -> Result<GatewayConfig> {
    let mut config = match path {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration file");
            GatewayConfig::from_file(path).await?
        }
        None => GatewayConfig::default(),
    };

    config.apply_env_overrides(std::env::vars())?;
    config.validate()?;

    Ok(config)
}
