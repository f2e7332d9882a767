//! Configuration error types.

use std::path::PathBuf;

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file extension is not a supported format
    #[error("Unsupported config format: {0} (expected .yaml, .yml or .toml)")]
    UnsupportedFormat(String),

    /// The file could not be parsed
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// An environment override had an unusable value
    #[error("Invalid value for {key}: {message}")]
    Env {
        /// Environment variable
        key: String,
        /// What was wrong
        message: String,
    },

    /// One or more settings are invalid
    #[error("Invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

impl ConfigError {
    /// Create an env override error
    pub fn env(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Env {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Problems reported by validation, if this is a validation error
    #[must_use]
    pub fn problems(&self) -> &[String] {
        match self {
            Self::Invalid(problems) => problems,
            _ => &[],
        }
    }
}
