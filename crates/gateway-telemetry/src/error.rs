//! Telemetry error types.

/// Telemetry error
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to initialize logging
    #[error("Failed to initialize logging: {0}")]
    Init(String),

    /// Metric registration or encoding failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Exposition output was not UTF-8
    #[error("Metrics encoding error: {0}")]
    Encode(String),
}
