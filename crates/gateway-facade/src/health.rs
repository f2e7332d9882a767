//! Health reporting.
//!
//! Derived from breaker snapshots, so reading health never touches a
//! dependency.

use gateway_core::{Criticality, Dependency};
use gateway_resilience::{BreakerSnapshot, CircuitState};
use serde::Serialize;
use std::time::Duration;

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Fully healthy
    Healthy,
    /// A degradable dependency is unavailable; fallbacks apply
    Degraded,
    /// A fail-closed dependency is unavailable
    Unhealthy,
}

impl HealthStatus {
    /// Check if status represents a serving state
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }

    /// Get HTTP status code for this health status
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::Healthy | Self::Degraded => 200,
            Self::Unhealthy => 503,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health of one dependency
#[derive(Debug, Clone, Serialize)]
pub struct DependencyHealth {
    /// Dependency
    pub dependency: Dependency,
    /// Breaker state name
    pub state: String,
    /// Derived status
    pub status: HealthStatus,
    /// Consecutive failures counted by the breaker
    pub consecutive_failures: u32,
    /// Reset timeout currently in force, in milliseconds
    pub reset_timeout_ms: u64,
    /// Time until a probe is admitted, when open
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_in_ms: Option<u64>,
    /// Failure rate over all recorded outcomes
    pub failure_rate: f64,
    /// Calls refused without an attempt
    pub rejected_calls: u64,
}

impl DependencyHealth {
    /// Build from a breaker snapshot
    #[must_use]
    pub fn from_snapshot(snapshot: &BreakerSnapshot, now: tokio::time::Instant) -> Self {
        let status = match (snapshot.state, snapshot.dependency.criticality()) {
            (CircuitState::Closed, _) => HealthStatus::Healthy,
            (_, Criticality::Degradable) => HealthStatus::Degraded,
            (_, Criticality::FailClosed) => HealthStatus::Unhealthy,
        };
        let retry_in_ms = match (snapshot.state, snapshot.opened_at) {
            (CircuitState::Open, Some(opened)) => Some(
                (opened + snapshot.current_reset_timeout)
                    .saturating_duration_since(now)
                    .as_millis() as u64,
            ),
            _ => None,
        };

        Self {
            dependency: snapshot.dependency,
            state: snapshot.state.to_string(),
            status,
            consecutive_failures: snapshot.consecutive_failures,
            reset_timeout_ms: snapshot.current_reset_timeout.as_millis() as u64,
            retry_in_ms,
            failure_rate: snapshot.failure_rate(),
            rejected_calls: snapshot.rejected_calls,
        }
    }
}

/// Aggregated health report
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Overall status
    pub status: HealthStatus,
    /// Service version
    pub version: String,
    /// Gateway uptime in seconds
    pub uptime_seconds: u64,
    /// Per-dependency health
    pub dependencies: Vec<DependencyHealth>,
    /// Guest sessions with a quota counter
    pub tracked_guest_sessions: usize,
    /// Timestamp
    pub timestamp: String,
}

impl HealthReport {
    /// Aggregate per-dependency health
    #[must_use]
    pub fn new(dependencies: Vec<DependencyHealth>, uptime: Duration, tracked_guest_sessions: usize) -> Self {
        let status = dependencies
            .iter()
            .map(|d| d.status)
            .fold(HealthStatus::Healthy, |worst, status| match (worst, status) {
                (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
                (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
                _ => HealthStatus::Healthy,
            });

        Self {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime.as_secs(),
            dependencies,
            tracked_guest_sessions,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Health of one dependency
    #[must_use]
    pub fn dependency(&self, dependency: Dependency) -> Option<&DependencyHealth> {
        self.dependencies.iter().find(|d| d.dependency == dependency)
    }
}
