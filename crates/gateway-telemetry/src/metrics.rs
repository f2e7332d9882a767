//! Prometheus metrics.
//!
//! The registry is owned by the gateway instance rather than global, so
//! several gateways (e.g. in tests) never collide.

use crate::error::TelemetryError;
use gateway_core::Dependency;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

/// Gateway metrics
#[derive(Debug, Clone)]
pub struct GatewayMetrics {
    registry: Registry,
    dependency_calls: IntCounterVec,
    breaker_state: IntGaugeVec,
    quota_rejections: IntCounter,
    access_denied: IntCounterVec,
    secret_cache: IntCounterVec,
}

impl GatewayMetrics {
    /// Create and register all metrics
    ///
    /// # Errors
    /// Returns error if a metric cannot be registered
    pub fn new() -> Result<Self, TelemetryError> {
        let registry = Registry::new();

        let dependency_calls = IntCounterVec::new(
            Opts::new(
                "gateway_dependency_calls_total",
                "Outbound call attempts by dependency and outcome",
            ),
            &["dependency", "outcome"],
        )?;
        let breaker_state = IntGaugeVec::new(
            Opts::new(
                "gateway_breaker_state",
                "Circuit breaker state (0=closed, 1=open, 2=half-open)",
            ),
            &["dependency"],
        )?;
        let quota_rejections = IntCounter::with_opts(Opts::new(
            "gateway_quota_rejections_total",
            "Guest messages rejected by the quota",
        ))?;
        let access_denied = IntCounterVec::new(
            Opts::new("gateway_access_denied_total", "Requests denied by reason"),
            &["reason"],
        )?;
        let secret_cache = IntCounterVec::new(
            Opts::new("gateway_secret_cache_total", "Secret lookups by result"),
            &["result"],
        )?;

        registry.register(Box::new(dependency_calls.clone()))?;
        registry.register(Box::new(breaker_state.clone()))?;
        registry.register(Box::new(quota_rejections.clone()))?;
        registry.register(Box::new(access_denied.clone()))?;
        registry.register(Box::new(secret_cache.clone()))?;

        for dependency in Dependency::ALL {
            breaker_state.with_label_values(&[dependency.name()]).set(0);
        }

        Ok(Self {
            registry,
            dependency_calls,
            breaker_state,
            quota_rejections,
            access_denied,
            secret_cache,
        })
    }

    /// Count one attempt against a dependency
    pub fn record_dependency_call(&self, dependency: Dependency, outcome: &str) {
        self.dependency_calls
            .with_label_values(&[dependency.name(), outcome])
            .inc();
    }

    /// Publish a breaker state (see `CircuitState::as_gauge`)
    pub fn set_breaker_state(&self, dependency: Dependency, state: i64) {
        self.breaker_state
            .with_label_values(&[dependency.name()])
            .set(state);
    }

    /// Count a guest message rejected by the quota
    pub fn record_quota_rejection(&self) {
        self.quota_rejections.inc();
    }

    /// Count a denied request
    pub fn record_access_denied(&self, reason: &str) {
        self.access_denied.with_label_values(&[reason]).inc();
    }

    /// Count a secret lookup
    pub fn record_secret_cache(&self, result: &str) {
        self.secret_cache.with_label_values(&[result]).inc();
    }

    /// Underlying registry
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the Prometheus text format
    ///
    /// # Errors
    /// Returns error if encoding fails
    pub fn render(&self) -> Result<String, TelemetryError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Encode(e.to_string()))
    }
}
