//! Bridges invoker attempt outcomes into Prometheus metrics.

use gateway_core::Dependency;
use gateway_resilience::{AttemptOutcome, BreakerSet, CallObserver};
use gateway_telemetry::GatewayMetrics;
use std::sync::Arc;
use tracing::trace;

/// Records every attempt and republishes the breaker state gauge
#[derive(Debug, Clone)]
pub struct MetricsObserver {
    metrics: GatewayMetrics,
    breakers: Arc<BreakerSet>,
}

impl MetricsObserver {
    /// Create an observer over the invoker's breakers
    #[must_use]
    pub fn new(metrics: GatewayMetrics, breakers: Arc<BreakerSet>) -> Self {
        Self { metrics, breakers }
    }

    /// Publish the current state of one breaker
    pub fn publish_state(&self, dependency: Dependency) {
        let state = self.breakers.get(dependency).state();
        self.metrics.set_breaker_state(dependency, state.as_gauge());
    }
}

impl CallObserver for MetricsObserver {
    fn on_attempt(&self, dependency: Dependency, outcome: AttemptOutcome) {
        trace!(dependency = %dependency, outcome = outcome.as_str(), "Attempt finished");
        self.metrics.record_dependency_call(dependency, outcome.as_str());
        self.publish_state(dependency);
    }
}
