//! Resilient invocation of outbound dependency calls.
//!
//! Every attempt goes through the dependency's circuit breaker and runs under
//! a per-attempt timeout. Transient failures are retried with backoff. The
//! breaker is consulted before each attempt, so a breaker that opens while
//! retries are pending aborts the remaining attempts.

use crate::circuit_breaker::{BreakerSet, CircuitBreakerConfig};
use crate::retry::RetryPolicy;
use gateway_core::{Dependency, GatewayError, PerDependency};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Observes the outcome of every attempt
pub trait CallObserver: Send + Sync {
    /// One attempt finished with the given outcome label
    fn on_attempt(&self, dependency: Dependency, outcome: AttemptOutcome);
}

/// Outcome of a single attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The dependency answered successfully
    Success,
    /// The dependency answered with an error that does not indicate ill health
    Rejected,
    /// The dependency failed
    Failure,
    /// The attempt timed out
    Timeout,
    /// The breaker refused the attempt
    ShortCircuited,
}

impl AttemptOutcome {
    /// Metric label
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Rejected => "rejected",
            Self::Failure => "failure",
            Self::Timeout => "timeout",
            Self::ShortCircuited => "short_circuited",
        }
    }
}

/// Retry and timeout policy of one dependency
#[derive(Debug, Clone)]
pub struct DependencyPolicy {
    /// Breaker configuration
    pub breaker: CircuitBreakerConfig,
    /// Retry policy
    pub retry: RetryPolicy,
    /// Timeout of a single attempt
    pub attempt_timeout: Duration,
}

impl Default for DependencyPolicy {
    fn default() -> Self {
        Self {
            breaker: CircuitBreakerConfig::default(),
            retry: RetryPolicy::default(),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

/// Wraps outbound calls with breaker, timeout, and retry handling
pub struct ResilientInvoker {
    breakers: Arc<BreakerSet>,
    policies: PerDependency<DependencyPolicy>,
    observer: Option<Arc<dyn CallObserver>>,
}

impl ResilientInvoker {
    /// Create an invoker with one breaker per dependency
    #[must_use]
    pub fn new(policies: PerDependency<DependencyPolicy>) -> Self {
        let breakers = Arc::new(BreakerSet::new(&policies.map(|_, p| p.breaker.clone())));
        Self {
            breakers,
            policies,
            observer: None,
        }
    }

    /// Report attempt outcomes to an observer
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn CallObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Breakers of all dependencies
    #[must_use]
    pub fn breakers(&self) -> &Arc<BreakerSet> {
        &self.breakers
    }

    /// Policy of a dependency
    #[must_use]
    pub fn policy(&self, dependency: Dependency) -> &DependencyPolicy {
        self.policies.get(dependency)
    }

    /// Invoke `operation` using the dependency's attempt timeout
    ///
    /// # Errors
    /// Returns `BreakerOpen` when the breaker refuses the call, otherwise the
    /// last attempt's error
    pub async fn invoke<F, Fut, T>(&self, dependency: Dependency, operation: F) -> Result<T, GatewayError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let timeout = self.policies.get(dependency).attempt_timeout;
        self.invoke_with_timeout(dependency, timeout, operation).await
    }

    /// Invoke `operation` with an explicit per-attempt timeout
    ///
    /// # Errors
    /// Returns `BreakerOpen` when the breaker refuses the call, otherwise the
    /// last attempt's error
    pub async fn invoke_with_timeout<F, Fut, T>(
        &self,
        dependency: Dependency,
        timeout: Duration,
        operation: F,
    ) -> Result<T, GatewayError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let breaker = self.breakers.get(dependency);
        let retry = &self.policies.get(dependency).retry;
        let mut attempt: u32 = 0;

        loop {
            let permit = match breaker.try_acquire() {
                Ok(permit) => permit,
                Err(error) => {
                    self.observe(dependency, AttemptOutcome::ShortCircuited);
                    if attempt > 0 {
                        warn!(
                            dependency = %dependency,
                            attempt,
                            "Circuit opened while retrying, abandoning call"
                        );
                    }
                    return Err(error);
                }
            };

            let error = match tokio::time::timeout(timeout, operation()).await {
                Ok(Ok(value)) => {
                    permit.record_success();
                    self.observe(dependency, AttemptOutcome::Success);
                    if attempt > 0 {
                        debug!(dependency = %dependency, attempt, "Retry succeeded");
                    }
                    return Ok(value);
                }
                Ok(Err(error)) if error.is_dependency_failure() => {
                    permit.record_failure();
                    self.observe(dependency, AttemptOutcome::Failure);
                    error
                }
                Ok(Err(error)) => {
                    // Caller-side error: neither health nor ill health
                    permit.release();
                    self.observe(dependency, AttemptOutcome::Rejected);
                    return Err(error);
                }
                Err(_) => {
                    permit.record_failure();
                    self.observe(dependency, AttemptOutcome::Timeout);
                    GatewayError::Timeout { dependency, timeout }
                }
            };

            if !retry.is_retryable(&error) || attempt >= retry.max_retries() {
                if attempt > 0 {
                    warn!(
                        dependency = %dependency,
                        attempts = attempt + 1,
                        error = %error,
                        "Retries exhausted"
                    );
                }
                return Err(error);
            }

            if !breaker.would_admit() {
                self.observe(dependency, AttemptOutcome::ShortCircuited);
                warn!(
                    dependency = %dependency,
                    attempts = attempt + 1,
                    "Circuit opened while retrying, abandoning call"
                );
                return Err(GatewayError::BreakerOpen { dependency });
            }

            let delay = retry.delay_for_attempt(attempt);
            warn!(
                dependency = %dependency,
                attempt = attempt + 1,
                max_retries = retry.max_retries(),
                delay_ms = delay.as_millis(),
                error = %error,
                "Retrying after error"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn observe(&self, dependency: Dependency, outcome: AttemptOutcome) {
        if let Some(observer) = &self.observer {
            observer.on_attempt(dependency, outcome);
        }
    }
}

impl std::fmt::Debug for ResilientInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientInvoker")
            .field("breakers", &self.breakers)
            .field("policies", &self.policies)
            .finish_non_exhaustive()
    }
}
