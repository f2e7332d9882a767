//! Circuit breaker pattern implementation.
//!
//! The circuit breaker prevents cascading failures by stopping calls to a
//! failing dependency and allowing it time to recover.
//!
//! - `Closed` -> `Open` when consecutive failures reach the threshold
//! - `Open` -> `HalfOpen` once the reset timeout has elapsed; exactly one
//!   probe is admitted
//! - `HalfOpen` -> `Closed` when the probe succeeds
//! - `HalfOpen` -> `Open` when the probe fails, with a grown reset timeout
//!
//! All state lives behind a single mutex per breaker, so transitions for one
//! dependency are linearizable. Every transition, including operator
//! `reset` and `force_open`, starts a new epoch; a permit settled after its
//! epoch ended only updates the totals. Time is read from
//! `tokio::time::Instant`, which a paused test runtime controls.

use gateway_core::{Dependency, GatewayError, PerDependency};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, calls flow normally
    Closed,
    /// Circuit is open, calls are rejected
    Open,
    /// Circuit is half-open, a single probe tests recovery
    HalfOpen,
}

impl CircuitState {
    /// Numeric encoding used by the metrics gauge
    #[must_use]
    pub fn as_gauge(self) -> i64 {
        match self {
            Self::Closed => 0,
            Self::Open => 1,
            Self::HalfOpen => 2,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Failures older than this are forgotten before a new one is counted
    pub failure_window: Option<Duration>,
    /// Time to wait before admitting a probe
    pub reset_timeout: Duration,
    /// Cap for the grown reset timeout
    pub max_reset_timeout: Duration,
    /// Reset timeout growth after each failed probe
    pub reset_backoff_multiplier: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: None,
            reset_timeout: Duration::from_secs(30),
            max_reset_timeout: Duration::from_secs(300),
            reset_backoff_multiplier: 2.0,
        }
    }
}

/// Mutable breaker state, only touched under the breaker's lock
#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    opened_at: Option<Instant>,
    half_open_probe_in_flight: bool,
    current_reset_timeout: Duration,
    total_successes: u64,
    total_failures: u64,
    rejected_calls: u64,
    epoch: u64,
}

impl BreakerState {
    fn new(reset_timeout: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            opened_at: None,
            half_open_probe_in_flight: false,
            current_reset_timeout: reset_timeout,
            total_successes: 0,
            total_failures: 0,
            rejected_calls: 0,
            epoch: 0,
        }
    }

    fn enter(&mut self, state: CircuitState) {
        self.state = state;
        self.epoch += 1;
    }

    fn reset_elapsed(&self, now: Instant) -> bool {
        self.opened_at
            .is_some_and(|opened| now.saturating_duration_since(opened) >= self.current_reset_timeout)
    }
}

/// Circuit breaker for a single dependency
pub struct CircuitBreaker {
    dependency: Dependency,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    #[must_use]
    pub fn new(dependency: Dependency, config: CircuitBreakerConfig) -> Self {
        Self {
            dependency,
            inner: Mutex::new(BreakerState::new(config.reset_timeout)),
            config,
        }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults(dependency: Dependency) -> Self {
        Self::new(dependency, CircuitBreakerConfig::default())
    }

    /// Dependency guarded by this breaker
    #[must_use]
    pub fn dependency(&self) -> Dependency {
        self.dependency
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, without triggering transitions
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Whether a call made now would be attempted.
    ///
    /// Does not transition or reserve a probe; a concurrent caller may still
    /// take the probe first.
    #[must_use]
    pub fn would_admit(&self) -> bool {
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => inner.reset_elapsed(Instant::now()),
            CircuitState::HalfOpen => !inner.half_open_probe_in_flight,
        }
    }

    /// Ask permission to make one call.
    ///
    /// The returned permit must be settled with an outcome; dropping it
    /// unsettled (e.g. because the caller was cancelled) counts as a failure.
    ///
    /// # Errors
    /// Returns `GatewayError::BreakerOpen` while open, or while another
    /// half-open probe is outstanding
    pub fn try_acquire(&self) -> Result<CallPermit<'_>, GatewayError> {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        match inner.state {
            CircuitState::Closed => Ok(CallPermit::new(self, false, inner.epoch)),
            CircuitState::Open if inner.reset_elapsed(now) => {
                inner.enter(CircuitState::HalfOpen);
                inner.half_open_probe_in_flight = true;
                info!(
                    dependency = %self.dependency,
                    reset_timeout_ms = inner.current_reset_timeout.as_millis(),
                    "Circuit breaker half-open, admitting probe"
                );
                Ok(CallPermit::new(self, true, inner.epoch))
            }
            CircuitState::HalfOpen if !inner.half_open_probe_in_flight => {
                inner.half_open_probe_in_flight = true;
                Ok(CallPermit::new(self, true, inner.epoch))
            }
            CircuitState::Open | CircuitState::HalfOpen => {
                inner.rejected_calls += 1;
                debug!(
                    dependency = %self.dependency,
                    state = %inner.state,
                    "Circuit breaker rejected call"
                );
                Err(GatewayError::BreakerOpen {
                    dependency: self.dependency,
                })
            }
        }
    }

    fn on_success(&self, probe: bool, epoch: u64) {
        let mut inner = self.inner.lock();
        inner.total_successes += 1;
        if inner.epoch != epoch {
            debug!(dependency = %self.dependency, probe, "Ignoring outcome from an earlier breaker epoch");
            return;
        }

        if probe {
            inner.enter(CircuitState::Closed);
            inner.consecutive_failures = 0;
            inner.last_failure_at = None;
            inner.opened_at = None;
            inner.half_open_probe_in_flight = false;
            inner.current_reset_timeout = self.config.reset_timeout;
            info!(dependency = %self.dependency, "Circuit breaker closed");
        } else {
            inner.consecutive_failures = 0;
        }
    }

    fn on_failure(&self, probe: bool, epoch: u64) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.total_failures += 1;
        if inner.epoch != epoch {
            debug!(dependency = %self.dependency, probe, "Ignoring outcome from an earlier breaker epoch");
            return;
        }

        if probe {
            let grown = inner
                .current_reset_timeout
                .mul_f64(self.config.reset_backoff_multiplier)
                .min(self.config.max_reset_timeout);
            inner.enter(CircuitState::Open);
            inner.opened_at = Some(now);
            inner.last_failure_at = Some(now);
            inner.half_open_probe_in_flight = false;
            inner.current_reset_timeout = grown;
            warn!(
                dependency = %self.dependency,
                reset_timeout_ms = grown.as_millis(),
                "Circuit breaker probe failed, reopening"
            );
            return;
        }

        if let (Some(window), Some(last)) = (self.config.failure_window, inner.last_failure_at) {
            if now.saturating_duration_since(last) > window {
                inner.consecutive_failures = 0;
            }
        }
        inner.consecutive_failures += 1;
        inner.last_failure_at = Some(now);

        if inner.consecutive_failures >= self.config.failure_threshold {
            inner.enter(CircuitState::Open);
            inner.opened_at = Some(now);
            warn!(
                dependency = %self.dependency,
                failures = inner.consecutive_failures,
                threshold = self.config.failure_threshold,
                "Circuit breaker opened"
            );
        } else {
            debug!(
                dependency = %self.dependency,
                failures = inner.consecutive_failures,
                threshold = self.config.failure_threshold,
                "Circuit breaker recorded failure"
            );
        }
    }

    fn on_release(&self, probe: bool, epoch: u64) {
        let mut inner = self.inner.lock();
        if probe && inner.epoch == epoch {
            inner.half_open_probe_in_flight = false;
        }
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let totals = (inner.total_successes, inner.total_failures, inner.rejected_calls);
        let epoch = inner.epoch;
        *inner = BreakerState::new(self.config.reset_timeout);
        (inner.total_successes, inner.total_failures, inner.rejected_calls) = totals;
        inner.epoch = epoch + 1;
        info!(dependency = %self.dependency, "Circuit breaker manually reset");
    }

    /// Force the circuit open (operator intervention or tests)
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        inner.enter(CircuitState::Open);
        inner.opened_at = Some(Instant::now());
        inner.half_open_probe_in_flight = false;
        warn!(dependency = %self.dependency, "Circuit breaker forced open");
    }

    /// Point-in-time view of the breaker
    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            dependency: self.dependency,
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            opened_at: inner.opened_at,
            half_open_probe_in_flight: inner.half_open_probe_in_flight,
            current_reset_timeout: inner.current_reset_timeout,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            rejected_calls: inner.rejected_calls,
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("dependency", &self.dependency)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Permission to make one call through a breaker
#[must_use = "a permit dropped without an outcome counts as a failure"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    epoch: u64,
    settled: bool,
}

impl<'a> CallPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool, epoch: u64) -> Self {
        Self {
            breaker,
            probe,
            epoch,
            settled: false,
        }
    }

    /// Whether this permit is the half-open probe
    #[must_use]
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// The dependency answered
    pub fn record_success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.probe, self.epoch);
    }

    /// The dependency failed
    pub fn record_failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.probe, self.epoch);
    }

    /// The call ended without saying anything about the dependency's
    /// health. Frees the probe slot and leaves every counter untouched.
    pub fn release(mut self) {
        self.settled = true;
        self.breaker.on_release(self.probe, self.epoch);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            debug!(
                dependency = %self.breaker.dependency,
                probe = self.probe,
                "Call abandoned before completion, counting as failure"
            );
            self.breaker.on_failure(self.probe, self.epoch);
        }
    }
}

/// Circuit breaker snapshot
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    /// Dependency
    pub dependency: Dependency,
    /// Current state
    pub state: CircuitState,
    /// Consecutive failures counted while closed
    pub consecutive_failures: u32,
    /// When the breaker last opened
    pub opened_at: Option<Instant>,
    /// Whether a half-open probe is outstanding
    pub half_open_probe_in_flight: bool,
    /// Reset timeout currently in force
    pub current_reset_timeout: Duration,
    /// Successful calls recorded
    pub total_successes: u64,
    /// Failed calls recorded
    pub total_failures: u64,
    /// Calls rejected without an attempt
    pub rejected_calls: u64,
}

impl BreakerSnapshot {
    /// Calculate failure rate over all recorded outcomes
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        let total = self.total_successes + self.total_failures;
        if total == 0 {
            0.0
        } else {
            self.total_failures as f64 / total as f64
        }
    }
}

/// One breaker per dependency
#[derive(Debug)]
pub struct BreakerSet {
    breakers: PerDependency<CircuitBreaker>,
}

impl BreakerSet {
    /// Build from per-dependency configuration
    #[must_use]
    pub fn new(configs: &PerDependency<CircuitBreakerConfig>) -> Self {
        Self {
            breakers: configs.map(|dep, config| CircuitBreaker::new(dep, config.clone())),
        }
    }

    /// Breaker of a dependency
    #[must_use]
    pub fn get(&self, dependency: Dependency) -> &CircuitBreaker {
        self.breakers.get(dependency)
    }

    /// Snapshots of all breakers
    #[must_use]
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        self.breakers.iter().map(|(_, b)| b.snapshot()).collect()
    }
}
