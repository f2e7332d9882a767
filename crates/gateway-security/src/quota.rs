//! Guest message quota.
//!
//! Each guest session has a counter guarded by its own mutex, so the
//! check-and-increment is a single critical section and sessions never
//! contend with each other. Authenticated callers are not counted.

use dashmap::DashMap;
use gateway_core::{CallerContext, GatewayError, GatewayResult};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Quota settings
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    /// Messages a guest session may send per window
    pub guest_message_limit: u32,
    /// Counting window; `None` counts for the lifetime of the session
    pub window: Option<Duration>,
    /// Idle time after which a counter is swept
    pub idle_expiry: Duration,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            guest_message_limit: 5,
            window: None,
            idle_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug)]
struct QuotaCounter {
    used: u32,
    window_start: Instant,
    last_seen: Instant,
    generation: u64,
}

impl QuotaCounter {
    fn new(now: Instant) -> Self {
        Self {
            used: 0,
            window_start: now,
            last_seen: now,
            generation: 0,
        }
    }

    fn restart(&mut self, now: Instant) {
        self.used = 0;
        self.window_start = now;
        self.generation += 1;
    }
}

/// A consumed quota unit, refundable if the message is not delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaReservation {
    key: Option<String>,
    generation: u64,
    used: u32,
    limit: u32,
}

impl QuotaReservation {
    fn unlimited() -> Self {
        Self {
            key: None,
            generation: 0,
            used: 0,
            limit: 0,
        }
    }

    /// Whether the caller is not subject to a quota
    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        self.key.is_none()
    }

    /// Messages used including this one
    #[must_use]
    pub fn used(&self) -> u32 {
        self.used
    }

    /// Messages left after this one, `None` when unlimited
    #[must_use]
    pub fn remaining(&self) -> Option<u32> {
        self.key.as_ref().map(|_| self.limit.saturating_sub(self.used))
    }
}

/// A consumed unit that is refunded when dropped uncommitted, so a message
/// whose call failed or was cancelled costs the guest nothing
#[must_use = "an uncommitted reservation is refunded when dropped"]
#[derive(Debug)]
pub struct PendingQuota<'a> {
    tracker: &'a QuotaTracker,
    reservation: QuotaReservation,
    committed: bool,
}

impl PendingQuota<'_> {
    /// The reserved unit
    #[must_use]
    pub fn reservation(&self) -> &QuotaReservation {
        &self.reservation
    }

    /// The message was delivered; keep the unit spent
    pub fn commit(mut self) -> QuotaReservation {
        self.committed = true;
        self.reservation.clone()
    }
}

impl Drop for PendingQuota<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.tracker.refund(&self.reservation);
        }
    }
}

/// Current usage of a counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaUsage {
    /// Messages used in the current window
    pub used: u32,
    /// Configured limit
    pub limit: u32,
    /// Time until the window restarts, if windowed
    pub resets_in: Option<Duration>,
}

/// Tracks guest message usage per session
#[derive(Debug)]
pub struct QuotaTracker {
    config: QuotaConfig,
    counters: DashMap<String, Arc<Mutex<QuotaCounter>>>,
}

impl QuotaTracker {
    /// Create a tracker
    #[must_use]
    pub fn new(config: QuotaConfig) -> Self {
        Self {
            config,
            counters: DashMap::new(),
        }
    }

    /// Guest message limit
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.config.guest_message_limit
    }

    /// Atomically check the caller's quota and consume one message
    ///
    /// # Errors
    /// Returns `QuotaExceeded` when a guest session has used its allowance
    pub fn check_and_consume(&self, caller: &CallerContext) -> GatewayResult<QuotaReservation> {
        if !caller.is_guest() {
            return Ok(QuotaReservation::unlimited());
        }

        let key = caller.quota_key();
        let limit = self.config.guest_message_limit;
        let counter = self.counter(key);
        let now = Instant::now();
        let mut counter = counter.lock();

        if self.window_elapsed(&counter, now) {
            debug!(session = %key, "Quota window restarted");
            counter.restart(now);
        }
        counter.last_seen = now;

        if counter.used >= limit {
            info!(session = %key, used = counter.used, limit, "Guest quota exceeded");
            return Err(GatewayError::QuotaExceeded {
                used: counter.used,
                limit,
            });
        }

        counter.used += 1;
        debug!(session = %key, used = counter.used, limit, "Guest quota consumed");

        Ok(QuotaReservation {
            key: Some(key.to_string()),
            generation: counter.generation,
            used: counter.used,
            limit,
        })
    }

    /// Reserve one message, refunded unless the returned guard is committed
    ///
    /// # Errors
    /// Returns `QuotaExceeded` when a guest session has used its allowance
    pub fn reserve(&self, caller: &CallerContext) -> GatewayResult<PendingQuota<'_>> {
        let reservation = self.check_and_consume(caller)?;
        Ok(PendingQuota {
            tracker: self,
            reservation,
            committed: false,
        })
    }

    /// Give back a reservation whose message was not delivered.
    ///
    /// Ignored if the counter was reset or its window restarted since.
    pub fn refund(&self, reservation: &QuotaReservation) {
        let Some(key) = &reservation.key else {
            return;
        };
        let Some(counter) = self.counters.get(key).map(|c| Arc::clone(c.value())) else {
            return;
        };

        let mut counter = counter.lock();
        if counter.generation == reservation.generation && counter.used > 0 {
            counter.used -= 1;
            debug!(session = %key, used = counter.used, "Guest quota refunded");
        }
    }

    /// Usage of a session, `None` if it has no counter
    #[must_use]
    pub fn usage(&self, key: &str) -> Option<QuotaUsage> {
        let counter = self.counters.get(key).map(|c| Arc::clone(c.value()))?;
        let counter = counter.lock();
        let now = Instant::now();

        let used = if self.window_elapsed(&counter, now) {
            0
        } else {
            counter.used
        };
        let resets_in = self
            .config
            .window
            .map(|window| (counter.window_start + window).saturating_duration_since(now));

        Some(QuotaUsage {
            used,
            limit: self.config.guest_message_limit,
            resets_in,
        })
    }

    /// Reset a session's counter to zero
    pub fn reset(&self, key: &str) {
        if let Some(counter) = self.counters.get(key).map(|c| Arc::clone(c.value())) {
            counter.lock().restart(Instant::now());
            info!(session = %key, "Guest quota reset");
        }
    }

    /// Forget a session's counter
    pub fn end_session(&self, key: &str) -> bool {
        self.counters.remove(key).is_some()
    }

    /// Remove counters idle for longer than the configured expiry
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.counters.len();
        self.counters.retain(|_, counter| {
            now.saturating_duration_since(counter.lock().last_seen) < self.config.idle_expiry
        });
        let removed = before - self.counters.len();
        if removed > 0 {
            debug!(removed, "Swept idle quota counters");
        }
        removed
    }

    /// Number of tracked sessions
    #[must_use]
    pub fn tracked_sessions(&self) -> usize {
        self.counters.len()
    }

    fn counter(&self, key: &str) -> Arc<Mutex<QuotaCounter>> {
        if let Some(counter) = self.counters.get(key) {
            return Arc::clone(counter.value());
        }
        Arc::clone(
            self.counters
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(QuotaCounter::new(Instant::now()))))
                .value(),
        )
    }

    fn window_elapsed(&self, counter: &QuotaCounter, now: Instant) -> bool {
        self.config
            .window
            .is_some_and(|window| now.saturating_duration_since(counter.window_start) >= window)
    }
}

impl Default for QuotaTracker {
    fn default() -> Self {
        Self::new(QuotaConfig::default())
    }
}
