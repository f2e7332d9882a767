//! Request coalescing.
//!
//! Concurrent callers asking for the same key share one underlying fetch and
//! all observe its result. The entry is removed as soon as the fetch settles,
//! so a later call starts a fresh fetch.

use futures::future::{BoxFuture, FutureExt, Shared};
use gateway_core::GatewayError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use tracing::debug;

type SharedFetch<T> = Shared<BoxFuture<'static, Result<T, GatewayError>>>;

struct InFlight<T>
where
    T: Clone,
{
    fetch: SharedFetch<T>,
    waiters: usize,
}

/// Coalesces concurrent fetches per key
pub struct SingleFlight<K, T>
where
    T: Clone,
{
    inflight: Mutex<HashMap<K, InFlight<T>>>,
}

impl<K, T> SingleFlight<K, T>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    T: Clone + Send + Sync + 'static,
{
    /// Create an empty coalescer
    #[must_use]
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `fetch` for `key`, or join the fetch already in flight for it.
    ///
    /// `fetch` is only invoked when no fetch for the key is outstanding.
    /// When every waiter of a fetch is cancelled, the fetch is dropped with
    /// them.
    ///
    /// # Errors
    /// Returns the error produced by the shared fetch
    pub async fn run<F, Fut>(&self, key: &K, fetch: F) -> Result<T, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>> + Send + 'static,
    {
        let shared = {
            let mut inflight = self.inflight.lock();
            if let Some(entry) = inflight.get_mut(key) {
                entry.waiters += 1;
                debug!(key = ?key, waiters = entry.waiters, "Joining in-flight fetch");
                entry.fetch.clone()
            } else {
                let shared = fetch().boxed().shared();
                inflight.insert(
                    key.clone(),
                    InFlight {
                        fetch: shared.clone(),
                        waiters: 1,
                    },
                );
                shared
            }
        };

        let guard = WaiterGuard {
            owner: self,
            key,
            fetch: shared.clone(),
        };
        let result = shared.await;
        drop(guard);
        result
    }

    /// Number of keys with a fetch in flight
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }

    fn release(&self, key: &K, fetch: &SharedFetch<T>) {
        let mut inflight = self.inflight.lock();
        let Some(entry) = inflight.get_mut(key) else {
            return;
        };
        if !entry.fetch.ptr_eq(fetch) {
            return;
        }
        entry.waiters = entry.waiters.saturating_sub(1);
        if entry.waiters == 0 || fetch.peek().is_some() {
            inflight.remove(key);
        }
    }
}

impl<K, T> Default for SingleFlight<K, T>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> std::fmt::Debug for SingleFlight<K, T>
where
    T: Clone,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.inflight.lock().len())
            .finish()
    }
}

/// Releases the waiter's claim on the entry when it finishes or is cancelled
struct WaiterGuard<'a, K, T>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    T: Clone + Send + Sync + 'static,
{
    owner: &'a SingleFlight<K, T>,
    key: &'a K,
    fetch: SharedFetch<T>,
}

impl<K, T> Drop for WaiterGuard<'_, K, T>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.owner.release(self.key, &self.fetch);
    }
}
