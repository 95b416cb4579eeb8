//! In-flight request deduplication.
//!
//! When several tasks want the same symbol at the same time, exactly one
//! of them talks to the providers and the rest wait for its answer. The
//! first caller to ask for a key receives a [`Claim`]; everyone else gets
//! a shared future that resolves when the claimant publishes its result.
//!
//! A claim dropped without completing (the claimant panicked or was
//! cancelled) resolves the waiters to `None`, and each waiter then
//! resolves the symbol on its own.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt, Shared};
use log::warn;
use tokio::sync::oneshot;

/// Future handed to callers that joined an existing resolution.
///
/// Resolves to `None` when the claimant went away without publishing.
pub type JoinedFlight<T> = Shared<BoxFuture<'static, Option<T>>>;

type PendingMap<T> = HashMap<String, JoinedFlight<T>>;

/// Registry of resolutions currently in flight, keyed by symbol.
pub struct InFlightRegistry<T> {
    pending: Arc<Mutex<PendingMap<T>>>,
}

/// Outcome of asking the registry for a key.
pub enum Flight<T> {
    /// This caller resolves the key; others will wait on it.
    Claimed(Claim<T>),
    /// Another caller is already resolving the key.
    Joined(JoinedFlight<T>),
}

/// Exclusive right (and duty) to resolve one key.
///
/// Dropping the claim without calling [`complete`](Claim::complete)
/// releases the key and resolves the waiters to `None`.
pub struct Claim<T> {
    key: String,
    tx: Option<oneshot::Sender<T>>,
    pending: Arc<Mutex<PendingMap<T>>>,
}

impl<T: Clone + Send + 'static> InFlightRegistry<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Lock the pending map, recovering from poison if necessary.
    fn lock_pending(&self) -> MutexGuard<'_, PendingMap<T>> {
        self.pending.lock().unwrap_or_else(|poisoned| {
            warn!("In-flight registry mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Claim `key` for resolution, or join the resolution already under way.
    pub fn begin(&self, key: &str) -> Flight<T> {
        let mut pending = self.lock_pending();

        if let Some(shared) = pending.get(key) {
            return Flight::Joined(shared.clone());
        }

        let (tx, rx) = oneshot::channel();
        let shared = rx.map(|result: Result<T, _>| result.ok()).boxed().shared();
        pending.insert(key.to_string(), shared);

        Flight::Claimed(Claim {
            key: key.to_string(),
            tx: Some(tx),
            pending: Arc::clone(&self.pending),
        })
    }

    /// Number of resolutions currently in flight.
    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }
}

impl<T: Clone + Send + 'static> Default for InFlightRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Claim<T> {
    /// Publish the result to every waiter and release the key.
    pub fn complete(mut self, value: T) {
        if let Some(tx) = self.tx.take() {
            // Waiters may all have gone away; that leaves nobody to notify
            let _ = tx.send(value);
        }
    }
}

impl<T> Drop for Claim<T> {
    fn drop(&mut self) {
        let mut pending = self.pending.lock().unwrap_or_else(|poisoned| {
            warn!("In-flight registry mutex was poisoned, recovering");
            poisoned.into_inner()
        });
        pending.remove(&self.key);
    }
}
