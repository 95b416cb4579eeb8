//! Request pacing for providers without a bulk endpoint.
//!
//! The chart API answers one symbol per request, so batch resolution
//! fans out into many requests. The pacer spaces those requests out:
//! consecutive starts are at least `min_delay` apart no matter how many
//! workers are fanning out at once.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, warn};

/// Spacing gate shared by every request against one provider.
pub struct RequestPacer {
    /// Earliest instant the next request may start.
    next_start: Mutex<Option<Instant>>,

    /// Minimum gap between request starts.
    min_delay: Duration,
}

impl RequestPacer {
    /// Create a pacer enforcing `min_delay` between request starts.
    pub fn new(min_delay: Duration) -> Self {
        Self {
            next_start: Mutex::new(None),
            min_delay,
        }
    }

    /// Lock the slot mutex, recovering from poison if necessary.
    fn lock_slot(&self) -> MutexGuard<'_, Option<Instant>> {
        self.next_start.lock().unwrap_or_else(|poisoned| {
            warn!("Request pacer mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Wait for this caller's turn to start a request.
    ///
    /// Returns once the start slot is claimed; the caller should issue
    /// its request immediately after.
    pub async fn pace(&self) {
        loop {
            let wait = {
                let mut slot = self.lock_slot();
                let now = Instant::now();

                match *slot {
                    Some(at) if at > now => at - now,
                    _ => {
                        *slot = Some(now + self.min_delay);
                        return;
                    }
                }
            };

            debug!("Pacer: waiting {:?} for the next request slot", wait);
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_first_call_is_immediate() {
        let pacer = RequestPacer::new(Duration::from_millis(50));

        let start = Instant::now();
        pacer.pace().await;
        assert!(start.elapsed() < Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_consecutive_calls_are_spaced() {
        let pacer = RequestPacer::new(Duration::from_millis(20));

        let start = Instant::now();
        pacer.pace().await;
        pacer.pace().await;

        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_zero_delay_never_waits() {
        let pacer = RequestPacer::new(Duration::ZERO);

        let start = Instant::now();
        for _ in 0..5 {
            pacer.pace().await;
        }
        assert!(start.elapsed() < Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_concurrent_callers_serialize() {
        let pacer = Arc::new(RequestPacer::new(Duration::from_millis(20)));

        let start = Instant::now();
        let a = pacer.clone();
        let b = pacer.clone();
        let c = pacer.clone();
        tokio::join!(a.pace(), b.pace(), c.pace());

        // Three starts need at least two full gaps between them
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
