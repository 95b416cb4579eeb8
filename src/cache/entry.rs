use std::time::{Duration, Instant};

/// A single cached value with its expiry bookkeeping.
///
/// Each entry carries its own ttl, so callers can cache individual values
/// for different windows inside the same map.
#[derive(Clone, Debug)]
pub struct CacheEntry<T> {
    /// The cached value
    pub value: T,

    /// When the entry was stored
    pub stored_at: Instant,

    /// How long the entry stays fresh
    pub ttl: Duration,
}

impl<T> CacheEntry<T> {
    /// Create an entry that is fresh for `ttl` starting now.
    pub fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            stored_at: Instant::now(),
            ttl,
        }
    }

    /// True once the entry has outlived its ttl.
    ///
    /// An entry is fresh while `age <= ttl`, so one read exactly at the
    /// boundary still answers.
    pub fn is_expired(&self) -> bool {
        self.stored_at.elapsed() > self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_entry_is_not_expired() {
        let entry = CacheEntry::new(42, Duration::from_secs(30));
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let mut entry = CacheEntry::new(42, Duration::from_secs(30));

        // Simulate the entry having been stored well in the past
        entry.stored_at = Instant::now() - Duration::from_secs(31);
        assert!(entry.is_expired());
    }

    #[test]
    fn test_zero_ttl_expires_with_any_age() {
        let mut entry = CacheEntry::new(42, Duration::ZERO);

        entry.stored_at = Instant::now() - Duration::from_millis(1);
        assert!(entry.is_expired());
    }
}
