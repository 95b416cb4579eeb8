//! In-process cache tier.
//!
//! A ttl-aware map that keeps serving quotes when the distributed tier is
//! unreachable. Expired entries are pruned lazily, on the reads and size
//! queries that encounter them.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use log::warn;

use super::entry::CacheEntry;

/// Thread-safe in-process cache with per-entry expiry.
pub struct LocalCache<T> {
    /// Live and expired-but-unpruned entries, keyed by cache key.
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
}

impl<T: Clone> LocalCache<T> {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Lock the entries mutex, recovering from poison if necessary.
    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<T>>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            warn!("Local cache mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Fetch a live entry, pruning it if it has expired.
    pub fn get(&self, key: &str) -> Option<T> {
        let mut entries = self.lock_entries();

        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    /// Store a value that stays fresh for `ttl`.
    pub fn set(&self, key: &str, value: T, ttl: Duration) {
        let mut entries = self.lock_entries();
        entries.insert(key.to_string(), CacheEntry::new(value, ttl));
    }

    /// Remove a single entry, expired or not.
    pub fn remove(&self, key: &str) {
        let mut entries = self.lock_entries();
        entries.remove(key);
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut entries = self.lock_entries();
        entries.clear();
    }

    /// Number of live entries. Expired leftovers are pruned, not counted.
    pub fn len(&self) -> usize {
        let mut entries = self.lock_entries();
        entries.retain(|_, entry| !entry.is_expired());
        entries.len()
    }

    /// True when no live entries remain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for LocalCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_set_then_get() {
        let cache: LocalCache<String> = LocalCache::new();
        cache.set("market:AAPL", "quote".to_string(), Duration::from_secs(30));

        assert_eq!(cache.get("market:AAPL"), Some("quote".to_string()));
        assert_eq!(cache.get("market:MSFT"), None);
    }

    #[test]
    fn test_expired_entry_reads_as_miss() {
        let cache: LocalCache<u32> = LocalCache::new();
        cache.set("market:AAPL", 1, Duration::from_millis(10));

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("market:AAPL"), None);
    }

    #[test]
    fn test_len_counts_only_live_entries() {
        let cache: LocalCache<u32> = LocalCache::new();
        cache.set("market:AAPL", 1, Duration::from_secs(30));
        cache.set("market:MSFT", 2, Duration::from_millis(10));

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_overwrite_refreshes_entry() {
        let cache: LocalCache<u32> = LocalCache::new();
        cache.set("market:AAPL", 1, Duration::from_millis(10));

        std::thread::sleep(Duration::from_millis(20));
        cache.set("market:AAPL", 2, Duration::from_secs(30));

        assert_eq!(cache.get("market:AAPL"), Some(2));
    }

    #[test]
    fn test_remove_and_clear() {
        let cache: LocalCache<u32> = LocalCache::new();
        cache.set("market:AAPL", 1, Duration::from_secs(30));
        cache.set("market:MSFT", 2, Duration::from_secs(30));

        cache.remove("market:AAPL");
        assert_eq!(cache.get("market:AAPL"), None);
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
