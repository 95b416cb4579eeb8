//! Two-tier cache composition.
//!
//! Reads consult the distributed tier first so every process sees the same
//! quotes; a distributed hit is opportunistically mirrored into the local
//! tier, which then answers on its own during a Redis outage. Writes land
//! in both tiers. Distributed failures are logged and swallowed, never
//! surfaced to quote resolution.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::local::LocalCache;
use super::remote::RemoteCache;

/// A typed cache namespace spanning the local and distributed tiers.
pub struct TieredCache<T> {
    local: LocalCache<T>,
    remote: Option<Arc<RemoteCache>>,

    /// Key pattern covering every entry in this namespace, used to flush
    /// the distributed tier.
    pattern: String,

    /// Freshness window for entries mirrored from the distributed tier.
    default_ttl: Duration,
}

impl<T> TieredCache<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync,
{
    /// Create a namespace. `remote` is `None` when running without a
    /// distributed tier; every operation then degrades to local-only.
    pub fn new(pattern: &str, default_ttl: Duration, remote: Option<Arc<RemoteCache>>) -> Self {
        Self {
            local: LocalCache::new(),
            remote,
            pattern: pattern.to_string(),
            default_ttl,
        }
    }

    /// Distributed-first read.
    ///
    /// A distributed hit refreshes the local copy before returning. On a
    /// distributed miss or outage the local tier answers.
    pub async fn get(&self, key: &str) -> Option<T> {
        if let Some(remote) = &self.remote {
            match remote.get_json::<T>(key).await {
                Ok(Some(value)) => {
                    self.local.set(key, value.clone(), self.default_ttl);
                    return Some(value);
                }
                Ok(None) => {}
                Err(err) => warn!("Distributed cache read failed for '{}': {}", key, err),
            }
        }

        self.local.get(key)
    }

    /// Positional bulk read: `out[i]` answers `keys[i]`.
    ///
    /// One distributed round trip covers all keys, then the local tier
    /// fills whatever is still missing.
    pub async fn get_many(&self, keys: &[String]) -> Vec<Option<T>> {
        let mut out: Vec<Option<T>> = vec![None; keys.len()];

        if let Some(remote) = &self.remote {
            match remote.mget_json::<T>(keys).await {
                Ok(values) => {
                    for (slot, (key, value)) in out.iter_mut().zip(keys.iter().zip(values)) {
                        if let Some(value) = value {
                            self.local.set(key, value.clone(), self.default_ttl);
                            *slot = Some(value);
                        }
                    }
                }
                Err(err) => warn!("Distributed cache bulk read failed: {}", err),
            }
        }

        for (slot, key) in out.iter_mut().zip(keys) {
            if slot.is_none() {
                *slot = self.local.get(key);
            }
        }

        out
    }

    /// Write to both tiers.
    pub async fn set(&self, key: &str, value: &T, ttl: Duration) {
        self.local.set(key, value.clone(), ttl);

        if let Some(remote) = &self.remote {
            if let Err(err) = remote.set_json(key, value, ttl).await {
                warn!("Distributed cache write failed for '{}': {}", key, err);
            }
        }
    }

    /// Bulk write to both tiers with a shared ttl.
    pub async fn set_many(&self, pairs: &[(String, T)], ttl: Duration) {
        for (key, value) in pairs {
            self.local.set(key, value.clone(), ttl);
        }

        if let Some(remote) = &self.remote {
            if let Err(err) = remote.mset_json(pairs, ttl).await {
                warn!("Distributed cache bulk write failed: {}", err);
            }
        }
    }

    /// Invalidate one key in both tiers.
    pub async fn remove(&self, key: &str) {
        self.local.remove(key);

        if let Some(remote) = &self.remote {
            if let Err(err) = remote.del(key).await {
                warn!("Distributed cache delete failed for '{}': {}", key, err);
            }
        }
    }

    /// Invalidate the whole namespace in both tiers.
    pub async fn flush(&self) {
        self.local.clear();

        if let Some(remote) = &self.remote {
            match remote.del_matching(&self.pattern).await {
                Ok(removed) if removed > 0 => {
                    debug!("Flushed {} distributed entries under '{}'", removed, self.pattern)
                }
                Ok(_) => {}
                Err(err) => warn!("Distributed cache flush failed: {}", err),
            }
        }
    }

    /// Number of live entries in the local tier.
    pub fn local_len(&self) -> usize {
        self.local.len()
    }

    /// Freshness window used when no explicit ttl is given.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}
