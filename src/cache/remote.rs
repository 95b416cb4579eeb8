//! Distributed cache tier backed by Redis.
//!
//! Values are stored as JSON strings with a server-side expiry, so every
//! process sharing the Redis instance sees the same quotes and the same
//! ttl windows. All operations surface [`QuoteError::CacheUnavailable`]
//! on transport problems; callers log and degrade to the local tier.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::warn;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::QuoteError;

/// Handle to the shared Redis tier.
///
/// The connection manager multiplexes commands over one reconnecting
/// connection and is cheap to clone per call. The `connected` flag tracks
/// the outcome of the most recent command for health reporting.
pub struct RemoteCache {
    conn: ConnectionManager,
    connected: AtomicBool,
}

impl RemoteCache {
    /// Connect to the Redis instance at `url`.
    ///
    /// Fails if the initial connection cannot be established; callers
    /// treat that as "no distributed tier" rather than a fatal error.
    pub async fn connect(url: &str) -> Result<Self, QuoteError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;

        Ok(Self {
            conn,
            connected: AtomicBool::new(true),
        })
    }

    /// Whether the most recent command reached the server.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Record the outcome of a command on the health flag and convert
    /// the error type.
    fn observe<T>(&self, result: RedisResult<T>) -> Result<T, QuoteError> {
        match result {
            Ok(value) => {
                self.connected.store(true, Ordering::Relaxed);
                Ok(value)
            }
            Err(err) => {
                self.connected.store(false, Ordering::Relaxed);
                Err(err.into())
            }
        }
    }

    /// Fetch and decode a single value.
    ///
    /// A payload that no longer decodes is discarded and reads as a miss.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, QuoteError> {
        let mut conn = self.conn.clone();
        let raw = self.observe(conn.get::<_, Option<String>>(key).await)?;

        match raw {
            Some(payload) => match serde_json::from_str(&payload) {
                Ok(value) => Ok(Some(value)),
                Err(err) => {
                    warn!("Discarding undecodable cache payload at '{}': {}", key, err);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Store a value with a server-side expiry.
    ///
    /// Sub-second ttls round up to one second, the smallest expiry the
    /// server accepts.
    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), QuoteError> {
        let payload =
            serde_json::to_string(value).map_err(|e| QuoteError::CacheUnavailable(e.to_string()))?;

        let mut conn = self.conn.clone();
        let result = redis::cmd("SET")
            .arg(key)
            .arg(payload)
            .arg("EX")
            .arg(expiry_seconds(ttl))
            .query_async::<_, ()>(&mut conn)
            .await;

        self.observe(result)
    }

    /// Fetch and decode several values in one round trip.
    ///
    /// The result is positional: `out[i]` corresponds to `keys[i]`, with
    /// `None` for misses and undecodable payloads.
    pub async fn mget_json<T: DeserializeOwned>(
        &self,
        keys: &[String],
    ) -> Result<Vec<Option<T>>, QuoteError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.clone();
        let raw = self.observe(conn.mget::<_, Vec<Option<String>>>(keys).await)?;

        let decoded = raw
            .into_iter()
            .zip(keys)
            .map(|(payload, key)| match payload {
                Some(payload) => match serde_json::from_str(&payload) {
                    Ok(value) => Some(value),
                    Err(err) => {
                        warn!("Discarding undecodable cache payload at '{}': {}", key, err);
                        None
                    }
                },
                None => None,
            })
            .collect();

        Ok(decoded)
    }

    /// Store several values in one pipeline, all with the same expiry.
    pub async fn mset_json<T: Serialize>(
        &self,
        pairs: &[(String, T)],
        ttl: Duration,
    ) -> Result<(), QuoteError> {
        if pairs.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        for (key, value) in pairs {
            let payload = serde_json::to_string(value)
                .map_err(|e| QuoteError::CacheUnavailable(e.to_string()))?;
            pipe.cmd("SET")
                .arg(key)
                .arg(payload)
                .arg("EX")
                .arg(expiry_seconds(ttl))
                .ignore();
        }

        let mut conn = self.conn.clone();
        self.observe(pipe.query_async::<_, ()>(&mut conn).await)
    }

    /// Delete a single key.
    pub async fn del(&self, key: &str) -> Result<(), QuoteError> {
        let mut conn = self.conn.clone();
        self.observe(conn.del::<_, ()>(key).await)
    }

    /// Delete every key matching `pattern`, returning how many went.
    pub async fn del_matching(&self, pattern: &str) -> Result<usize, QuoteError> {
        let mut conn = self.conn.clone();
        let keys = self.observe(conn.keys::<_, Vec<String>>(pattern).await)?;

        if keys.is_empty() {
            return Ok(0);
        }

        self.observe(conn.del::<_, usize>(keys).await)
    }

    /// Count the keys matching `pattern`.
    pub async fn count_matching(&self, pattern: &str) -> Result<usize, QuoteError> {
        let mut conn = self.conn.clone();
        let keys = self.observe(conn.keys::<_, Vec<String>>(pattern).await)?;
        Ok(keys.len())
    }
}

/// Server-side expiry argument for a ttl, never below one second.
fn expiry_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}
