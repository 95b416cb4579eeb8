//! Two-tier quote caching
//!
//! This module contains the caching layers used by the engine:
//! - `entry` - A cached value with per-entry expiry (CacheEntry)
//! - `local` - The in-process tier (LocalCache)
//! - `remote` - The distributed tier backed by Redis (RemoteCache)
//! - `tiered` - The composition the engine reads and writes (TieredCache)
//!
//! Key layout, shared by both tiers:
//! - `market:<SYMBOL>` holds one quote
//! - `market:batch:<S1,S2,...>` holds a batch snapshot, symbols sorted
//!   and deduplicated so the key is order-insensitive

mod entry;
mod local;
mod remote;
mod tiered;

pub use entry::CacheEntry;
pub use local::LocalCache;
pub use remote::RemoteCache;
pub use tiered::TieredCache;

/// Pattern covering every key the engine writes, batch snapshots included.
pub const QUOTE_NAMESPACE: &str = "market:*";

/// Pattern covering batch snapshot keys only.
pub const BATCH_NAMESPACE: &str = "market:batch:*";

/// Cache key for a single symbol's quote.
pub fn quote_key(symbol: &str) -> String {
    format!("market:{}", symbol)
}

/// Cache key for a batch snapshot.
///
/// Symbols are sorted and deduplicated first, so every ordering of the
/// same set maps to the same key.
pub fn batch_key(symbols: &[String]) -> String {
    let mut sorted: Vec<&str> = symbols.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();
    format!("market:batch:{}", sorted.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_key_layout() {
        assert_eq!(quote_key("AAPL"), "market:AAPL");
    }

    #[test]
    fn test_batch_key_is_order_insensitive() {
        let forward = batch_key(&["AAPL".to_string(), "MSFT".to_string()]);
        let reverse = batch_key(&["MSFT".to_string(), "AAPL".to_string()]);

        assert_eq!(forward, "market:batch:AAPL,MSFT");
        assert_eq!(forward, reverse);
    }

    #[test]
    fn test_batch_key_deduplicates() {
        let key = batch_key(&[
            "AAPL".to_string(),
            "AAPL".to_string(),
            "MSFT".to_string(),
        ]);
        assert_eq!(key, "market:batch:AAPL,MSFT");
    }
}
