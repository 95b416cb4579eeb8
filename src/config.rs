//! Engine configuration.
//!
//! Every knob is a plain value injected at construction time; there is no
//! global state and no environment lookup inside the engine. Construct an
//! [`EngineConfig`] (or start from `Default`) and hand it to the engine.

use std::time::Duration;

pub use crate::engine::CircuitBreakerConfig;

/// Default base URL of the aggregator service.
const DEFAULT_PRIMARY_URL: &str = "http://localhost:4000/api/market";

/// Default base URL of the public chart API.
const DEFAULT_SECONDARY_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

/// Default freshness window for a cached quote.
const DEFAULT_QUOTE_TTL: Duration = Duration::from_secs(30);

/// Default freshness window for a cached batch snapshot.
const DEFAULT_BATCH_TTL: Duration = Duration::from_secs(30);

/// Default per-call budget for one upstream request.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default fan-out width against the chart API.
const DEFAULT_MAX_CONCURRENCY: usize = 2;

/// Default minimum gap between chart API request starts.
const DEFAULT_MIN_DELAY: Duration = Duration::from_millis(200);

/// Complete engine configuration.
#[derive(Clone, Debug, Default)]
pub struct EngineConfig {
    /// Aggregator endpoint, the first live tier.
    pub primary: PrimaryEndpoint,

    /// Chart API endpoint, the second live tier.
    pub secondary: SecondaryEndpoint,

    /// Cache tier settings.
    pub cache: CacheSettings,

    /// Circuit breaker thresholds shared by both live tiers.
    pub breaker: CircuitBreakerConfig,

    /// Upstream settings shared by both live tiers.
    pub upstream: UpstreamSettings,
}

/// Aggregator endpoint settings.
#[derive(Clone, Debug)]
pub struct PrimaryEndpoint {
    /// Base URL, without a trailing slash.
    pub base_url: String,

    /// API key sent with every request, when the deployment needs one.
    pub api_key: Option<String>,
}

impl Default for PrimaryEndpoint {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_PRIMARY_URL.to_string(),
            api_key: None,
        }
    }
}

/// Chart API endpoint settings.
#[derive(Clone, Debug)]
pub struct SecondaryEndpoint {
    /// Base URL, without a trailing slash.
    pub base_url: String,

    /// How many chart requests may be outstanding at once.
    pub max_concurrency: usize,

    /// Minimum gap between the starts of consecutive chart requests.
    pub min_delay: Duration,
}

impl Default for SecondaryEndpoint {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SECONDARY_URL.to_string(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            min_delay: DEFAULT_MIN_DELAY,
        }
    }
}

/// Cache tier settings.
#[derive(Clone, Debug)]
pub struct CacheSettings {
    /// Redis URL for the distributed tier. `None` runs local-only.
    pub redis_url: Option<String>,

    /// Freshness window for a single cached quote.
    pub quote_ttl: Duration,

    /// Freshness window for a cached batch snapshot.
    pub batch_ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            redis_url: None,
            quote_ttl: DEFAULT_QUOTE_TTL,
            batch_ttl: DEFAULT_BATCH_TTL,
        }
    }
}

/// Settings applied to every upstream call.
#[derive(Clone, Debug)]
pub struct UpstreamSettings {
    /// Per-call budget; a provider call past this is a timeout failure.
    pub request_timeout: Duration,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();

        assert_eq!(config.cache.quote_ttl, Duration::from_secs(30));
        assert_eq!(config.cache.batch_ttl, Duration::from_secs(30));
        assert!(config.cache.redis_url.is_none());
        assert_eq!(config.upstream.request_timeout, Duration::from_secs(10));
        assert_eq!(config.secondary.max_concurrency, 2);
        assert_eq!(config.secondary.min_delay, Duration::from_millis(200));
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.cooldown, Duration::from_secs(300));
        assert!(config.primary.api_key.is_none());
    }
}
