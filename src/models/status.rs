use serde::Serialize;

/// Snapshot of both cache tiers, as reported by the engine.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Number of live entries in the in-process tier
    pub local_size: usize,

    /// Distributed tier health and size
    pub distributed: DistributedCacheStats,
}

/// Health and size of the distributed cache tier.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributedCacheStats {
    /// Whether the distributed tier answered its most recent command
    pub connected: bool,

    /// Number of quote keys held by the distributed tier, zero when
    /// unreachable or not configured
    pub key_count: usize,
}

/// Health snapshot of the live provider chain.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiStatus {
    /// The bulk-capable aggregator tier
    pub primary: ProviderStatus,

    /// The per-symbol chart tier
    pub secondary: ProviderStatus,
}

/// Health of a single provider as seen by its circuit.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    /// False while the provider's circuit is open
    pub available: bool,

    /// Consecutive failures recorded since the last success
    pub failures: u32,
}
