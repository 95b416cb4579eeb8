//! Quote resolution models
//!
//! This module contains the core data types for quote operations:
//! - `types` - Type aliases for common identifiers (ProviderId)
//! - `quote` - The normalized quote shape and change derivation
//! - `holding` - Portfolio positions used for valuation
//! - `status` - Serializable cache and provider health snapshots

mod holding;
mod quote;
mod status;
mod types;

pub use holding::Holding;
pub use quote::{derive_change, Quote, FALLBACK_SOURCE};
pub use status::{ApiStatus, CacheStats, DistributedCacheStats, ProviderStatus};
pub use types::ProviderId;
