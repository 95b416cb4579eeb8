//! Quoteflow Quote Resolution Engine
//!
//! This crate resolves current market quotes for portfolio valuation,
//! layering caches, live providers, and reference data so that a lookup
//! always comes back with an answer.
//!
//! # Overview
//!
//! The engine supports:
//! - Two-tier caching: a distributed Redis tier shared across processes,
//!   backed by an in-process tier that answers during outages
//! - A provider chain with per-provider circuit breaking
//! - In-flight deduplication, so concurrent lookups of one symbol share
//!   a single upstream request
//! - A static fallback table that terminates every resolution
//!
//! # Architecture
//!
//! ```text
//! +------------------+
//! |   QuoteEngine    |  (get_quote / get_quotes / valuation)
//! +------------------+
//!          |
//!          v
//! +------------------+
//! |   TieredCache    |  (distributed first, then local)
//! +------------------+
//!          |
//!          v
//! +------------------+
//! | InFlightRegistry |  (one resolution per symbol)
//! +------------------+
//!          |
//!          v
//! +------------------+
//! |  QuoteProvider   |  (Aggregator, ChartApi; circuit per provider)
//! +------------------+
//!          |
//!          v
//! +------------------+
//! |    Fallback      |  (embedded reference table, always answers)
//! +------------------+
//! ```
//!
//! # Core Types
//!
//! - [`QuoteEngine`] - Entry point holding caches, providers, and health state
//! - [`EngineConfig`] - Injected configuration, no globals
//! - [`Quote`] - Normalized market quote with derived change columns
//! - [`Holding`] - A position to value, symbol plus quantity
//! - [`QuoteError`] - Error enum; only invalid input reaches consumers
//! - [`FailureClass`] - How the engine reacts to each error

pub mod cache;
pub mod config;
pub mod engine;
pub mod errors;
pub mod fallback;
pub mod models;
pub mod provider;

// Re-export the engine surface
pub use engine::{CircuitBreaker, CircuitBreakerConfig, CircuitState, QuoteEngine};

// Re-export configuration types
pub use config::{CacheSettings, EngineConfig, PrimaryEndpoint, SecondaryEndpoint, UpstreamSettings};

// Re-export all public types from models
pub use models::{
    ApiStatus, CacheStats, DistributedCacheStats, Holding, ProviderId, ProviderStatus, Quote,
    FALLBACK_SOURCE,
};

// Re-export error types
pub use errors::{FailureClass, QuoteError};

// Re-export provider types
pub use provider::{AggregatorProvider, ChartApiProvider, QuoteProvider};
