//! Quote provider abstractions and implementations.
//!
//! This module contains:
//! - The `QuoteProvider` trait that all resolution tiers implement
//! - Request pacing for tiers without a bulk endpoint
//! - Concrete adapters for the aggregator service and the chart API
//!
//! # Architecture
//!
//! Adapters own everything upstream-specific: endpoint paths, payload
//! field names, and status-code quirks. What leaves an adapter is always the
//! normalized [`Quote`](crate::models::Quote) shape with change columns
//! filled in, derived from the previous close when the feed omits them.

mod pacing;
mod traits;

// Provider implementations
pub mod aggregator;
pub mod chart_api;

// Re-exports
pub use aggregator::AggregatorProvider;
pub use chart_api::ChartApiProvider;
pub use pacing::RequestPacer;
pub use traits::QuoteProvider;
