//! Quote provider trait definition.
//!
//! This module defines the core `QuoteProvider` trait that every
//! resolution tier implements.

use async_trait::async_trait;

use crate::errors::QuoteError;
use crate::models::Quote;

/// Trait for upstream quote sources.
///
/// Implement this trait to add a resolution tier. The engine walks its
/// providers in order, each guarded by a per-provider circuit breaker,
/// and never lets an upstream field name past the implementation: every
/// tier answers in the normalized [`Quote`] shape.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Unique identifier for this provider.
    ///
    /// Should be a constant string like "AGGREGATOR" or "CHART_API".
    /// Used for logging, circuit breaker tracking, and quote provenance.
    fn id(&self) -> &'static str;

    /// Fetch the current quote for one canonical symbol.
    async fn fetch(&self, symbol: &str) -> Result<Quote, QuoteError>;

    /// Fetch current quotes for several canonical symbols.
    ///
    /// Returns whatever subset the provider could produce; symbols it
    /// does not know are simply absent from the result. An `Err` means
    /// nothing was produced and at least one call failed hard.
    async fn fetch_many(&self, symbols: &[String]) -> Result<Vec<Quote>, QuoteError>;
}
