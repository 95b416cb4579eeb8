//! Static fallback quotes, the terminal resolution tier.
//!
//! When every cache tier and every upstream provider has failed, the
//! engine still has to answer. This module carries a small embedded
//! table of reference prices for widely held symbols and builds a flat
//! quote from it. Symbols outside the table get a zero price. Either
//! way the call is total: there is no error path out of this tier.
//!
//! Fallback quotes are tagged with [`FALLBACK_SOURCE`] so consumers can
//! tell reference data from live data, and they are never written back
//! into the cache.

use std::collections::HashMap;

use chrono::Utc;
use lazy_static::lazy_static;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::models::{Quote, FALLBACK_SOURCE};

#[derive(Debug, Deserialize)]
struct FallbackCatalog {
    quotes: Vec<FallbackEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct FallbackEntry {
    symbol: String,
    name: String,
    price: Decimal,
    currency: String,
}

lazy_static! {
    static ref TABLE: HashMap<String, FallbackEntry> = load_table();
}

fn load_table() -> HashMap<String, FallbackEntry> {
    let json = include_str!("fallback.json");
    let catalog: FallbackCatalog =
        serde_json::from_str(json).expect("fallback.json must be valid");

    catalog
        .quotes
        .into_iter()
        .map(|entry| (entry.symbol.clone(), entry))
        .collect()
}

/// Build the terminal fallback quote for `symbol`.
///
/// Symbols in the reference table get their catalog price and name;
/// anything else gets a zero price with the symbol echoed as the name.
/// The quote is flat: previous close equals the price and both change
/// columns are zero, so a fallback answer never suggests movement that
/// was not observed.
pub fn fallback_quote(symbol: &str) -> Quote {
    let (name, price, currency) = match TABLE.get(symbol) {
        Some(entry) => (
            entry.name.clone(),
            entry.price,
            Some(entry.currency.clone()),
        ),
        None => (symbol.to_string(), Decimal::ZERO, None),
    };

    let mut quote = Quote::new(
        symbol.to_string(),
        name,
        price,
        price,
        FALLBACK_SOURCE.to_string(),
    );
    quote.currency = currency;
    quote.timestamp = Utc::now();
    quote
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_known_symbol_uses_catalog_price() {
        let quote = fallback_quote("AAPL");

        assert_eq!(quote.symbol, "AAPL");
        assert_eq!(quote.name, "Apple Inc.");
        assert_eq!(quote.price, dec!(178.50));
        assert_eq!(quote.currency.as_deref(), Some("USD"));
        assert_eq!(quote.source, FALLBACK_SOURCE);
        assert!(quote.is_fallback());
    }

    #[test]
    fn test_unknown_symbol_gets_zero_price() {
        let quote = fallback_quote("NO_SUCH_TICKER");

        assert_eq!(quote.symbol, "NO_SUCH_TICKER");
        assert_eq!(quote.name, "NO_SUCH_TICKER");
        assert_eq!(quote.price, Decimal::ZERO);
        assert_eq!(quote.currency, None);
        assert!(quote.is_fallback());
    }

    #[test]
    fn test_fallback_quotes_are_flat() {
        for symbol in ["MSFT", "UNKNOWN"] {
            let quote = fallback_quote(symbol);

            assert_eq!(quote.previous_close, quote.price);
            assert_eq!(quote.change, Decimal::ZERO);
            assert_eq!(quote.change_percent, Decimal::ZERO);
        }
    }

    #[test]
    fn test_catalog_parses_and_indexes_every_entry() {
        assert!(TABLE.len() >= 20);
        assert!(TABLE.contains_key("SPY"));
        assert!(TABLE.values().all(|entry| entry.price > Decimal::ZERO));
    }
}
