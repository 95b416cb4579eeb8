use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Source tag carried by quotes served from the static fallback table.
pub const FALLBACK_SOURCE: &str = "FALLBACK";

/// Normalized market quote for a single instrument.
///
/// Adapters translate upstream payloads into this shape, so upstream field
/// names never leak past the provider boundary. Serialized in camelCase for
/// interchange with the distributed cache tier.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    /// Canonical symbol (trimmed, uppercased)
    pub symbol: String,

    /// Display name; the symbol itself when the provider has none
    pub name: String,

    /// Current price (required)
    pub price: Decimal,

    /// Absolute change versus the previous close
    pub change: Decimal,

    /// Percentage change versus the previous close
    pub change_percent: Decimal,

    /// Previous session close (required)
    pub previous_close: Decimal,

    /// Opening price (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open: Option<Decimal>,

    /// Session high (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high: Option<Decimal>,

    /// Session low (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low: Option<Decimal>,

    /// Trading volume (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<Decimal>,

    /// Market capitalization (optional, many feeds omit it)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<Decimal>,

    /// Exchange or market identifier, when reported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market: Option<String>,

    /// Quote currency, when reported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,

    /// Instant the quote was retrieved
    pub timestamp: DateTime<Utc>,

    /// Source of the quote (AGGREGATOR, CHART_API, FALLBACK)
    pub source: String,
}

impl Quote {
    /// Create a quote with the required fields, deriving the change columns
    /// from the price and previous close.
    pub fn new(
        symbol: String,
        name: String,
        price: Decimal,
        previous_close: Decimal,
        source: String,
    ) -> Self {
        let (change, change_percent) = derive_change(price, previous_close);
        Self {
            symbol,
            name,
            price,
            change,
            change_percent,
            previous_close,
            open: None,
            high: None,
            low: None,
            volume: None,
            market_cap: None,
            market: None,
            currency: None,
            timestamp: Utc::now(),
            source,
        }
    }

    /// True when this quote came from the static fallback table rather
    /// than a live provider.
    pub fn is_fallback(&self) -> bool {
        self.source == FALLBACK_SOURCE
    }
}

/// Derive absolute and percentage change from a price and previous close.
///
/// A zero previous close yields zero change rather than a division error.
pub fn derive_change(price: Decimal, previous_close: Decimal) -> (Decimal, Decimal) {
    if previous_close.is_zero() {
        return (Decimal::ZERO, Decimal::ZERO);
    }
    let change = price - previous_close;
    let change_percent = change / previous_close * Decimal::ONE_HUNDRED;
    (change, change_percent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_quote_new_derives_change() {
        let quote = Quote::new(
            "AAPL".to_string(),
            "Apple Inc.".to_string(),
            dec!(150.00),
            dec!(148.00),
            "AGGREGATOR".to_string(),
        );
        assert_eq!(quote.price, dec!(150.00));
        assert_eq!(quote.change, dec!(2.00));
        assert!(quote.open.is_none());
        assert!(!quote.is_fallback());
    }

    #[test]
    fn test_derive_change_zero_previous_close() {
        let (change, percent) = derive_change(dec!(150.00), Decimal::ZERO);
        assert_eq!(change, Decimal::ZERO);
        assert_eq!(percent, Decimal::ZERO);
    }

    #[test]
    fn test_derive_change_percentage() {
        let (change, percent) = derive_change(dec!(110), dec!(100));
        assert_eq!(change, dec!(10));
        assert_eq!(percent, dec!(10));
    }

    #[test]
    fn test_fallback_source_tag() {
        let quote = Quote::new(
            "ZZZZ".to_string(),
            "ZZZZ".to_string(),
            dec!(1.00),
            dec!(1.00),
            FALLBACK_SOURCE.to_string(),
        );
        assert!(quote.is_fallback());
    }

    #[test]
    fn test_camel_case_wire_format() {
        let quote = Quote::new(
            "AAPL".to_string(),
            "Apple Inc.".to_string(),
            dec!(150.00),
            dec!(148.00),
            "AGGREGATOR".to_string(),
        );
        let value = serde_json::to_value(&quote).unwrap();
        assert!(value.get("changePercent").is_some());
        assert!(value.get("previousClose").is_some());
        // Absent optionals are omitted entirely, not serialized as null
        assert!(value.get("marketCap").is_none());
    }
}
