//! Aggregator service provider implementation.
//!
//! The aggregator is the deployment's own market data service, sitting in
//! front of several upstream feeds. It exposes two endpoints:
//! - Single quotes via /quote/{symbol}
//! - Bulk quotes via /quotes?symbols=A,B,C
//!
//! The bulk endpoint answers with whichever symbols it knows; callers
//! must treat the result as a subset of what they asked for.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::PrimaryEndpoint;
use crate::errors::QuoteError;
use crate::models::{derive_change, Quote};
use crate::provider::QuoteProvider;

const PROVIDER_ID: &str = "AGGREGATOR";

// ============================================================================
// API Response Structures
// ============================================================================

/// Quote payload from /quote/{symbol}, also the element type of /quotes
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AggregatorQuote {
    /// Symbol echoed back by the service
    symbol: Option<String>,
    /// Display name
    company_name: Option<String>,
    /// Current price
    latest_price: Option<f64>,
    /// Previous session close
    previous_close: Option<f64>,
    /// Absolute change since the previous close
    change: Option<f64>,
    /// Percent change since the previous close
    change_percent: Option<f64>,
    /// Opening price
    open: Option<f64>,
    /// Session high
    high: Option<f64>,
    /// Session low
    low: Option<f64>,
    /// Trading volume
    volume: Option<f64>,
    /// Market capitalization
    market_cap: Option<f64>,
    /// Listing exchange
    primary_exchange: Option<String>,
    /// Quote currency
    currency: Option<String>,
    // Note: latestUpdate exists but quotes are stamped at retrieval instead
}

/// Error response from the aggregator
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<String>,
}

// ============================================================================
// AggregatorProvider
// ============================================================================

/// Primary quote provider backed by the aggregator service.
///
/// The only tier with a native bulk endpoint, so it goes first in the
/// resolution order.
pub struct AggregatorProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl AggregatorProvider {
    /// Create a provider for the given endpoint, with `request_timeout`
    /// applied to every call.
    pub fn new(endpoint: &PrimaryEndpoint, request_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            api_key: endpoint.api_key.clone(),
        }
    }

    /// Make a GET request to the aggregator service.
    async fn fetch_text(&self, path: &str, query: &[(&str, &str)]) -> Result<String, QuoteError> {
        let url = format!("{}{}", self.base_url, path);

        let mut request = self.client.get(&url);

        if let Some(key) = &self.api_key {
            request = request.header("X-Api-Key", key);
        }
        for (key, value) in query {
            request = request.query(&[(key, value)]);
        }

        debug!("Aggregator request: {}", path);

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                QuoteError::Timeout {
                    provider: PROVIDER_ID.to_string(),
                }
            } else {
                QuoteError::ProviderError {
                    provider: PROVIDER_ID.to_string(),
                    message: format!("Request failed: {}", e),
                }
            }
        })?;

        let status = response.status();

        // Handle rate limiting
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(QuoteError::RateLimited {
                provider: PROVIDER_ID.to_string(),
            });
        }

        // Handle unauthorized (invalid API key)
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(QuoteError::ProviderError {
                provider: PROVIDER_ID.to_string(),
                message: "Invalid or missing API key".to_string(),
            });
        }

        // The single-quote endpoint answers 404 for unknown symbols
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(QuoteError::SymbolNotFound(format!("No data at {}", path)));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();

            // Try to parse error message
            if let Ok(error_resp) = serde_json::from_str::<ErrorResponse>(&body) {
                if let Some(error_msg) = error_resp.error {
                    return Err(QuoteError::ProviderError {
                        provider: PROVIDER_ID.to_string(),
                        message: error_msg,
                    });
                }
            }

            return Err(QuoteError::ProviderError {
                provider: PROVIDER_ID.to_string(),
                message: format!("HTTP {} - {}", status, body),
            });
        }

        response.text().await.map_err(|e| QuoteError::ProviderError {
            provider: PROVIDER_ID.to_string(),
            message: format!("Failed to read response: {}", e),
        })
    }

    /// Fetch one symbol from /quote/{symbol}.
    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, QuoteError> {
        let path = format!("/quote/{}", urlencoding::encode(symbol));
        let text = self.fetch_text(&path, &[]).await?;

        let payload: AggregatorQuote =
            serde_json::from_str(&text).map_err(|e| QuoteError::MalformedResponse {
                provider: PROVIDER_ID.to_string(),
                message: format!("Failed to parse quote response: {}", e),
            })?;

        map_quote(Some(symbol), payload)
    }

    /// Fetch several symbols from /quotes in one call.
    async fn fetch_bulk(&self, symbols: &[String]) -> Result<Vec<Quote>, QuoteError> {
        let joined = symbols.join(",");
        let text = self
            .fetch_text("/quotes", &[("symbols", joined.as_str())])
            .await?;

        let payloads: Vec<AggregatorQuote> =
            serde_json::from_str(&text).map_err(|e| QuoteError::MalformedResponse {
                provider: PROVIDER_ID.to_string(),
                message: format!("Failed to parse bulk response: {}", e),
            })?;

        let quotes = collect_bulk(payloads)?;

        debug!(
            "Aggregator: bulk answered {} of {} symbols",
            quotes.len(),
            symbols.len()
        );

        Ok(quotes)
    }
}

// ============================================================================
// QuoteProvider Implementation
// ============================================================================

#[async_trait]
impl QuoteProvider for AggregatorProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    async fn fetch(&self, symbol: &str) -> Result<Quote, QuoteError> {
        debug!("Fetching {} from the aggregator", symbol);
        self.fetch_quote(symbol).await
    }

    async fn fetch_many(&self, symbols: &[String]) -> Result<Vec<Quote>, QuoteError> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Fetching {} symbols from the aggregator in bulk", symbols.len());
        self.fetch_bulk(symbols).await
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Map bulk payload entries, keeping the usable ones.
///
/// Entries the service has no data for are dropped per the subset contract.
/// Errs only when nothing mapped and at least one entry was malformed.
fn collect_bulk(payloads: Vec<AggregatorQuote>) -> Result<Vec<Quote>, QuoteError> {
    let mut quotes = Vec::with_capacity(payloads.len());
    let mut last_error: Option<QuoteError> = None;

    for payload in payloads {
        match map_quote(None, payload) {
            Ok(quote) => quotes.push(quote),
            Err(QuoteError::SymbolNotFound(reason)) => {
                debug!("Aggregator: bulk entry without data: {}", reason);
            }
            Err(err) => {
                warn!("Aggregator: dropping malformed bulk entry: {}", err);
                last_error = Some(err);
            }
        }
    }

    match (quotes.is_empty(), last_error) {
        (true, Some(err)) => Err(err),
        _ => Ok(quotes),
    }
}

/// Convert an aggregator payload into the normalized quote shape.
///
/// `requested` carries the canonical symbol for single-quote calls; bulk
/// entries identify themselves through the echoed symbol instead.
fn map_quote(requested: Option<&str>, payload: AggregatorQuote) -> Result<Quote, QuoteError> {
    let symbol = match requested {
        Some(symbol) => symbol.to_string(),
        None => match payload.symbol.as_deref() {
            Some(echoed) => echoed.trim().to_uppercase(),
            None => {
                return Err(QuoteError::MalformedResponse {
                    provider: PROVIDER_ID.to_string(),
                    message: "Bulk entry without a symbol".to_string(),
                })
            }
        },
    };

    let price_raw = payload
        .latest_price
        .ok_or_else(|| QuoteError::SymbolNotFound(format!("No quote data for symbol: {}", symbol)))?;

    let price = Decimal::try_from(price_raw).map_err(|_| QuoteError::MalformedResponse {
        provider: PROVIDER_ID.to_string(),
        message: format!("Invalid price: {}", price_raw),
    })?;

    // Quotes carry non-negative prices; a negative one is upstream garbage
    if price.is_sign_negative() && !price.is_zero() {
        return Err(QuoteError::MalformedResponse {
            provider: PROVIDER_ID.to_string(),
            message: format!("Negative price for {}: {}", symbol, price),
        });
    }

    let previous_close = payload
        .previous_close
        .and_then(|v| Decimal::try_from(v).ok())
        .unwrap_or(price);

    // Use the service's change columns when both are present and sound,
    // derive them otherwise
    let (change, change_percent) = match (payload.change, payload.change_percent) {
        (Some(c), Some(p)) => match (Decimal::try_from(c).ok(), Decimal::try_from(p).ok()) {
            (Some(c), Some(p)) => (c, p),
            _ => derive_change(price, previous_close),
        },
        _ => derive_change(price, previous_close),
    };

    let name = payload.company_name.unwrap_or_else(|| symbol.clone());

    Ok(Quote {
        symbol,
        name,
        price,
        change,
        change_percent,
        previous_close,
        open: payload.open.and_then(|v| Decimal::try_from(v).ok()),
        high: payload.high.and_then(|v| Decimal::try_from(v).ok()),
        low: payload.low.and_then(|v| Decimal::try_from(v).ok()),
        volume: payload.volume.and_then(|v| Decimal::try_from(v).ok()),
        market_cap: payload.market_cap.and_then(|v| Decimal::try_from(v).ok()),
        market: payload.primary_exchange,
        currency: payload.currency,
        timestamp: Utc::now(),
        source: PROVIDER_ID.to_string(),
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_provider_id() {
        let provider = AggregatorProvider::new(&PrimaryEndpoint::default(), Duration::from_secs(10));
        assert_eq!(provider.id(), "AGGREGATOR");
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let endpoint = PrimaryEndpoint {
            base_url: "http://localhost:4000/api/market/".to_string(),
            api_key: None,
        };
        let provider = AggregatorProvider::new(&endpoint, Duration::from_secs(10));
        assert_eq!(provider.base_url, "http://localhost:4000/api/market");
    }

    #[test]
    fn test_quote_payload_parsing() {
        let json = r#"{
            "symbol": "AAPL",
            "companyName": "Apple Inc.",
            "latestPrice": 150.25,
            "previousClose": 148.75,
            "change": 1.5,
            "changePercent": 1.0084,
            "open": 149.0,
            "high": 152.0,
            "low": 148.5,
            "volume": 58000000,
            "marketCap": 2800000000000,
            "primaryExchange": "NASDAQ",
            "currency": "USD",
            "latestUpdate": 1704067200
        }"#;

        let payload: AggregatorQuote = serde_json::from_str(json).unwrap();
        assert_eq!(payload.symbol.as_deref(), Some("AAPL"));
        assert_eq!(payload.latest_price, Some(150.25));
        assert_eq!(payload.previous_close, Some(148.75));
        assert_eq!(payload.primary_exchange.as_deref(), Some("NASDAQ"));
    }

    #[test]
    fn test_map_quote_uses_service_change_columns() {
        let json = r#"{
            "companyName": "Apple Inc.",
            "latestPrice": 150.25,
            "previousClose": 148.75,
            "change": 1.5,
            "changePercent": 1.25
        }"#;
        let payload: AggregatorQuote = serde_json::from_str(json).unwrap();

        let quote = map_quote(Some("AAPL"), payload).unwrap();
        assert_eq!(quote.symbol, "AAPL");
        assert_eq!(quote.name, "Apple Inc.");
        assert_eq!(quote.change, dec!(1.5));
        assert_eq!(quote.change_percent, dec!(1.25));
        assert_eq!(quote.source, "AGGREGATOR");
    }

    #[test]
    fn test_map_quote_derives_change_when_missing() {
        let json = r#"{
            "latestPrice": 110.0,
            "previousClose": 100.0
        }"#;
        let payload: AggregatorQuote = serde_json::from_str(json).unwrap();

        let quote = map_quote(Some("TEST"), payload).unwrap();
        assert_eq!(quote.change, dec!(10));
        assert_eq!(quote.change_percent, dec!(10));
    }

    #[test]
    fn test_map_quote_without_previous_close_reads_flat() {
        let json = r#"{"latestPrice": 42.5}"#;
        let payload: AggregatorQuote = serde_json::from_str(json).unwrap();

        let quote = map_quote(Some("TEST"), payload).unwrap();
        assert_eq!(quote.previous_close, dec!(42.5));
        assert_eq!(quote.change, Decimal::ZERO);
        assert_eq!(quote.change_percent, Decimal::ZERO);
    }

    #[test]
    fn test_map_quote_without_price_is_symbol_not_found() {
        let json = r#"{"symbol": "ZZZZ"}"#;
        let payload: AggregatorQuote = serde_json::from_str(json).unwrap();

        let err = map_quote(Some("ZZZZ"), payload).unwrap_err();
        assert!(matches!(err, QuoteError::SymbolNotFound(_)));
    }

    #[test]
    fn test_bulk_entry_symbol_is_canonicalized() {
        let json = r#"{"symbol": " aapl ", "latestPrice": 150.25}"#;
        let payload: AggregatorQuote = serde_json::from_str(json).unwrap();

        let quote = map_quote(None, payload).unwrap();
        assert_eq!(quote.symbol, "AAPL");
    }

    #[test]
    fn test_bulk_entry_without_symbol_is_malformed() {
        let json = r#"{"latestPrice": 150.25}"#;
        let payload: AggregatorQuote = serde_json::from_str(json).unwrap();

        let err = map_quote(None, payload).unwrap_err();
        assert!(matches!(err, QuoteError::MalformedResponse { .. }));
    }

    #[test]
    fn test_name_falls_back_to_symbol() {
        let json = r#"{"latestPrice": 10.0}"#;
        let payload: AggregatorQuote = serde_json::from_str(json).unwrap();

        let quote = map_quote(Some("XYZ"), payload).unwrap();
        assert_eq!(quote.name, "XYZ");
    }

    #[test]
    fn test_negative_price_is_malformed() {
        let json = r#"{"latestPrice": -5.25}"#;
        let payload: AggregatorQuote = serde_json::from_str(json).unwrap();

        let err = map_quote(Some("TEST"), payload).unwrap_err();
        assert!(matches!(err, QuoteError::MalformedResponse { .. }));
    }

    #[test]
    fn test_bulk_with_only_malformed_entries_is_an_error() {
        let json = r#"[{"symbol": "AAPL", "latestPrice": -5.0}]"#;
        let payloads: Vec<AggregatorQuote> = serde_json::from_str(json).unwrap();

        let err = collect_bulk(payloads).unwrap_err();
        assert!(matches!(err, QuoteError::MalformedResponse { .. }));
    }

    #[test]
    fn test_bulk_keeps_good_entries_despite_malformed_ones() {
        let json = r#"[
            {"symbol": "AAPL", "latestPrice": 150.25},
            {"symbol": "BAD", "latestPrice": -5.0}
        ]"#;
        let payloads: Vec<AggregatorQuote> = serde_json::from_str(json).unwrap();

        let quotes = collect_bulk(payloads).unwrap();
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].symbol, "AAPL");
        assert_eq!(quotes[0].price, dec!(150.25));
    }

    #[test]
    fn test_bulk_of_unknown_symbols_is_an_empty_subset() {
        let json = r#"[{"symbol": "ZZZZ"}, {"symbol": "YYYY"}]"#;
        let payloads: Vec<AggregatorQuote> = serde_json::from_str(json).unwrap();

        assert!(collect_bulk(payloads).unwrap().is_empty());
    }
}
