//! Public chart API provider implementation.
//!
//! The chart API serves one symbol per request at {base}/{symbol}, with
//! the current price carried in the chart metadata block. There is no
//! bulk endpoint, so batch fetches fan out into individual requests with
//! bounded concurrency, spaced by a shared [`RequestPacer`].
//!
//! Public endpoints rate limit aggressively; the pacing keeps bursts of
//! portfolio symbols from tripping that.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::SecondaryEndpoint;
use crate::errors::QuoteError;
use crate::models::{derive_change, Quote};
use crate::provider::{QuoteProvider, RequestPacer};

const PROVIDER_ID: &str = "CHART_API";

// ============================================================================
// API Response Structures
// ============================================================================

/// Top-level chart response
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartEnvelope,
}

/// Result/error pair inside the response
#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartErrorBody>,
}

/// One chart result; only the metadata block is used
#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
}

/// Instrument metadata carried by every chart response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    /// Long display name
    long_name: Option<String>,
    /// Short display name
    short_name: Option<String>,
    /// Current price
    regular_market_price: Option<f64>,
    /// Previous close per the chart window
    chart_previous_close: Option<f64>,
    /// Previous session close
    previous_close: Option<f64>,
    /// Session high
    regular_market_day_high: Option<f64>,
    /// Session low
    regular_market_day_low: Option<f64>,
    /// Trading volume
    regular_market_volume: Option<f64>,
    /// Exchange name
    exchange_name: Option<String>,
    /// Quote currency
    currency: Option<String>,
    // Note: symbol, timezone, and the ohlc arrays exist but are not used;
    // the requested symbol is authoritative for this per-symbol endpoint
}

/// Error block returned for unknown symbols
#[derive(Debug, Deserialize)]
struct ChartErrorBody {
    code: Option<String>,
    description: Option<String>,
}

// ============================================================================
// ChartApiProvider
// ============================================================================

/// Secondary quote provider backed by the public chart API.
///
/// Covers symbols the aggregator misses, at the cost of one request per
/// symbol.
pub struct ChartApiProvider {
    client: Client,
    base_url: String,
    pacer: RequestPacer,
    max_concurrency: usize,
}

impl ChartApiProvider {
    /// Create a provider for the given endpoint, with `request_timeout`
    /// applied to every call.
    pub fn new(endpoint: &SecondaryEndpoint, request_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            pacer: RequestPacer::new(endpoint.min_delay),
            max_concurrency: endpoint.max_concurrency.max(1),
        }
    }

    /// Fetch one symbol's chart metadata and map it to a quote.
    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, QuoteError> {
        // Every request waits for its pacing slot, singles included
        self.pacer.pace().await;

        let url = format!("{}/{}", self.base_url, urlencoding::encode(symbol));

        debug!("Chart API request for {}", symbol);

        let response = self
            .client
            .get(&url)
            .query(&[("interval", "1d"), ("range", "1d")])
            .send()
            .await
            .map_err(|e| {
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

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(QuoteError::RateLimited {
                provider: PROVIDER_ID.to_string(),
            });
        }

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(QuoteError::SymbolNotFound(symbol.to_string()));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QuoteError::ProviderError {
                provider: PROVIDER_ID.to_string(),
                message: format!("HTTP {} - {}", status, body),
            });
        }

        let text = response.text().await.map_err(|e| QuoteError::ProviderError {
            provider: PROVIDER_ID.to_string(),
            message: format!("Failed to read response: {}", e),
        })?;

        let parsed: ChartResponse =
            serde_json::from_str(&text).map_err(|e| QuoteError::MalformedResponse {
                provider: PROVIDER_ID.to_string(),
                message: format!("Failed to parse chart response: {}", e),
            })?;

        let envelope = parsed.chart;

        if let Some(error) = envelope.error {
            return Err(map_chart_error(symbol, error));
        }

        let meta = envelope
            .result
            .and_then(|mut results| {
                if results.is_empty() {
                    None
                } else {
                    Some(results.remove(0).meta)
                }
            })
            .ok_or_else(|| QuoteError::MalformedResponse {
                provider: PROVIDER_ID.to_string(),
                message: format!("Empty chart result for {}", symbol),
            })?;

        map_meta(symbol, meta)
    }

    /// Fetch several symbols as a paced, bounded fan-out.
    ///
    /// Unknown symbols are simply absent from the result. Errs only when
    /// no symbol succeeded and at least one failed hard.
    async fn fetch_fanout(&self, symbols: &[String]) -> Result<Vec<Quote>, QuoteError> {
        // Built eagerly: buffered over a lazy map of borrowing futures
        // fails lifetime inference inside the boxed trait method
        let fetches: Vec<_> = symbols
            .iter()
            .map(|symbol| self.fetch_quote(symbol))
            .collect();
        let results: Vec<Result<Quote, QuoteError>> = stream::iter(fetches)
            .buffered(self.max_concurrency)
            .collect()
            .await;

        let mut quotes = Vec::new();
        let mut last_error: Option<QuoteError> = None;

        for (symbol, result) in symbols.iter().zip(results) {
            match result {
                Ok(quote) => quotes.push(quote),
                Err(QuoteError::SymbolNotFound(_)) => {
                    debug!("Chart API does not know {}", symbol);
                }
                Err(err) => {
                    warn!("Chart API failed for {}: {}", symbol, err);
                    last_error = Some(err);
                }
            }
        }

        debug!(
            "Chart API: fan-out answered {} of {} symbols",
            quotes.len(),
            symbols.len()
        );

        match (quotes.is_empty(), last_error) {
            (true, Some(err)) => Err(err),
            _ => Ok(quotes),
        }
    }
}

// ============================================================================
// QuoteProvider Implementation
// ============================================================================

#[async_trait]
impl QuoteProvider for ChartApiProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    async fn fetch(&self, symbol: &str) -> Result<Quote, QuoteError> {
        debug!("Fetching {} from the chart API", symbol);
        self.fetch_quote(symbol).await
    }

    async fn fetch_many(&self, symbols: &[String]) -> Result<Vec<Quote>, QuoteError> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Fanning out {} symbols to the chart API", symbols.len());
        self.fetch_fanout(symbols).await
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Map a chart error block to the matching quote error.
fn map_chart_error(symbol: &str, error: ChartErrorBody) -> QuoteError {
    match error.code.as_deref() {
        Some("Not Found") => QuoteError::SymbolNotFound(symbol.to_string()),
        _ => QuoteError::ProviderError {
            provider: PROVIDER_ID.to_string(),
            message: error
                .description
                .unwrap_or_else(|| "Chart error without description".to_string()),
        },
    }
}

/// Convert a chart metadata block into the normalized quote shape.
fn map_meta(symbol: &str, meta: ChartMeta) -> Result<Quote, QuoteError> {
    let price_raw = meta
        .regular_market_price
        .ok_or_else(|| QuoteError::MalformedResponse {
            provider: PROVIDER_ID.to_string(),
            message: format!("Chart meta without a price for {}", symbol),
        })?;

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

    let previous_close = meta
        .chart_previous_close
        .or(meta.previous_close)
        .and_then(|v| Decimal::try_from(v).ok())
        .unwrap_or(price);

    // The chart API carries no change columns; always derived
    let (change, change_percent) = derive_change(price, previous_close);

    let name = meta
        .long_name
        .or(meta.short_name)
        .unwrap_or_else(|| symbol.to_string());

    Ok(Quote {
        symbol: symbol.to_string(),
        name,
        price,
        change,
        change_percent,
        previous_close,
        open: None,
        high: meta
            .regular_market_day_high
            .and_then(|v| Decimal::try_from(v).ok()),
        low: meta
            .regular_market_day_low
            .and_then(|v| Decimal::try_from(v).ok()),
        volume: meta
            .regular_market_volume
            .and_then(|v| Decimal::try_from(v).ok()),
        market_cap: None,
        market: meta.exchange_name,
        currency: meta.currency,
        timestamp: Utc::now(),
        source: PROVIDER_ID.to_string(),
    })
}

// ============================================================================
// Tests
// ============================================================================
