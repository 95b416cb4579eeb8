//! Quote resolution engine.
//!
//! [`QuoteEngine`] is the single entry point for consumers. Every lookup
//! runs the same pipeline:
//!
//! 1. Two-tier cache (distributed first, then local)
//! 2. In-flight deduplication, one resolution per symbol
//! 3. Live providers in configured order, each behind a circuit breaker
//! 4. Static fallback table, which always answers
//!
//! Resolution is total: apart from rejecting unusable input symbols, a
//! consumer always receives a quote. Degradation shows up in the quote's
//! `source` field rather than as an error.

mod circuit_breaker;
mod singleflight;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitMetrics, CircuitState};
pub use singleflight::{Claim, Flight, InFlightRegistry, JoinedFlight};

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use rust_decimal::Decimal;
use tokio::time::timeout;

use crate::cache::{
    batch_key, quote_key, RemoteCache, TieredCache, BATCH_NAMESPACE, QUOTE_NAMESPACE,
};
use crate::config::EngineConfig;
use crate::errors::{FailureClass, QuoteError};
use crate::fallback::fallback_quote;
use crate::models::{
    ApiStatus, CacheStats, DistributedCacheStats, Holding, ProviderId, ProviderStatus, Quote,
};
use crate::provider::{AggregatorProvider, ChartApiProvider, QuoteProvider};

/// Decimal places kept when valuing a portfolio.
const VALUATION_SCALE: u32 = 2;

/// Quote resolution engine.
///
/// Holds the cache tiers, the provider chain, the per-provider circuit
/// breaker and the in-flight registry. All state is injected through
/// [`EngineConfig`] at construction; there are no globals, so several
/// engines with different settings can coexist in one process.
pub struct QuoteEngine {
    quote_cache: TieredCache<Quote>,
    batch_cache: TieredCache<Vec<Quote>>,
    remote: Option<Arc<RemoteCache>>,
    providers: Vec<Arc<dyn QuoteProvider>>,
    breaker: CircuitBreaker,
    in_flight: InFlightRegistry<Quote>,
}

impl QuoteEngine {
    /// Create an engine with the standard provider chain and no
    /// distributed cache tier.
    pub fn new(config: EngineConfig) -> Self {
        let providers = Self::live_providers(&config);
        Self::assemble(config, providers, None)
    }

    /// Create an engine with a custom provider chain.
    ///
    /// Providers are walked in the order given.
    pub fn with_providers(config: EngineConfig, providers: Vec<Arc<dyn QuoteProvider>>) -> Self {
        Self::assemble(config, providers, None)
    }

    /// Create an engine and attach the distributed cache tier.
    ///
    /// When `config.cache.redis_url` is unset, or the connection cannot
    /// be established, the engine runs local-only. A cache outage is
    /// never a reason to refuse quotes.
    pub async fn connect(config: EngineConfig) -> Self {
        let remote = match &config.cache.redis_url {
            Some(url) => match RemoteCache::connect(url).await {
                Ok(remote) => {
                    info!("Distributed cache tier attached");
                    Some(Arc::new(remote))
                }
                Err(err) => {
                    warn!("Distributed cache unavailable, running local-only: {}", err);
                    None
                }
            },
            None => None,
        };

        let providers = Self::live_providers(&config);
        Self::assemble(config, providers, remote)
    }

    fn live_providers(config: &EngineConfig) -> Vec<Arc<dyn QuoteProvider>> {
        vec![
            Arc::new(AggregatorProvider::new(
                &config.primary,
                config.upstream.request_timeout,
            )),
            Arc::new(ChartApiProvider::new(
                &config.secondary,
                config.upstream.request_timeout,
            )),
        ]
    }

    fn assemble(
        config: EngineConfig,
        providers: Vec<Arc<dyn QuoteProvider>>,
        remote: Option<Arc<RemoteCache>>,
    ) -> Self {
        Self {
            quote_cache: TieredCache::new(QUOTE_NAMESPACE, config.cache.quote_ttl, remote.clone()),
            batch_cache: TieredCache::new(BATCH_NAMESPACE, config.cache.batch_ttl, remote.clone()),
            remote,
            providers,
            breaker: CircuitBreaker::with_config(config.breaker.clone()),
            in_flight: InFlightRegistry::new(),
        }
    }

    // =========================================================================
    // Quote Resolution
    // =========================================================================

    /// Get the current quote for one symbol.
    ///
    /// The only error a consumer can see is [`QuoteError::InvalidSymbol`]
    /// for input that cannot name an instrument; every other condition
    /// degrades through the tiers and ends at the fallback table.
    pub async fn get_quote(&self, symbol: &str) -> Result<Quote, QuoteError> {
        self.quote_with_deadline(symbol, None).await
    }

    /// Get the current quote for one symbol, giving up on live data at
    /// `deadline`.
    ///
    /// Once the deadline passes, resolution skips whatever live tiers
    /// remain and answers from the fallback table. Deadline expiry is
    /// the caller's budget running out, so it never counts against a
    /// provider's health.
    pub async fn get_quote_before(
        &self,
        symbol: &str,
        deadline: Instant,
    ) -> Result<Quote, QuoteError> {
        self.quote_with_deadline(symbol, Some(deadline)).await
    }

    async fn quote_with_deadline(
        &self,
        symbol: &str,
        deadline: Option<Instant>,
    ) -> Result<Quote, QuoteError> {
        let symbol = canonical_symbol(symbol)?;
        let key = quote_key(&symbol);

        if let Some(quote) = self.quote_cache.get(&key).await {
            debug!("Cache hit for '{}'", symbol);
            return Ok(quote);
        }

        match self.in_flight.begin(&symbol) {
            Flight::Claimed(claim) => {
                let quote = self.resolve_symbol(&symbol, deadline).await;
                claim.complete(quote.clone());
                Ok(quote)
            }
            Flight::Joined(joined) => {
                debug!("Joining in-flight resolution for '{}'", symbol);
                match join_flight(&symbol, joined, deadline).await {
                    Some(quote) => Ok(quote),
                    // Nothing published in time; re-resolve with whatever
                    // budget remains
                    None => Ok(self.resolve_symbol(&symbol, deadline).await),
                }
            }
        }
    }

    /// Get current quotes for several symbols.
    ///
    /// The result is positional: `quotes[i]` answers `symbols[i]`,
    /// duplicates included. Symbols are resolved at most once per call
    /// regardless of how often they repeat, and concurrent callers
    /// asking for an overlapping symbol share one resolution.
    pub async fn get_quotes(&self, symbols: &[String]) -> Result<Vec<Quote>, QuoteError> {
        self.quotes_with_deadline(symbols, None).await
    }

    /// Get current quotes for several symbols, giving up on live data at
    /// `deadline`.
    pub async fn get_quotes_before(
        &self,
        symbols: &[String],
        deadline: Instant,
    ) -> Result<Vec<Quote>, QuoteError> {
        self.quotes_with_deadline(symbols, Some(deadline)).await
    }

    async fn quotes_with_deadline(
        &self,
        symbols: &[String],
        deadline: Option<Instant>,
    ) -> Result<Vec<Quote>, QuoteError> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }

        let requested: Vec<String> = symbols
            .iter()
            .map(|symbol| canonical_symbol(symbol))
            .collect::<Result<_, _>>()?;

        // Resolve each distinct symbol once, in first-appearance order
        let mut seen = HashSet::new();
        let mut unique: Vec<String> = Vec::new();
        for symbol in &requested {
            if seen.insert(symbol.clone()) {
                unique.push(symbol.clone());
            }
        }

        let snapshot_key = batch_key(&unique);
        if let Some(quotes) = self.batch_cache.get(&snapshot_key).await {
            debug!("Batch snapshot hit for {} symbols", unique.len());
            return Ok(emit_in_order(&requested, &index_by_symbol(quotes)));
        }

        // Partition against the per-symbol cache in one bulk read
        let keys: Vec<String> = unique.iter().map(|symbol| quote_key(symbol)).collect();
        let cached = self.quote_cache.get_many(&keys).await;

        let mut resolved: HashMap<String, Quote> = HashMap::new();
        let mut missing: Vec<String> = Vec::new();
        for (symbol, slot) in unique.iter().zip(cached) {
            match slot {
                Some(quote) => {
                    resolved.insert(symbol.clone(), quote);
                }
                None => missing.push(symbol.clone()),
            }
        }

        if !missing.is_empty() {
            debug!(
                "Batch of {} symbols: {} cached, {} to resolve",
                unique.len(),
                resolved.len(),
                missing.len()
            );
        }

        // Claim or join an in-flight resolution per missing symbol
        let mut claimed: Vec<(String, Claim<Quote>)> = Vec::new();
        let mut joins: Vec<(String, JoinedFlight<Quote>)> = Vec::new();
        for symbol in missing {
            match self.in_flight.begin(&symbol) {
                Flight::Claimed(claim) => claimed.push((symbol, claim)),
                Flight::Joined(joined) => joins.push((symbol, joined)),
            }
        }

        // One provider walk covers every symbol this call claimed
        let mut fetched: HashMap<String, Quote> = if claimed.is_empty() {
            HashMap::new()
        } else {
            let wanted: Vec<String> = claimed.iter().map(|(symbol, _)| symbol.clone()).collect();
            self.try_providers_many(&wanted, deadline).await
        };

        if !fetched.is_empty() {
            let pairs: Vec<(String, Quote)> = fetched
                .iter()
                .map(|(symbol, quote)| (quote_key(symbol), quote.clone()))
                .collect();
            self.quote_cache
                .set_many(&pairs, self.quote_cache.default_ttl())
                .await;
        }

        for (symbol, claim) in claimed {
            let quote = match fetched.remove(&symbol) {
                Some(quote) => quote,
                None => {
                    warn!("Falling back to reference data for '{}'", symbol);
                    fallback_quote(&symbol)
                }
            };
            claim.complete(quote.clone());
            resolved.insert(symbol, quote);
        }

        for (symbol, joined) in joins {
            let quote = match join_flight(&symbol, joined, deadline).await {
                Some(quote) => quote,
                None => self.resolve_symbol(&symbol, deadline).await,
            };
            resolved.insert(symbol, quote);
        }

        // Snapshot the batch only when every answer is live data
        let all_live = unique
            .iter()
            .all(|symbol| resolved.get(symbol).is_some_and(|quote| !quote.is_fallback()));
        if all_live {
            let snapshot: Vec<Quote> = unique
                .iter()
                .filter_map(|symbol| resolved.get(symbol).cloned())
                .collect();
            self.batch_cache
                .set(&snapshot_key, &snapshot, self.batch_cache.default_ttl())
                .await;
        }

        Ok(emit_in_order(&requested, &resolved))
    }

    /// Resolve one symbol past the cache: provider chain, then fallback.
    ///
    /// Live answers are written back to the quote cache; fallback answers
    /// are not, so the next call retries the live tiers.
    async fn resolve_symbol(&self, symbol: &str, deadline: Option<Instant>) -> Quote {
        match self.try_providers(symbol, deadline).await {
            Ok(quote) => {
                let key = quote_key(symbol);
                self.quote_cache
                    .set(&key, &quote, self.quote_cache.default_ttl())
                    .await;
                quote
            }
            Err(err) => {
                warn!("Falling back to reference data for '{}': {}", symbol, err);
                fallback_quote(symbol)
            }
        }
    }

    /// Walk the provider chain for one symbol.
    ///
    /// Returns the last provider error when no tier could answer; the
    /// caller turns that into a fallback quote, never an escape.
    async fn try_providers(
        &self,
        symbol: &str,
        deadline: Option<Instant>,
    ) -> Result<Quote, QuoteError> {
        let mut last_error: Option<QuoteError> = None;

        for provider in &self.providers {
            let provider_id: ProviderId = Cow::Borrowed(provider.id());

            if deadline_reached(deadline) {
                debug!("Deadline reached for '{}', skipping remaining providers", symbol);
                break;
            }

            if !self.breaker.is_allowed(&provider_id) {
                debug!("Circuit breaker open for provider '{}', skipping", provider_id);
                continue;
            }

            let attempt = match deadline {
                Some(deadline) => {
                    let budget = deadline.saturating_duration_since(Instant::now());
                    match timeout(budget, provider.fetch(symbol)).await {
                        Ok(result) => result,
                        Err(_) => {
                            debug!(
                                "Deadline reached while '{}' was fetching '{}'",
                                provider_id, symbol
                            );
                            break;
                        }
                    }
                }
                None => provider.fetch(symbol).await,
            };

            match attempt {
                Ok(quote) => {
                    self.breaker.record_success(&provider_id);
                    return Ok(quote);
                }
                Err(err) => {
                    if err.failure_class() == FailureClass::Penalty {
                        self.breaker.record_failure(&provider_id);
                    }
                    debug!(
                        "Provider '{}' could not answer '{}': {}",
                        provider_id, symbol, err
                    );
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or(QuoteError::AllProvidersExhausted))
    }

    /// Walk the provider chain for a set of symbols.
    ///
    /// Each tier is asked only for the symbols still outstanding. A tier
    /// that answers at all counts as healthy, even when it covered only
    /// part of the request; whatever it left out escalates to the next
    /// tier. Returns the live quotes keyed by symbol.
    async fn try_providers_many(
        &self,
        symbols: &[String],
        deadline: Option<Instant>,
    ) -> HashMap<String, Quote> {
        let mut covered: HashMap<String, Quote> = HashMap::new();
        let mut outstanding: Vec<String> = symbols.to_vec();

        for provider in &self.providers {
            if outstanding.is_empty() {
                break;
            }

            let provider_id: ProviderId = Cow::Borrowed(provider.id());

            if deadline_reached(deadline) {
                debug!(
                    "Deadline reached with {} symbols unresolved, skipping remaining providers",
                    outstanding.len()
                );
                break;
            }

            if !self.breaker.is_allowed(&provider_id) {
                debug!("Circuit breaker open for provider '{}', skipping", provider_id);
                continue;
            }

            let attempt = match deadline {
                Some(deadline) => {
                    let budget = deadline.saturating_duration_since(Instant::now());
                    match timeout(budget, provider.fetch_many(&outstanding)).await {
                        Ok(result) => result,
                        Err(_) => {
                            debug!(
                                "Deadline reached while '{}' was fetching {} symbols",
                                provider_id,
                                outstanding.len()
                            );
                            break;
                        }
                    }
                }
                None => provider.fetch_many(&outstanding).await,
            };

            match attempt {
                Ok(quotes) => {
                    self.breaker.record_success(&provider_id);
                    debug!(
                        "Provider '{}' answered {} of {} symbols",
                        provider_id,
                        quotes.len(),
                        outstanding.len()
                    );
                    for quote in quotes {
                        covered.insert(quote.symbol.clone(), quote);
                    }
                    outstanding.retain(|symbol| !covered.contains_key(symbol));
                }
                Err(err) => {
                    if err.failure_class() == FailureClass::Penalty {
                        self.breaker.record_failure(&provider_id);
                    }
                    debug!("Provider '{}' bulk fetch failed: {}", provider_id, err);
                }
            }
        }

        covered
    }

    // =========================================================================
    // Consumer Conveniences
    // =========================================================================

    /// Get just the current price for one symbol.
    pub async fn get_current_price(&self, symbol: &str) -> Result<Decimal, QuoteError> {
        Ok(self.get_quote(symbol).await?.price)
    }

    /// Value a portfolio of holdings at current prices.
    ///
    /// Prices every holding in one batch lookup and returns the total
    /// rounded to cents. An empty portfolio is worth zero.
    pub async fn calculate_portfolio_value(
        &self,
        holdings: &[Holding],
    ) -> Result<Decimal, QuoteError> {
        if holdings.is_empty() {
            return Ok(Decimal::ZERO);
        }

        let symbols: Vec<String> = holdings.iter().map(|h| h.symbol.clone()).collect();
        let quotes = self.get_quotes(&symbols).await?;

        let total: Decimal = holdings
            .iter()
            .zip(&quotes)
            .map(|(holding, quote)| holding.quantity * quote.price)
            .sum();

        Ok(total.round_dp(VALUATION_SCALE))
    }

    // =========================================================================
    // Operational Surface
    // =========================================================================

    /// Report cache occupancy across both tiers.
    pub async fn get_cache_stats(&self) -> CacheStats {
        let local_size = self.quote_cache.local_len() + self.batch_cache.local_len();

        let distributed = match &self.remote {
            Some(remote) => {
                let key_count = match remote.count_matching(QUOTE_NAMESPACE).await {
                    Ok(count) => count,
                    Err(err) => {
                        warn!("Distributed cache stats unavailable: {}", err);
                        0
                    }
                };
                DistributedCacheStats {
                    connected: remote.is_connected(),
                    key_count,
                }
            }
            None => DistributedCacheStats {
                connected: false,
                key_count: 0,
            },
        };

        CacheStats {
            local_size,
            distributed,
        }
    }

    /// Invalidate cached quotes in both tiers.
    ///
    /// With a symbol, drops that symbol's quote along with every batch
    /// snapshot, since any snapshot may contain it. Without one, drops
    /// everything.
    pub async fn clear_cache(&self, symbol: Option<&str>) -> Result<(), QuoteError> {
        match symbol {
            Some(symbol) => {
                let symbol = canonical_symbol(symbol)?;
                self.quote_cache.remove(&quote_key(&symbol)).await;
                self.batch_cache.flush().await;
                info!("Cache cleared for '{}'", symbol);
            }
            None => {
                self.quote_cache.flush().await;
                self.batch_cache.flush().await;
                info!("Cache cleared");
            }
        }

        Ok(())
    }

    /// Report availability and failure counts for the live tiers.
    pub fn get_api_status(&self) -> ApiStatus {
        ApiStatus {
            primary: self.provider_status(0),
            secondary: self.provider_status(1),
        }
    }

    fn provider_status(&self, index: usize) -> ProviderStatus {
        match self.providers.get(index) {
            Some(provider) => {
                let provider_id: ProviderId = Cow::Borrowed(provider.id());
                // is_allowed applies a due cooldown before the counter is read
                let available = self.breaker.is_allowed(&provider_id);
                ProviderStatus {
                    available,
                    failures: self.breaker.failure_count(&provider_id),
                }
            }
            None => ProviderStatus {
                available: true,
                failures: 0,
            },
        }
    }

    /// Reset every provider circuit to closed with a zero failure count.
    pub fn reset_failure_counts(&self) {
        self.breaker.reset_all();
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Normalize a caller-supplied symbol to its canonical form.
///
/// Canonical symbols are trimmed and uppercased. Input that is empty
/// after trimming cannot name an instrument and is rejected, as is
/// anything carrying a delimiter the cache keys and bulk queries build
/// on (comma, colon, embedded whitespace).
fn canonical_symbol(symbol: &str) -> Result<String, QuoteError> {
    let canonical = symbol.trim().to_uppercase();

    let delimiter = |c: char| c == ',' || c == ':' || c.is_whitespace();
    if canonical.is_empty() || canonical.chars().any(delimiter) {
        return Err(QuoteError::InvalidSymbol(symbol.to_string()));
    }

    Ok(canonical)
}

fn deadline_reached(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}

/// Wait on another caller's in-flight resolution, bounded by `deadline`.
///
/// `None` means no result was published in time: the claimant abandoned
/// the flight, or the deadline expired while waiting. The caller then
/// resolves on its own with whatever budget remains.
async fn join_flight(
    symbol: &str,
    joined: JoinedFlight<Quote>,
    deadline: Option<Instant>,
) -> Option<Quote> {
    match deadline {
        Some(deadline) => {
            let budget = deadline.saturating_duration_since(Instant::now());
            match timeout(budget, joined).await {
                Ok(published) => published,
                Err(_) => {
                    debug!(
                        "Deadline reached while waiting on the in-flight fetch of '{}'",
                        symbol
                    );
                    None
                }
            }
        }
        None => joined.await,
    }
}

fn index_by_symbol(quotes: Vec<Quote>) -> HashMap<String, Quote> {
    quotes
        .into_iter()
        .map(|quote| (quote.symbol.clone(), quote))
        .collect()
}

/// Expand resolved quotes back to the caller's order, duplicates included.
///
/// Resolution is total, so every requested symbol has an entry; a hole
/// in the map still answers with reference data rather than shifting
/// positions.
fn emit_in_order(requested: &[String], resolved: &HashMap<String, Quote>) -> Vec<Quote> {
    requested
        .iter()
        .map(|symbol| match resolved.get(symbol) {
            Some(quote) => quote.clone(),
            None => fallback_quote(symbol),
        })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
