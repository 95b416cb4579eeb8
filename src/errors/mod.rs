//! Error types and failure classification for quote resolution.
//!
//! This module provides:
//! - [`QuoteError`]: The main error enum for all quote operations
//! - [`FailureClass`]: Classification for determining how the engine reacts

mod class;

pub use class::FailureClass;

use thiserror::Error;

/// Errors that can occur while resolving quotes.
///
/// Each variant is classified via [`failure_class`](Self::failure_class), which
/// determines whether the engine records a health penalty against the provider
/// that produced it before moving on to the next resolution tier.
#[derive(Error, Debug)]
pub enum QuoteError {
    /// The caller passed a symbol that cannot name an instrument.
    /// This is the only error that reaches consumers of the engine.
    #[error("Invalid symbol: {0:?}")]
    InvalidSymbol(String),

    /// The provider does not know the requested symbol.
    /// Another tier may still know it, so no penalty is recorded.
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// The request to the provider exceeded the per-call time budget.
    #[error("Timeout: {provider}")]
    Timeout {
        /// The provider that timed out
        provider: String,
    },

    /// The provider rate limited the request (HTTP 429).
    #[error("Rate limited: {provider}")]
    RateLimited {
        /// The provider that rate limited the request
        provider: String,
    },

    /// The provider answered, but the payload could not be decoded
    /// into a quote.
    #[error("Malformed response: {provider} - {message}")]
    MalformedResponse {
        /// The provider that returned the payload
        provider: String,
        /// What was wrong with it
        message: String,
    },

    /// The provider returned a non-success status or a transport-level
    /// failure that is not a timeout.
    #[error("Provider error: {provider} - {message}")]
    ProviderError {
        /// The provider that returned the error
        provider: String,
        /// The error message from the provider
        message: String,
    },

    /// The circuit breaker is open for this provider.
    /// The provider was skipped without being called.
    #[error("Circuit open: {provider}")]
    CircuitOpen {
        /// The provider with an open circuit
        provider: String,
    },

    /// The distributed cache tier could not be reached or returned an
    /// error. Callers degrade to the local tier and log this.
    #[error("Cache tier unavailable: {0}")]
    CacheUnavailable(String),

    /// Every provider tier was attempted or skipped and none produced
    /// a quote. The static fallback table answers instead.
    #[error("All providers exhausted")]
    AllProvidersExhausted,

    /// A network error occurred while communicating with a provider.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl From<redis::RedisError> for QuoteError {
    fn from(err: redis::RedisError) -> Self {
        Self::CacheUnavailable(err.to_string())
    }
}

impl QuoteError {
    /// Returns the failure classification for this error.
    ///
    /// - [`FailureClass::Caller`]: surfaced to the consumer, no fallback
    /// - [`FailureClass::Penalty`]: recorded against the provider circuit,
    ///   then the next tier is attempted
    /// - [`FailureClass::NoPenalty`]: next tier attempted, health untouched
    ///
    /// # Examples
    ///
    /// ```
    /// use quoteflow::errors::{FailureClass, QuoteError};
    ///
    /// let error = QuoteError::Timeout { provider: "AGGREGATOR".to_string() };
    /// assert_eq!(error.failure_class(), FailureClass::Penalty);
    ///
    /// let error = QuoteError::SymbolNotFound("ZZZZ".to_string());
    /// assert_eq!(error.failure_class(), FailureClass::NoPenalty);
    /// ```
    pub fn failure_class(&self) -> FailureClass {
        match self {
            // Bad input - reject before resolution starts
            Self::InvalidSymbol(_) => FailureClass::Caller,

            // Provider faults - count toward opening the circuit
            Self::Timeout { .. }
            | Self::RateLimited { .. }
            | Self::MalformedResponse { .. }
            | Self::ProviderError { .. }
            | Self::Network(_) => FailureClass::Penalty,

            // Neutral outcomes - keep walking the chain
            Self::SymbolNotFound(_)
            | Self::CircuitOpen { .. }
            | Self::CacheUnavailable(_)
            | Self::AllProvidersExhausted => FailureClass::NoPenalty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_symbol_is_caller_error() {
        let error = QuoteError::InvalidSymbol("".to_string());
        assert_eq!(error.failure_class(), FailureClass::Caller);
    }

    #[test]
    fn test_timeout_penalizes_provider() {
        let error = QuoteError::Timeout {
            provider: "AGGREGATOR".to_string(),
        };
        assert_eq!(error.failure_class(), FailureClass::Penalty);
    }

    #[test]
    fn test_rate_limited_penalizes_provider() {
        let error = QuoteError::RateLimited {
            provider: "CHART_API".to_string(),
        };
        assert_eq!(error.failure_class(), FailureClass::Penalty);
    }

    #[test]
    fn test_malformed_response_penalizes_provider() {
        let error = QuoteError::MalformedResponse {
            provider: "AGGREGATOR".to_string(),
            message: "missing price field".to_string(),
        };
        assert_eq!(error.failure_class(), FailureClass::Penalty);
    }

    #[test]
    fn test_provider_error_penalizes_provider() {
        let error = QuoteError::ProviderError {
            provider: "AGGREGATOR".to_string(),
            message: "Internal server error".to_string(),
        };
        assert_eq!(error.failure_class(), FailureClass::Penalty);
    }

    #[test]
    fn test_symbol_not_found_is_not_penalized() {
        let error = QuoteError::SymbolNotFound("ZZZZ".to_string());
        assert_eq!(error.failure_class(), FailureClass::NoPenalty);
    }

    #[test]
    fn test_circuit_open_is_not_penalized() {
        let error = QuoteError::CircuitOpen {
            provider: "AGGREGATOR".to_string(),
        };
        assert_eq!(error.failure_class(), FailureClass::NoPenalty);
    }

    #[test]
    fn test_cache_unavailable_is_not_penalized() {
        let error = QuoteError::CacheUnavailable("connection refused".to_string());
        assert_eq!(error.failure_class(), FailureClass::NoPenalty);
    }

    #[test]
    fn test_all_providers_exhausted_is_not_penalized() {
        let error = QuoteError::AllProvidersExhausted;
        assert_eq!(error.failure_class(), FailureClass::NoPenalty);
    }

    #[test]
    fn test_error_display() {
        let error = QuoteError::SymbolNotFound("ZZZZ".to_string());
        assert_eq!(format!("{}", error), "Symbol not found: ZZZZ");

        let error = QuoteError::Timeout {
            provider: "AGGREGATOR".to_string(),
        };
        assert_eq!(format!("{}", error), "Timeout: AGGREGATOR");

        let error = QuoteError::MalformedResponse {
            provider: "CHART_API".to_string(),
            message: "empty result array".to_string(),
        };
        assert_eq!(
            format!("{}", error),
            "Malformed response: CHART_API - empty result array"
        );
    }
}
