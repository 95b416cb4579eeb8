//! Per-provider circuit breaker for fault tolerance.
//!
//! Implements the circuit breaker pattern to stop hammering a provider
//! that keeps failing. The circuit has two states:
//!
//! - **Closed**: Normal operation, requests are allowed through.
//! - **Open**: Provider is failing, requests are blocked.
//!
//! An open circuit closes again on its own once the cooldown has elapsed,
//! with the failure count starting over from zero. There is no probing
//! half-open phase: after the cooldown, normal traffic resumes directly.
//! The circuit state is in-memory and resets on application restart.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::models::ProviderId;

/// Default number of failures before opening the circuit.
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default time an open circuit stays open.
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(300);

/// Circuit breaker state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CircuitState {
    /// Normal operation - requests are allowed.
    Closed,
    /// Provider is failing - requests are blocked.
    Open,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
        }
    }
}

/// Internal circuit state for a single provider.
#[derive(Debug)]
struct Circuit {
    /// Current circuit state.
    state: CircuitState,
    /// Number of consecutive failures.
    failure_count: u32,
    /// When the circuit opened. `None` while closed.
    opened_at: Option<Instant>,
}

impl Circuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            opened_at: None,
        }
    }

    /// Close the circuit again if its cooldown has elapsed.
    ///
    /// The cooldown is measured from the instant the circuit opened, so
    /// stray failures recorded while open do not extend it.
    fn apply_cooldown(&mut self, cooldown: Duration) -> bool {
        if self.state != CircuitState::Open {
            return false;
        }

        match self.opened_at {
            Some(opened_at) if opened_at.elapsed() >= cooldown => {
                self.state = CircuitState::Closed;
                self.failure_count = 0;
                self.opened_at = None;
                true
            }
            _ => false,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Number of failures before opening the circuit.
    pub failure_threshold: u32,
    /// Time an open circuit stays open before closing on its own.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

/// Per-provider circuit breaker.
///
/// Thread-safe circuit breaker that tracks consecutive failures per
/// provider and blocks requests to providers that keep failing. The
/// cooldown transition is applied lazily, on the next query against the
/// circuit, so no background task is needed.
pub struct CircuitBreaker {
    /// Per-provider circuit states.
    circuits: Mutex<HashMap<String, Circuit>>,
    /// Configuration.
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with default settings.
    pub fn new() -> Self {
        Self {
            circuits: Mutex::new(HashMap::new()),
            config: CircuitBreakerConfig::default(),
        }
    }

    /// Create a circuit breaker with custom configuration.
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            circuits: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Lock the circuits mutex, recovering from poison if necessary.
    fn lock_circuits(&self) -> MutexGuard<'_, HashMap<String, Circuit>> {
        self.circuits.lock().unwrap_or_else(|poisoned| {
            warn!("Circuit breaker mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Check if requests are allowed for a provider.
    ///
    /// Returns true while the circuit is Closed. An Open circuit whose
    /// cooldown has elapsed closes here, failure count back at zero, and
    /// the request is allowed.
    pub fn is_allowed(&self, provider: &ProviderId) -> bool {
        let mut circuits = self.lock_circuits();

        let circuit = circuits
            .entry(provider.to_string())
            .or_insert_with(Circuit::new);

        if circuit.apply_cooldown(self.config.cooldown) {
            info!(
                "Circuit breaker: cooldown elapsed for '{}', closing circuit",
                provider
            );
        }

        circuit.state == CircuitState::Closed
    }

    /// Record a successful request for a provider.
    ///
    /// Closes the circuit and resets the failure count.
    pub fn record_success(&self, provider: &ProviderId) {
        let mut circuits = self.lock_circuits();

        let circuit = circuits
            .entry(provider.to_string())
            .or_insert_with(Circuit::new);

        if circuit.state == CircuitState::Open {
            info!(
                "Circuit breaker: success for '{}', closing circuit",
                provider
            );
        } else if circuit.failure_count > 0 {
            debug!(
                "Circuit breaker: success for '{}', failure count reset",
                provider
            );
        }

        circuit.state = CircuitState::Closed;
        circuit.failure_count = 0;
        circuit.opened_at = None;
    }

    /// Record a failed request for a provider.
    ///
    /// Increments the failure count and opens the circuit once the count
    /// reaches the threshold. Failures recorded while the circuit is
    /// already open do not reschedule the cooldown.
    pub fn record_failure(&self, provider: &ProviderId) {
        let mut circuits = self.lock_circuits();

        let circuit = circuits
            .entry(provider.to_string())
            .or_insert_with(Circuit::new);

        circuit.failure_count += 1;

        match circuit.state {
            CircuitState::Closed => {
                if circuit.failure_count >= self.config.failure_threshold {
                    info!(
                        "Circuit breaker: opening circuit for '{}' after {} failures",
                        provider, circuit.failure_count
                    );
                    circuit.state = CircuitState::Open;
                    circuit.opened_at = Some(Instant::now());
                } else {
                    debug!(
                        "Circuit breaker: failure for '{}' ({}/{})",
                        provider, circuit.failure_count, self.config.failure_threshold
                    );
                }
            }
            CircuitState::Open => {
                debug!(
                    "Circuit breaker: additional failure for '{}' (already open)",
                    provider
                );
            }
        }
    }

    /// Get the current state for a provider.
    pub fn state(&self, provider: &ProviderId) -> CircuitState {
        let circuits = self.lock_circuits();

        circuits
            .get(provider.as_ref())
            .map(|c| c.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Get the failure count for a provider.
    pub fn failure_count(&self, provider: &ProviderId) -> u32 {
        let circuits = self.lock_circuits();

        circuits
            .get(provider.as_ref())
            .map(|c| c.failure_count)
            .unwrap_or(0)
    }

    /// Reset the circuit for a provider to Closed state.
    pub fn reset(&self, provider: &ProviderId) {
        let mut circuits = self.lock_circuits();

        if let Some(circuit) = circuits.get_mut(provider.as_ref()) {
            info!(
                "Circuit breaker: manually resetting circuit for '{}'",
                provider
            );
            circuit.state = CircuitState::Closed;
            circuit.failure_count = 0;
            circuit.opened_at = None;
        }
    }

    /// Reset all circuits to their initial state.
    pub fn reset_all(&self) {
        let mut circuits = self.lock_circuits();
        circuits.clear();
        info!("Circuit breaker: all circuits reset");
    }

    /// Get metrics for all tracked providers.
    pub fn metrics(&self) -> Vec<CircuitMetrics> {
        let circuits = self.lock_circuits();

        circuits
            .iter()
            .map(|(provider, circuit)| CircuitMetrics {
                provider: provider.clone(),
                state: circuit.state,
                failure_count: circuit.failure_count,
                opened_at: circuit.opened_at,
            })
            .collect()
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics for a single circuit.
#[derive(Clone, Debug)]
pub struct CircuitMetrics {
    /// Provider identifier.
    pub provider: String,
    /// Current circuit state.
    pub state: CircuitState,
    /// Number of recorded failures.
    pub failure_count: u32,
    /// When the circuit opened, if it is open.
    pub opened_at: Option<Instant>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    #[test]
    fn test_circuit_starts_closed() {
        let cb = CircuitBreaker::new();
        let provider: ProviderId = Cow::Borrowed("TEST_PROVIDER");

        assert!(cb.is_allowed(&provider));
        assert_eq!(cb.state(&provider), CircuitState::Closed);
    }

    #[test]
    fn test_circuit_opens_after_threshold() {
        let cb = CircuitBreaker::with_config(CircuitBreakerConfig {
            failure_threshold: 3,
            cooldown: Duration::from_secs(300),
        });
        let provider: ProviderId = Cow::Borrowed("FAILING_PROVIDER");

        // First two failures don't open circuit
        cb.record_failure(&provider);
        cb.record_failure(&provider);
        assert!(cb.is_allowed(&provider));
        assert_eq!(cb.state(&provider), CircuitState::Closed);

        // Third failure opens circuit
        cb.record_failure(&provider);
        assert!(!cb.is_allowed(&provider));
        assert_eq!(cb.state(&provider), CircuitState::Open);
    }

    #[test]
    fn test_success_resets_failure_count() {
        let cb = CircuitBreaker::with_config(CircuitBreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        });
        let provider: ProviderId = Cow::Borrowed("INTERMITTENT_PROVIDER");

        cb.record_failure(&provider);
        cb.record_failure(&provider);
        assert_eq!(cb.failure_count(&provider), 2);

        cb.record_success(&provider);
        assert_eq!(cb.failure_count(&provider), 0);
    }

    #[test]
    fn test_success_closes_open_circuit() {
        let cb = CircuitBreaker::with_config(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        let provider: ProviderId = Cow::Borrowed("HEALING_PROVIDER");

        cb.record_failure(&provider);
        assert_eq!(cb.state(&provider), CircuitState::Open);

        cb.record_success(&provider);
        assert_eq!(cb.state(&provider), CircuitState::Closed);
        assert_eq!(cb.failure_count(&provider), 0);
    }

    #[test]
    fn test_circuit_closes_after_cooldown() {
        let cb = CircuitBreaker::with_config(CircuitBreakerConfig {
            failure_threshold: 1,
            cooldown: Duration::from_millis(10),
        });
        let provider: ProviderId = Cow::Borrowed("RECOVERING_PROVIDER");

        // Open the circuit
        cb.record_failure(&provider);
        assert!(!cb.is_allowed(&provider));

        // Wait out the cooldown
        std::thread::sleep(Duration::from_millis(20));

        // Closes straight back to normal operation, count at zero
        assert!(cb.is_allowed(&provider));
        assert_eq!(cb.state(&provider), CircuitState::Closed);
        assert_eq!(cb.failure_count(&provider), 0);
    }

    #[test]
    fn test_cooldown_runs_from_open_instant() {
        let cb = CircuitBreaker::with_config(CircuitBreakerConfig {
            failure_threshold: 1,
            cooldown: Duration::from_millis(20),
        });
        let provider: ProviderId = Cow::Borrowed("STRAGGLER_PROVIDER");

        cb.record_failure(&provider);
        std::thread::sleep(Duration::from_millis(10));

        // A late failure while open must not push the cooldown out
        cb.record_failure(&provider);
        std::thread::sleep(Duration::from_millis(15));

        assert!(cb.is_allowed(&provider));
        assert_eq!(cb.state(&provider), CircuitState::Closed);
    }

    #[test]
    fn test_manual_reset() {
        let cb = CircuitBreaker::with_config(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        let provider: ProviderId = Cow::Borrowed("RESET_PROVIDER");

        cb.record_failure(&provider);
        assert_eq!(cb.state(&provider), CircuitState::Open);

        cb.reset(&provider);
        assert_eq!(cb.state(&provider), CircuitState::Closed);
        assert_eq!(cb.failure_count(&provider), 0);
    }

    #[test]
    fn test_reset_all_clears_every_circuit() {
        let cb = CircuitBreaker::with_config(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        let provider_a: ProviderId = Cow::Borrowed("PROVIDER_A");
        let provider_b: ProviderId = Cow::Borrowed("PROVIDER_B");

        cb.record_failure(&provider_a);
        cb.record_failure(&provider_b);

        cb.reset_all();
        assert!(cb.is_allowed(&provider_a));
        assert!(cb.is_allowed(&provider_b));
        assert_eq!(cb.failure_count(&provider_a), 0);
    }

    #[test]
    fn test_provider_isolation() {
        let cb = CircuitBreaker::with_config(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        let provider_a: ProviderId = Cow::Borrowed("PROVIDER_A");
        let provider_b: ProviderId = Cow::Borrowed("PROVIDER_B");

        cb.record_failure(&provider_a);
        assert!(!cb.is_allowed(&provider_a));

        // Provider B should be unaffected
        assert!(cb.is_allowed(&provider_b));
        assert_eq!(cb.state(&provider_b), CircuitState::Closed);
    }

    #[test]
    fn test_metrics() {
        let cb = CircuitBreaker::new();
        let provider_a: ProviderId = Cow::Borrowed("METRIC_A");
        let provider_b: ProviderId = Cow::Borrowed("METRIC_B");

        cb.record_failure(&provider_a);
        cb.record_failure(&provider_a);
        cb.record_failure(&provider_b);

        let metrics = cb.metrics();
        assert_eq!(metrics.len(), 2);

        let metric_a = metrics.iter().find(|m| m.provider == "METRIC_A").unwrap();
        assert_eq!(metric_a.failure_count, 2);
        assert_eq!(metric_a.state, CircuitState::Closed);
        assert!(metric_a.opened_at.is_none());
    }
}
