//! Per-provider circuit breaker for fault tolerance.
//!
//! Implements the circuit breaker pattern to prevent hammering a provider
//! that is already failing. The circuit has three states:
//!
//! - **Closed**: Normal operation, requests are allowed through.
//! - **Open**: Provider is failing, requests are rejected immediately.
//! - **HalfOpen**: A limited number of trial requests probe recovery.
//!
//! The circuit breaker is in-memory and resets on process restart; a cold
//! start re-learns provider health quickly.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::models::ProviderId;

/// Default number of consecutive failures before opening the circuit.
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default time to wait before transitioning from Open to HalfOpen.
const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(300);

/// Default number of trial calls allowed while HalfOpen.
const DEFAULT_HALF_OPEN_MAX_CALLS: u32 = 1;

/// Circuit breaker state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - requests are allowed.
    Closed,
    /// Provider is failing - requests are rejected.
    Open,
    /// Testing recovery - limited trial requests allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Internal circuit state for a single provider.
#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    /// Consecutive failures while Closed.
    consecutive_failures: u32,
    /// When the circuit last transitioned to Open.
    opened_at: Option<Instant>,
    /// Trial calls consumed in the current HalfOpen window.
    half_open_attempts_used: u32,
    stats: CircuitStats,
}

impl Circuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            half_open_attempts_used: 0,
            stats: CircuitStats::default(),
        }
    }

    fn open(&mut self) {
        if self.state != CircuitState::Open {
            self.stats.trips += 1;
            self.stats.state_changes += 1;
        }
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.half_open_attempts_used = 0;
    }

    fn close(&mut self) {
        if self.state != CircuitState::Closed {
            self.stats.state_changes += 1;
        }
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.half_open_attempts_used = 0;
        self.opened_at = None;
    }
}

/// Running counters for a single circuit, exposed on the status surface.
#[derive(Clone, Copy, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitStats {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    /// Transitions into the Open state.
    pub trips: u64,
    /// Transitions between any two states, including manual ones.
    pub state_changes: u64,
}

/// Circuit breaker configuration.
#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// Time the circuit stays Open before probing recovery.
    pub open_timeout: Duration,
    /// Trial calls allowed in the HalfOpen state.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            half_open_max_calls: DEFAULT_HALF_OPEN_MAX_CALLS,
        }
    }
}

/// Per-provider circuit breaker.
///
/// Thread-safe; one `Circuit` per provider id, created on demand. Each
/// provider fails and recovers independently, so a broken primary never
/// blocks the fallback.
pub struct CircuitBreaker {
    circuits: Mutex<HashMap<String, Circuit>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with default settings.
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    /// Create a circuit breaker with custom configuration.
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            circuits: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Lock the circuits mutex, recovering from poison if necessary.
    ///
    /// Worst case after recovery is slightly stale circuit state, which is
    /// better than panicking.
    fn lock_circuits(&self) -> MutexGuard<'_, HashMap<String, Circuit>> {
        self.circuits.lock().unwrap_or_else(|poisoned| {
            warn!("circuit breaker mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Check whether a request may proceed for a provider.
    ///
    /// Handles the Open -> HalfOpen transition once the open timeout has
    /// elapsed, and budgets trial calls while HalfOpen. A `false` return
    /// must be surfaced as `CircuitOpen` by the caller, with no downstream
    /// call made.
    pub fn is_allowed(&self, provider: &ProviderId) -> bool {
        let mut circuits = self.lock_circuits();

        let circuit = circuits
            .entry(provider.to_string())
            .or_insert_with(Circuit::new);

        match circuit.state {
            CircuitState::Closed => {
                circuit.stats.total_calls += 1;
                true
            }
            CircuitState::HalfOpen => {
                if circuit.half_open_attempts_used < self.config.half_open_max_calls {
                    circuit.half_open_attempts_used += 1;
                    circuit.stats.total_calls += 1;
                    true
                } else {
                    circuit.stats.rejected_calls += 1;
                    false
                }
            }
            CircuitState::Open => {
                if let Some(opened_at) = circuit.opened_at {
                    if opened_at.elapsed() >= self.config.open_timeout {
                        info!("circuit '{}': Open -> HalfOpen", provider);
                        circuit.state = CircuitState::HalfOpen;
                        circuit.stats.state_changes += 1;
                        circuit.half_open_attempts_used = 1;
                        circuit.stats.total_calls += 1;
                        return true;
                    }
                }
                circuit.stats.rejected_calls += 1;
                false
            }
        }
    }

    /// Record a successful call for a provider.
    ///
    /// A single success while HalfOpen closes the circuit.
    pub fn record_success(&self, provider: &ProviderId) {
        let mut circuits = self.lock_circuits();

        let circuit = circuits
            .entry(provider.to_string())
            .or_insert_with(Circuit::new);

        circuit.stats.successful_calls += 1;
        circuit.consecutive_failures = 0;

        if circuit.state == CircuitState::HalfOpen {
            info!("circuit '{}': HalfOpen -> Closed (probe succeeded)", provider);
            circuit.close();
        }
    }

    /// Record a failed call for a provider.
    ///
    /// Opens the circuit at the failure threshold; any failure while
    /// HalfOpen reopens it with a fresh open timeout.
    pub fn record_failure(&self, provider: &ProviderId) {
        let mut circuits = self.lock_circuits();

        let circuit = circuits
            .entry(provider.to_string())
            .or_insert_with(Circuit::new);

        circuit.stats.failed_calls += 1;

        match circuit.state {
            CircuitState::Closed => {
                circuit.consecutive_failures += 1;
                if circuit.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        "circuit '{}': opening after {} consecutive failures",
                        provider, circuit.consecutive_failures
                    );
                    circuit.open();
                } else {
                    debug!(
                        "circuit '{}': failure {}/{}",
                        provider, circuit.consecutive_failures, self.config.failure_threshold
                    );
                }
            }
            CircuitState::HalfOpen => {
                warn!("circuit '{}': probe failed, reopening", provider);
                circuit.open();
            }
            CircuitState::Open => {
                // Already open, nothing to transition.
                debug!("circuit '{}': failure while already open", provider);
            }
        }
    }

    /// Current state for a provider.
    pub fn state(&self, provider: &ProviderId) -> CircuitState {
        let circuits = self.lock_circuits();
        circuits
            .get(provider.as_ref())
            .map(|c| c.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Consecutive failure count for a provider.
    pub fn consecutive_failures(&self, provider: &ProviderId) -> u32 {
        let circuits = self.lock_circuits();
        circuits
            .get(provider.as_ref())
            .map(|c| c.consecutive_failures)
            .unwrap_or(0)
    }

    /// Manually close a circuit (operator recovery).
    pub fn force_close(&self, provider: &ProviderId) {
        let mut circuits = self.lock_circuits();
        let circuit = circuits
            .entry(provider.to_string())
            .or_insert_with(Circuit::new);
        info!("circuit '{}': manually closed", provider);
        circuit.close();
    }

    /// Manually open a circuit (maintenance window).
    pub fn force_open(&self, provider: &ProviderId) {
        let mut circuits = self.lock_circuits();
        let circuit = circuits
            .entry(provider.to_string())
            .or_insert_with(Circuit::new);
        info!("circuit '{}': manually opened", provider);
        circuit.open();
    }

    /// Reset all circuits to their initial state.
    pub fn reset_all(&self) {
        let mut circuits = self.lock_circuits();
        circuits.clear();
        info!("circuit breaker: all circuits reset");
    }

    /// Total trips across all circuits since startup.
    pub fn total_trips(&self) -> u64 {
        let circuits = self.lock_circuits();
        circuits.values().map(|c| c.stats.trips).sum()
    }

    /// Snapshot of every tracked circuit for the status surface.
    pub fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let circuits = self.lock_circuits();
        circuits
            .iter()
            .map(|(provider, circuit)| CircuitSnapshot {
                provider: provider.clone(),
                state: circuit.state,
                consecutive_failures: circuit.consecutive_failures,
                stats: circuit.stats,
            })
            .collect()
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of a single circuit.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    pub provider: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub stats: CircuitStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    fn fast_config(threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            open_timeout: Duration::from_millis(20),
            half_open_max_calls: 1,
        }
    }

    #[test]
    fn test_circuit_starts_closed() {
        let cb = CircuitBreaker::new();
        let provider: ProviderId = Cow::Borrowed("FIREANT");

        assert!(cb.is_allowed(&provider));
        assert_eq!(cb.state(&provider), CircuitState::Closed);
    }

    #[test]
    fn test_circuit_opens_after_threshold() {
        let cb = CircuitBreaker::with_config(fast_config(3));
        let provider: ProviderId = Cow::Borrowed("FAILING");

        cb.record_failure(&provider);
        cb.record_failure(&provider);
        assert!(cb.is_allowed(&provider));
        assert_eq!(cb.state(&provider), CircuitState::Closed);

        cb.record_failure(&provider);
        assert!(!cb.is_allowed(&provider));
        assert_eq!(cb.state(&provider), CircuitState::Open);
    }

    #[test]
    fn test_open_rejects_until_timeout() {
        let cb = CircuitBreaker::with_config(CircuitBreakerConfig {
            failure_threshold: 1,
            open_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
        });
        let provider: ProviderId = Cow::Borrowed("STILL_OPEN");

        cb.record_failure(&provider);
        assert!(!cb.is_allowed(&provider));
        assert!(!cb.is_allowed(&provider));
        assert_eq!(cb.state(&provider), CircuitState::Open);

        let snap = cb.snapshot();
        assert_eq!(snap[0].stats.rejected_calls, 2);
    }

    #[test]
    fn test_success_resets_failure_count() {
        let cb = CircuitBreaker::with_config(fast_config(3));
        let provider: ProviderId = Cow::Borrowed("INTERMITTENT");

        cb.record_failure(&provider);
        cb.record_failure(&provider);
        assert_eq!(cb.consecutive_failures(&provider), 2);

        cb.record_success(&provider);
        assert_eq!(cb.consecutive_failures(&provider), 0);
    }

    #[test]
    fn test_circuit_transitions_to_half_open() {
        let cb = CircuitBreaker::with_config(fast_config(1));
        let provider: ProviderId = Cow::Borrowed("RECOVERING");

        cb.record_failure(&provider);
        assert!(!cb.is_allowed(&provider));

        std::thread::sleep(Duration::from_millis(30));

        assert!(cb.is_allowed(&provider));
        assert_eq!(cb.state(&provider), CircuitState::HalfOpen);
    }

    #[test]
    fn test_single_half_open_success_closes() {
        let cb = CircuitBreaker::with_config(fast_config(1));
        let provider: ProviderId = Cow::Borrowed("HEALING");

        cb.record_failure(&provider);
        std::thread::sleep(Duration::from_millis(30));
        assert!(cb.is_allowed(&provider));

        cb.record_success(&provider);
        assert_eq!(cb.state(&provider), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(&provider), 0);
    }

    #[test]
    fn test_half_open_trial_budget() {
        let cb = CircuitBreaker::with_config(fast_config(1));
        let provider: ProviderId = Cow::Borrowed("PROBING");

        cb.record_failure(&provider);
        std::thread::sleep(Duration::from_millis(30));

        // One trial call allowed, the next is rejected until an outcome lands.
        assert!(cb.is_allowed(&provider));
        assert!(!cb.is_allowed(&provider));
    }

    #[test]
    fn test_half_open_reopens_on_failure() {
        let cb = CircuitBreaker::with_config(fast_config(1));
        let provider: ProviderId = Cow::Borrowed("RELAPSING");

        cb.record_failure(&provider);
        std::thread::sleep(Duration::from_millis(30));
        assert!(cb.is_allowed(&provider));
        assert_eq!(cb.state(&provider), CircuitState::HalfOpen);

        cb.record_failure(&provider);
        assert_eq!(cb.state(&provider), CircuitState::Open);
        // Fresh open timeout: immediately after reopening, still rejected.
        assert!(!cb.is_allowed(&provider));
    }

    #[test]
    fn test_force_close_and_open() {
        let cb = CircuitBreaker::with_config(fast_config(1));
        let provider: ProviderId = Cow::Borrowed("MANUAL");

        cb.record_failure(&provider);
        assert_eq!(cb.state(&provider), CircuitState::Open);

        cb.force_close(&provider);
        assert_eq!(cb.state(&provider), CircuitState::Closed);
        assert!(cb.is_allowed(&provider));

        cb.force_open(&provider);
        assert!(!cb.is_allowed(&provider));
    }

    #[test]
    fn test_provider_isolation() {
        let cb = CircuitBreaker::with_config(fast_config(1));
        let primary: ProviderId = Cow::Borrowed("PRIMARY");
        let fallback: ProviderId = Cow::Borrowed("FALLBACK");

        cb.record_failure(&primary);
        assert!(!cb.is_allowed(&primary));

        assert!(cb.is_allowed(&fallback));
        assert_eq!(cb.state(&fallback), CircuitState::Closed);
    }

    #[test]
    fn test_trip_counter() {
        let cb = CircuitBreaker::with_config(fast_config(1));
        let provider: ProviderId = Cow::Borrowed("TRIPPY");

        cb.record_failure(&provider);
        std::thread::sleep(Duration::from_millis(1));
        cb.force_close(&provider);
        cb.record_failure(&provider);

        assert_eq!(cb.total_trips(), 2);
    }

    #[test]
    fn test_state_change_counter() {
        let cb = CircuitBreaker::with_config(fast_config(1));
        let provider: ProviderId = Cow::Borrowed("CYCLING");

        // Closed -> Open -> HalfOpen -> Closed is three transitions.
        cb.record_failure(&provider);
        std::thread::sleep(Duration::from_millis(30));
        assert!(cb.is_allowed(&provider));
        cb.record_success(&provider);

        let snap = cb.snapshot();
        assert_eq!(snap[0].stats.state_changes, 3);
        assert_eq!(snap[0].stats.trips, 1);

        // Forcing an already-closed circuit closed is not a transition.
        cb.force_close(&provider);
        assert_eq!(cb.snapshot()[0].stats.state_changes, 3);
    }
}
