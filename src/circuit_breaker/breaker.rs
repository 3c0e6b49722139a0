use super::types::{CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState};
use crate::error::{ResilienceError, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Circuit breaker guarding one logical downstream dependency
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Configuration
    config: CircuitBreakerConfig,
    /// Current state
    state: Arc<RwLock<State>>,
    /// Dependency identifier
    name: String,
}

#[derive(Debug)]
struct State {
    /// Current circuit state
    circuit_state: CircuitState,
    /// Number of consecutive failures in closed state
    consecutive_failures: u32,
    /// Number of consecutive successes in half-open state
    consecutive_successes: u32,
    /// Number of probe calls currently in flight while half-open
    probes_in_flight: u32,
    /// Time of the failure that opened the circuit
    last_failure_at: Option<Instant>,
    /// Metrics
    metrics: CircuitBreakerMetrics,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(name: String, config: CircuitBreakerConfig) -> Self {
        info!(
            name = %name,
            failure_threshold = config.failure_threshold,
            success_threshold = config.success_threshold,
            reset_timeout_secs = config.reset_timeout_secs,
            "Creating circuit breaker"
        );

        Self {
            config,
            state: Arc::new(RwLock::new(State {
                circuit_state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                probes_in_flight: 0,
                last_failure_at: None,
                metrics: CircuitBreakerMetrics::default(),
            })),
            name,
        }
    }

    /// Run an operation through the breaker.
    ///
    /// Returns the operation's result on success and its error on failure,
    /// after updating breaker state. Returns [`ResilienceError::CircuitOpen`]
    /// without invoking the operation when the circuit is open and the reset
    /// timeout has not yet elapsed.
    pub async fn execute<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.try_acquire().await {
            return Err(ResilienceError::CircuitOpen {
                breaker: self.name.clone(),
            });
        }

        match op().await {
            Ok(result) => {
                self.record_success().await;
                Ok(result)
            }
            Err(e) => {
                self.record_failure().await;
                Err(e)
            }
        }
    }

    /// Check whether a call may proceed, applying the open-to-half-open
    /// transition when the reset timeout has elapsed
    pub async fn try_acquire(&self) -> bool {
        let mut state = self.state.write().await;

        match state.circuit_state {
            CircuitState::Closed => {
                state.metrics.total_calls += 1;
                true
            }
            CircuitState::Open => {
                if let Some(last_failure_at) = state.last_failure_at {
                    if last_failure_at.elapsed() >= self.config.reset_timeout() {
                        self.transition_to_half_open(&mut state);
                        state.metrics.total_calls += 1;
                        state.probes_in_flight += 1;
                        true
                    } else {
                        state.metrics.rejected_calls += 1;
                        debug!(
                            name = %self.name,
                            time_remaining = ?self.config.reset_timeout() - last_failure_at.elapsed(),
                            "Circuit breaker open, rejecting call"
                        );
                        false
                    }
                } else {
                    // Should not happen, but handle gracefully
                    warn!(name = %self.name, "Circuit open but no failure timestamp");
                    false
                }
            }
            CircuitState::HalfOpen => {
                if state.probes_in_flight < self.config.half_open_probes {
                    state.metrics.total_calls += 1;
                    state.probes_in_flight += 1;
                    debug!(
                        name = %self.name,
                        probes_in_flight = state.probes_in_flight,
                        max = self.config.half_open_probes,
                        "Allowing half-open probe call"
                    );
                    true
                } else {
                    state.metrics.rejected_calls += 1;
                    debug!(
                        name = %self.name,
                        "Probe bound reached, rejecting call"
                    );
                    false
                }
            }
        }
    }

    /// Record a successful call
    pub async fn record_success(&self) {
        let mut state = self.state.write().await;
        state.metrics.successful_calls += 1;

        match state.circuit_state {
            CircuitState::Closed => {
                state.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                state.consecutive_successes += 1;
                state.probes_in_flight = state.probes_in_flight.saturating_sub(1);

                debug!(
                    name = %self.name,
                    consecutive_successes = state.consecutive_successes,
                    threshold = self.config.success_threshold,
                    "Half-open probe call succeeded"
                );

                if state.consecutive_successes >= self.config.success_threshold {
                    self.transition_to_closed(&mut state);
                }
            }
            CircuitState::Open => {
                // Should not happen, but handle gracefully
                warn!(name = %self.name, "Recording success in open state");
            }
        }
    }

    /// Record a failed call
    pub async fn record_failure(&self) {
        let mut state = self.state.write().await;
        state.metrics.failed_calls += 1;

        match state.circuit_state {
            CircuitState::Closed => {
                state.consecutive_failures += 1;

                debug!(
                    name = %self.name,
                    consecutive_failures = state.consecutive_failures,
                    threshold = self.config.failure_threshold,
                    "Call failed in closed state"
                );

                if state.consecutive_failures >= self.config.failure_threshold {
                    self.transition_to_open(&mut state);
                }
            }
            CircuitState::HalfOpen => {
                state.probes_in_flight = state.probes_in_flight.saturating_sub(1);
                warn!(
                    name = %self.name,
                    "Half-open probe call failed, reopening circuit"
                );
                // Any failure in half-open state reopens the circuit
                self.transition_to_open(&mut state);
            }
            CircuitState::Open => {
                // Should not happen, but handle gracefully
                debug!(name = %self.name, "Recording failure in open state");
            }
        }
    }

    /// Get current state
    pub async fn state(&self) -> CircuitState {
        self.state.read().await.circuit_state
    }

    /// Get metrics
    pub async fn metrics(&self) -> CircuitBreakerMetrics {
        self.state.read().await.metrics.clone()
    }

    /// Breaker name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Breaker configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Force the circuit back to closed with zeroed counters
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        info!(name = %self.name, "Circuit breaker reset");
        self.transition_to_closed(&mut state);
    }

    fn transition_to_open(&self, state: &mut State) {
        info!(
            name = %self.name,
            consecutive_failures = state.consecutive_failures,
            "Circuit breaker opening"
        );

        state.circuit_state = CircuitState::Open;
        state.last_failure_at = Some(Instant::now());
        state.consecutive_failures = 0;
        state.consecutive_successes = 0;
        state.probes_in_flight = 0;
        state.metrics.circuit_opened_count += 1;
    }

    fn transition_to_half_open(&self, state: &mut State) {
        info!(
            name = %self.name,
            reset_timeout = ?self.config.reset_timeout(),
            "Circuit breaker transitioning to half-open"
        );

        state.circuit_state = CircuitState::HalfOpen;
        state.consecutive_failures = 0;
        state.consecutive_successes = 0;
        state.probes_in_flight = 0;
        state.metrics.circuit_half_opened_count += 1;
    }

    fn transition_to_closed(&self, state: &mut State) {
        info!(
            name = %self.name,
            consecutive_successes = state.consecutive_successes,
            "Circuit breaker closing"
        );

        state.circuit_state = CircuitState::Closed;
        state.last_failure_at = None;
        state.consecutive_failures = 0;
        state.consecutive_successes = 0;
        state.probes_in_flight = 0;
        state.metrics.circuit_closed_count += 1;
    }
}
