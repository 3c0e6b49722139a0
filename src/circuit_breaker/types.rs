use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Circuit is closed, calls flow normally
    Closed,
    /// Circuit is open, calls are rejected
    Open,
    /// Circuit is half-open, allowing probe calls
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "Closed"),
            CircuitState::Open => write!(f, "Open"),
            CircuitState::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Number of consecutive successes in half-open state before closing
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// Duration to dwell in open state before allowing a probe call
    #[serde(default = "default_reset_timeout_secs")]
    pub reset_timeout_secs: u64,

    /// Number of probe calls allowed in flight while half-open.
    /// Callers past the bound are rejected as if the circuit were open.
    #[serde(default = "default_half_open_probes")]
    pub half_open_probes: u32,

    /// Deadline for individual operations in seconds. Enforced by the
    /// invoker, independent of breaker state; kept distinct from the
    /// reset timeout so tuning one never affects the other.
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    2
}

fn default_reset_timeout_secs() -> u64 {
    60
}

fn default_half_open_probes() -> u32 {
    1
}

fn default_operation_timeout_secs() -> u64 {
    30
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            reset_timeout_secs: default_reset_timeout_secs(),
            half_open_probes: default_half_open_probes(),
            operation_timeout_secs: default_operation_timeout_secs(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

/// Circuit breaker metrics
#[derive(Debug, Clone, Default, Serialize)]
pub struct CircuitBreakerMetrics {
    /// Total number of admitted calls
    pub total_calls: u64,
    /// Number of successful calls
    pub successful_calls: u64,
    /// Number of failed calls
    pub failed_calls: u64,
    /// Number of calls rejected while the circuit was open
    pub rejected_calls: u64,
    /// Number of times the circuit opened
    pub circuit_opened_count: u64,
    /// Number of times the circuit closed
    pub circuit_closed_count: u64,
    /// Number of times the circuit half-opened
    pub circuit_half_opened_count: u64,
}
