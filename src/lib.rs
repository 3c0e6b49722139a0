//! Resilient invocation layer for flaky, latency-prone upstream calls.
//!
//! Wraps any async operation with retry and exponential backoff,
//! per-dependency circuit breaking, per-attempt timeouts, response
//! validation, fallback and centralized failure reporting. Operates
//! entirely in-process; the only state is in-memory breaker counters
//! and a bounded error log.

pub mod batch;
pub mod circuit_breaker;
pub mod error;
pub mod invoke;
pub mod reporter;
pub mod retry;

pub use batch::{execute_batch, BatchOptions, BatchOutcome};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitBreakerRegistry,
    CircuitState,
};
pub use error::{ErrorKind, ResilienceError, Result};
pub use invoke::{Fallback, InvokeContext, InvokeOptions, Invoker, Validator};
pub use reporter::{ErrorCategory, ErrorRecord, ErrorReporter, Severity};
pub use retry::{OnRetry, RetryExecutor, RetryOutcome, RetryPolicy};

/// Initialize tracing/logging
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "resilience=debug".into()),
        )
        .with_target(false)
        .compact()
        .init();
}
