mod breaker;
mod registry;
mod types;

pub use breaker::CircuitBreaker;
pub use registry::CircuitBreakerRegistry;
pub use types::{CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState};
