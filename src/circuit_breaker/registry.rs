use super::breaker::CircuitBreaker;
use super::types::{CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Registry of named circuit breakers, one per guarded dependency.
///
/// Explicitly constructed and passed to callers; cloning is cheap and
/// clones share the same breaker map.
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerRegistry {
    breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            breakers: Arc::new(DashMap::new()),
        }
    }

    /// Return the breaker for `name`, constructing it with `config` if
    /// absent. The construction is atomic; config is ignored for an
    /// existing name (first-writer-wins).
    pub fn get_or_create(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(name = name, "Creating new circuit breaker");
                Arc::new(CircuitBreaker::new(name.to_string(), config))
            })
            .clone()
    }

    /// Return the breaker for `name` without constructing one
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|e| e.value().clone())
    }

    /// State of the named breaker, or `None` if it was never created
    pub async fn state(&self, name: &str) -> Option<CircuitState> {
        match self.get(name) {
            Some(breaker) => Some(breaker.state().await),
            None => None,
        }
    }

    /// Force the named breaker back to closed. No-op for unknown names.
    pub async fn reset(&self, name: &str) {
        if let Some(breaker) = self.get(name) {
            breaker.reset().await;
        }
    }

    /// Metrics for the named breaker, or `None` if it was never created
    pub async fn metrics(&self, name: &str) -> Option<CircuitBreakerMetrics> {
        match self.get(name) {
            Some(breaker) => Some(breaker.metrics().await),
            None => None,
        }
    }

    /// All registered breaker names
    pub fn names(&self) -> Vec<String> {
        self.breakers.iter().map(|e| e.key().clone()).collect()
    }

    /// Metrics and state for every registered breaker
    pub async fn all_metrics(&self) -> Vec<(String, CircuitBreakerMetrics, CircuitState)> {
        let mut results = Vec::new();
        for entry in self.breakers.iter() {
            let name = entry.key().clone();
            let breaker = entry.value().clone();
            let metrics = breaker.metrics().await;
            let state = breaker.state().await;
            results.push((name, metrics, state));
        }
        results
    }

    /// Drop every breaker. Intended for test isolation.
    pub fn clear(&self) {
        self.breakers.clear();
    }
}
