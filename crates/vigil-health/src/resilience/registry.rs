//! Registry of circuit breakers keyed by operation name.
//!
//! Breakers for different operations are fully independent; the registry
//! only hands them out and collects their statistics.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};
use vigil_types::CircuitState;

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerStats};
use crate::clock::SharedClock;
use crate::config::CircuitBreakerConfig;
use crate::error::HealthResult;
use crate::events::EventBus;

/// Hands out one [`CircuitBreaker`] per operation.
pub struct CircuitBreakerRegistry {
    /// Configuration for breakers created on demand.
    default_config: CircuitBreakerConfig,

    /// Breakers by operation name.
    breakers: DashMap<String, Arc<CircuitBreaker>>,

    /// Time source shared with every breaker.
    clock: SharedClock,

    /// Where breakers publish state changes.
    events: EventBus,
}

impl CircuitBreakerRegistry {
    /// Create an empty registry that builds breakers with `default_config`.
    pub fn new(default_config: CircuitBreakerConfig, clock: SharedClock, events: EventBus) -> Self {
        Self {
            default_config,
            breakers: DashMap::new(),
            clock,
            events,
        }
    }

    fn build(&self, operation: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        Arc::new(
            CircuitBreaker::new(operation, config)
                .with_clock(self.clock.clone())
                .with_events(self.events.clone()),
        )
    }

    /// Get or create the breaker for an operation.
    pub fn get_or_create(&self, operation: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(operation) {
            return breaker.clone();
        }

        self.breakers
            .entry(operation.to_string())
            .or_insert_with(|| {
                debug!(operation = %operation, "Creating circuit breaker");
                self.build(operation, self.default_config.clone())
            })
            .clone()
    }

    /// Install a breaker with its own configuration, replacing any
    /// existing breaker for the operation.
    pub fn register_with_config(
        &self,
        operation: &str,
        config: CircuitBreakerConfig,
    ) -> HealthResult<Arc<CircuitBreaker>> {
        config.validate()?;
        let breaker = self.build(operation, config);
        self.breakers.insert(operation.to_string(), breaker.clone());
        info!(operation = %operation, "Registered circuit breaker with custom config");
        Ok(breaker)
    }

    /// Get the breaker for an operation if one exists.
    pub fn get(&self, operation: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(operation).map(|b| b.clone())
    }

    /// Current state of an operation's breaker.
    pub fn state(&self, operation: &str) -> Option<CircuitState> {
        self.get(operation).map(|b| b.state())
    }

    /// Force an operation's breaker open, creating it if needed.
    pub fn force_open(&self, operation: &str, reason: &str) {
        self.get_or_create(operation).force_open(reason);
    }

    /// Force an operation's breaker closed, creating it if needed.
    pub fn force_close(&self, operation: &str, reason: &str) {
        self.get_or_create(operation).force_close(reason);
    }

    /// Drop an operation's breaker.
    pub fn remove(&self, operation: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.remove(operation).map(|(_, b)| b)
    }

    /// Statistics for every breaker, sorted by operation.
    pub fn all_stats(&self) -> Vec<CircuitBreakerStats> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|r| r.value().clone()).collect();
        let mut stats: Vec<CircuitBreakerStats> = breakers.iter().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.operation.cmp(&b.operation));
        stats
    }

    /// Number of breakers currently rejecting or probing.
    pub fn open_count(&self) -> usize {
        self.all_stats()
            .iter()
            .filter(|s| s.state != CircuitState::Closed)
            .count()
    }

    /// Number of known breakers.
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
