//! Resilience patterns for the health core.
//!
//! Provides the circuit breaker state machine and the registry that
//! hands out one breaker per named operation.

mod circuit_breaker;
mod registry;

pub use circuit_breaker::{BreakerError, BreakerPermit, CircuitBreaker, CircuitBreakerStats};
pub use registry::CircuitBreakerRegistry;
