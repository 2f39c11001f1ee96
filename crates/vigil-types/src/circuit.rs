//! Circuit breaker state

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a circuit breaker.
///
/// Legal transitions are `Closed -> Open`, `Open -> HalfOpen`,
/// `HalfOpen -> Closed` and `HalfOpen -> Open`. Manual overrides may
/// move between any two states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CircuitState {
    /// Requests flow normally.
    #[default]
    Closed,

    /// Requests are rejected without invoking the operation.
    Open,

    /// A limited number of probe requests test recovery.
    HalfOpen,
}

impl CircuitState {
    /// Is `self -> next` a transition the automatic state machine may take?
    pub fn can_transition_to(&self, next: CircuitState) -> bool {
        matches!(
            (self, next),
            (CircuitState::Closed, CircuitState::Open)
                | (CircuitState::Open, CircuitState::HalfOpen)
                | (CircuitState::HalfOpen, CircuitState::Closed)
                | (CircuitState::HalfOpen, CircuitState::Open)
        )
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        assert!(CircuitState::Closed.can_transition_to(CircuitState::Open));
        assert!(CircuitState::Open.can_transition_to(CircuitState::HalfOpen));
        assert!(CircuitState::HalfOpen.can_transition_to(CircuitState::Closed));
        assert!(CircuitState::HalfOpen.can_transition_to(CircuitState::Open));

        assert!(!CircuitState::Closed.can_transition_to(CircuitState::HalfOpen));
        assert!(!CircuitState::Open.can_transition_to(CircuitState::Closed));
    }
}
