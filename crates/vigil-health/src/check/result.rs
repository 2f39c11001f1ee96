//! Health check results.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vigil_types::{CircuitState, ExecutionId, HealthStatus};

use super::CheckOutcome;

/// How an execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionOutcome {
    /// The check body returned an outcome.
    Completed,

    /// The check body returned an error or panicked.
    Failed,

    /// The check did not finish within its timeout.
    TimedOut,

    /// The caller cancelled the execution.
    Cancelled,

    /// The guarding circuit breaker rejected the call.
    CircuitOpen,

    /// A declared dependency was not healthy; the body never ran.
    DependencyUnhealthy,
}

impl std::fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionOutcome::Completed => write!(f, "completed"),
            ExecutionOutcome::Failed => write!(f, "failed"),
            ExecutionOutcome::TimedOut => write!(f, "timed-out"),
            ExecutionOutcome::Cancelled => write!(f, "cancelled"),
            ExecutionOutcome::CircuitOpen => write!(f, "circuit-open"),
            ExecutionOutcome::DependencyUnhealthy => write!(f, "dependency-unhealthy"),
        }
    }
}

/// Result of one health check execution. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// Identifier of this execution.
    pub execution_id: ExecutionId,

    /// Check that produced the result.
    pub check_name: String,

    /// Reported status.
    pub status: HealthStatus,

    /// Human-readable message.
    pub message: String,

    /// Wall time spent, retries included.
    pub duration: Duration,

    /// When the execution finished.
    pub timestamp: DateTime<Utc>,

    /// Error captured from the check body, if any.
    pub error: Option<String>,

    /// How the execution ended.
    pub outcome: ExecutionOutcome,

    /// Structured data reported by the check.
    pub data: HashMap<String, serde_json::Value>,
}

impl HealthCheckResult {
    fn base(
        check_name: impl Into<String>,
        status: HealthStatus,
        message: impl Into<String>,
        outcome: ExecutionOutcome,
    ) -> Self {
        Self {
            execution_id: ExecutionId::generate(),
            check_name: check_name.into(),
            status,
            message: message.into(),
            duration: Duration::ZERO,
            timestamp: Utc::now(),
            error: None,
            outcome,
            data: HashMap::new(),
        }
    }

    /// Result from an outcome the check body reported.
    pub fn from_outcome(check_name: impl Into<String>, outcome: CheckOutcome) -> Self {
        let mut result = Self::base(
            check_name,
            outcome.status,
            outcome.message,
            ExecutionOutcome::Completed,
        );
        result.data = outcome.data;
        result
    }

    /// Result for a check body that errored or panicked.
    pub fn failure(check_name: impl Into<String>, error: impl Into<String>) -> Self {
        let error = error.into();
        let mut result = Self::base(
            check_name,
            HealthStatus::Unhealthy,
            format!("check failed: {}", error),
            ExecutionOutcome::Failed,
        );
        result.error = Some(error);
        result
    }

    /// Result for a check that exceeded its timeout. Carries no data.
    pub fn timeout(check_name: impl Into<String>, timeout: Duration) -> Self {
        Self::base(
            check_name,
            HealthStatus::Unhealthy,
            format!("timed out after {}ms", timeout.as_millis()),
            ExecutionOutcome::TimedOut,
        )
    }

    /// Result for an execution the caller cancelled.
    pub fn cancelled(check_name: impl Into<String>) -> Self {
        Self::base(
            check_name,
            HealthStatus::Unknown,
            "cancelled",
            ExecutionOutcome::Cancelled,
        )
    }

    /// Result for a call rejected by an open circuit breaker.
    pub fn circuit_open(
        check_name: impl Into<String>,
        operation: &str,
        state: CircuitState,
    ) -> Self {
        let mut result = Self::base(
            check_name,
            HealthStatus::Degraded,
            format!("circuit breaker '{}' is {}, check skipped", operation, state),
            ExecutionOutcome::CircuitOpen,
        );
        result
            .data
            .insert("circuit_state".to_string(), state.to_string().into());
        result
    }

    /// Result for a check gated by an unhealthy dependency.
    pub fn dependency_unhealthy(check_name: impl Into<String>, dependency: &str) -> Self {
        let mut result = Self::base(
            check_name,
            HealthStatus::Degraded,
            format!("dependency unhealthy: {}", dependency),
            ExecutionOutcome::DependencyUnhealthy,
        );
        result
            .data
            .insert("dependency".to_string(), dependency.to_string().into());
        result
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Did the last attempt time out?
    pub fn is_timeout(&self) -> bool {
        self.outcome == ExecutionOutcome::TimedOut
    }

    /// Was the execution cancelled by the caller?
    pub fn is_cancelled(&self) -> bool {
        self.outcome == ExecutionOutcome::Cancelled
    }

    /// Did the check body run to completion or failure (not skipped)?
    pub fn body_ran(&self) -> bool {
        matches!(
            self.outcome,
            ExecutionOutcome::Completed | ExecutionOutcome::Failed | ExecutionOutcome::TimedOut
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_modes_map_to_statuses() {
        assert_eq!(
            HealthCheckResult::failure("a", "boom").status,
            HealthStatus::Unhealthy
        );
        assert_eq!(
            HealthCheckResult::timeout("a", Duration::from_millis(5)).status,
            HealthStatus::Unhealthy
        );
        assert_eq!(HealthCheckResult::cancelled("a").status, HealthStatus::Unknown);
        assert_eq!(
            HealthCheckResult::circuit_open("a", "a", CircuitState::Open).status,
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthCheckResult::dependency_unhealthy("a", "b").status,
            HealthStatus::Degraded
        );
    }

    #[test]
    fn test_timeout_and_cancel_are_distinct() {
        let timeout = HealthCheckResult::timeout("a", Duration::from_millis(5));
        let cancelled = HealthCheckResult::cancelled("a");

        assert!(timeout.is_timeout() && !timeout.is_cancelled());
        assert!(cancelled.is_cancelled() && !cancelled.is_timeout());
        assert!(timeout.data.is_empty());
        assert_eq!(timeout.message, "timed out after 5ms");
    }

    #[test]
    fn test_dependency_message() {
        let result = HealthCheckResult::dependency_unhealthy("api", "db");
        assert_eq!(result.message, "dependency unhealthy: db");
        assert!(!result.body_ran());
    }
}
