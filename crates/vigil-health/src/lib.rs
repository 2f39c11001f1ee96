//! # Vigil Health - Health Monitoring and Resilience Core
//!
//! This crate continuously evaluates registered health checks, aggregates
//! their results into a system-wide verdict, isolates failing operations
//! behind circuit breakers, and drives graceful feature degradation.
//!
//! ## Key Components
//!
//! - [`HealthService`]: The façade external collaborators call
//! - [`check`]: The [`HealthCheck`] trait, definitions and results
//! - [`resilience`]: Circuit breakers and their registry
//! - [`Scheduler`]: Interval-driven execution with bounded concurrency
//! - [`HealthReport`]: Aggregated status with per-category breakdown
//! - [`DegradationManager`]: Degradation level and feature gating
//! - [`HistoryStore`]: Bounded per-check history and statistics
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use vigil_health::{
//!     check::{check_fn, CheckOutcome},
//!     HealthCheckDefinition, HealthConfig, HealthService,
//! };
//! use vigil_types::{CheckCategory, DeploymentProfile};
//!
//! # async fn example() -> vigil_health::HealthResult<()> {
//! let service = HealthService::new(HealthConfig::for_profile(DeploymentProfile::Development))?;
//!
//! service.register_health_check(
//!     HealthCheckDefinition::new("database", CheckCategory::Database)
//!         .with_own_circuit_breaker(),
//!     Arc::new(check_fn(|_ctx| async { Ok(CheckOutcome::healthy("pool ok")) })),
//! )?;
//!
//! let report = service
//!     .execute_all_health_checks(&CancellationToken::new())
//!     .await;
//! println!("Health: {}", report.overall_status);
//!
//! // Or run checks on their intervals in the background
//! service.start_automatic_checks();
//! # Ok(())
//! # }
//! ```
//!
//! ## Failure Handling
//!
//! Nothing a check body does escapes the executor:
//!
//! - **Error or panic**: `Unhealthy`, with the error captured
//! - **Timeout**: `Unhealthy`, tagged as a timeout
//! - **Breaker open**: `Degraded`, the body is not invoked
//! - **Dependency unhealthy**: `Degraded`, the body is not invoked
//! - **Cancelled by caller**: `Unknown`, tagged as cancelled
//!
//! ## Events
//!
//! Logging, alerting and messaging subscribe to [`HealthEvent`]s via
//! [`HealthService::subscribe`] instead of being called by the core.

pub mod aggregator;
pub mod check;
pub mod clock;
pub mod config;
pub mod degradation;
pub mod error;
pub mod events;
pub mod executor;
pub mod history;
pub mod registry;
pub mod resilience;
pub mod scheduler;
pub mod service;

// Re-export main types
pub use aggregator::{Aggregator, CategorySummary, CheckSnapshot, HealthReport};
pub use check::{
    CheckContext, CheckOutcome, ExecutionOutcome, HealthCheck, HealthCheckDefinition,
    HealthCheckResult,
};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{
    CircuitBreakerConfig, DegradationConfig, DegradationThresholds, ExecutorConfig, HealthConfig,
    HealthConfigBuilder, HistoryConfig, SchedulerConfig,
};
pub use degradation::{DegradationManager, DegradationStatus};
pub use error::{CheckError, HealthError, HealthResult};
pub use events::{DegradationChange, EventBus, HealthEvent, NoOpReportSink, ReportSink};
pub use executor::{CheckExecutor, DependencyStatus};
pub use history::{CheckStatistics, HistoryEntry, HistoryStore, Statistics};
pub use registry::{CheckRegistry, RegisteredCheck};
pub use resilience::{BreakerError, CircuitBreaker, CircuitBreakerRegistry, CircuitBreakerStats};
pub use scheduler::{CheckRunner, Scheduler};
pub use service::{HealthService, HealthServiceBuilder};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use vigil_types::{CheckCategory, DeploymentProfile};

    #[test]
    fn test_profile_config() {
        let production = HealthConfig::for_profile(DeploymentProfile::Production);
        let testing = HealthConfig::for_profile(DeploymentProfile::Testing);

        // Testing should react faster
        assert!(testing.scheduler.tick_interval < production.scheduler.tick_interval);
        assert!(testing.degradation.recovery_hysteresis < production.degradation.recovery_hysteresis);
    }

    #[tokio::test]
    async fn test_health_service_integration() {
        let service =
            HealthService::new(HealthConfig::for_profile(DeploymentProfile::Testing)).unwrap();

        service
            .register_health_check(
                HealthCheckDefinition::new("db", CheckCategory::Database),
                Arc::new(check::StaticCheck::healthy()),
            )
            .unwrap();

        let report = service
            .execute_all_health_checks(&CancellationToken::new())
            .await;
        assert_eq!(report.healthy_count, 1);
        assert_eq!(service.get_category_status(&CheckCategory::Database), vigil_types::HealthStatus::Healthy);
        assert!(!service.has_critical_failures());
    }
}
