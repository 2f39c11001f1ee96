//! Single check execution.
//!
//! [`CheckExecutor::run`] never fails: errors, panics, timeouts,
//! cancellation, breaker rejection and dependency gating are all
//! captured into the returned [`HealthCheckResult`].

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use vigil_types::HealthStatus;

use crate::check::{CheckContext, CheckOutcome, HealthCheckResult};
use crate::clock::SharedClock;
use crate::config::ExecutorConfig;
use crate::error::CheckError;
use crate::history::HistoryStore;
use crate::registry::RegisteredCheck;
use crate::resilience::CircuitBreakerRegistry;

/// Source of the last known status of other checks, used for
/// dependency gating.
pub trait DependencyStatus: Send + Sync {
    fn last_status(&self, check_name: &str) -> Option<HealthStatus>;
}

impl DependencyStatus for HistoryStore {
    fn last_status(&self, check_name: &str) -> Option<HealthStatus> {
        HistoryStore::last_status(self, check_name)
    }
}

/// Why a single attempt did not produce an outcome.
#[derive(Debug)]
enum AttemptFailure {
    Failed(String),
    Panicked(String),
    TimedOut,
    Cancelled,
}

impl AttemptFailure {
    fn is_retryable(&self) -> bool {
        !matches!(self, AttemptFailure::Cancelled)
    }
}

type AttemptResult = Result<CheckOutcome, AttemptFailure>;

/// Runs health checks with timeout, retry and circuit breaker policy.
pub struct CheckExecutor {
    config: ExecutorConfig,
    breakers: Arc<CircuitBreakerRegistry>,
    clock: SharedClock,
}

impl CheckExecutor {
    /// Create an executor that guards checks with breakers from `breakers`.
    pub fn new(
        config: ExecutorConfig,
        breakers: Arc<CircuitBreakerRegistry>,
        clock: SharedClock,
    ) -> Self {
        Self {
            config,
            breakers,
            clock,
        }
    }

    /// Defaults applied to definitions that leave settings unset.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Execute one check.
    #[instrument(skip_all, fields(check = %registered.definition.name))]
    pub async fn run(
        &self,
        registered: &RegisteredCheck,
        dependencies: &dyn DependencyStatus,
        cancel: &CancellationToken,
    ) -> HealthCheckResult {
        let started = Instant::now();
        let result = self.execute(registered, dependencies, cancel).await;
        let result = result
            .with_duration(started.elapsed())
            .with_timestamp(self.clock.now());

        if result.status.is_failure() {
            warn!(
                status = %result.status,
                outcome = %result.outcome,
                error = result.error.as_deref().unwrap_or(""),
                "Health check failed"
            );
        } else {
            debug!(
                status = %result.status,
                outcome = %result.outcome,
                duration_ms = result.duration.as_millis() as u64,
                "Health check finished"
            );
        }
        result
    }

    async fn execute(
        &self,
        registered: &RegisteredCheck,
        dependencies: &dyn DependencyStatus,
        cancel: &CancellationToken,
    ) -> HealthCheckResult {
        let definition = &registered.definition;
        let name = definition.name.as_str();

        if cancel.is_cancelled() {
            return HealthCheckResult::cancelled(name);
        }

        if let Some(dependency) = definition
            .dependencies
            .iter()
            .find(|dep| dependencies.last_status(dep) != Some(HealthStatus::Healthy))
        {
            debug!(dependency = %dependency, "Skipping check, dependency not healthy");
            return HealthCheckResult::dependency_unhealthy(name, dependency);
        }

        let breaker = definition
            .breaker_name()
            .map(|operation| self.breakers.get_or_create(operation));
        let timeout = definition.effective_timeout(&self.config);
        let max_attempts = definition.effective_retries(&self.config).saturating_add(1);

        let mut last_failure: Option<HealthCheckResult> = None;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let permit = match &breaker {
                Some(breaker) => match breaker.try_acquire() {
                    Ok(permit) => Some(permit),
                    Err(state) => {
                        // A retry rejected by a breaker that just opened keeps the real failure
                        return match last_failure {
                            Some(failure) => failure,
                            None => HealthCheckResult::circuit_open(name, breaker.operation(), state),
                        };
                    }
                },
                None => None,
            };

            let outcome = self.attempt(registered, attempt, timeout, cancel).await;

            if let Some(permit) = permit {
                match &outcome {
                    Ok(outcome) if !outcome.status.is_failure() => permit.success(),
                    Err(AttemptFailure::Cancelled) => permit.release(),
                    _ => permit.failure(),
                }
            }

            let failure = match outcome {
                Ok(outcome) => {
                    return HealthCheckResult::from_outcome(name, outcome)
                        .with_data("attempts", attempt);
                }
                Err(failure) => failure,
            };

            let retry = failure.is_retryable() && attempt < max_attempts;
            let result = Self::failure_result(name, failure, timeout).with_data("attempts", attempt);
            if !retry {
                return result;
            }

            debug!(attempt, max_attempts, "Retrying health check");
            last_failure = Some(result);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return HealthCheckResult::cancelled(name).with_data("attempts", attempt);
                }
                _ = tokio::time::sleep(self.config.retry_delay) => {}
            }
        }
    }

    async fn attempt(
        &self,
        registered: &RegisteredCheck,
        attempt: u32,
        timeout: Duration,
        parent: &CancellationToken,
    ) -> AttemptResult {
        let token = parent.child_token();
        let ctx = CheckContext::new(registered.definition.name.clone(), attempt, token.clone());
        let body = AssertUnwindSafe(registered.check.check(ctx)).catch_unwind();

        let completed = tokio::select! {
            biased;
            _ = parent.cancelled() => {
                token.cancel();
                return Err(AttemptFailure::Cancelled);
            }
            completed = tokio::time::timeout(timeout, body) => completed,
        };

        match completed {
            Err(_) => {
                token.cancel();
                Err(AttemptFailure::TimedOut)
            }
            Ok(Err(panic)) => Err(AttemptFailure::Panicked(panic_message(panic.as_ref()))),
            Ok(Ok(Err(CheckError::Cancelled))) => Err(AttemptFailure::Cancelled),
            Ok(Ok(Err(error))) => Err(AttemptFailure::Failed(error.to_string())),
            Ok(Ok(Ok(outcome))) => Ok(outcome),
        }
    }

    fn failure_result(name: &str, failure: AttemptFailure, timeout: Duration) -> HealthCheckResult {
        match failure {
            AttemptFailure::Failed(error) => HealthCheckResult::failure(name, error),
            AttemptFailure::Panicked(message) => {
                HealthCheckResult::failure(name, format!("panicked: {}", message))
            }
            AttemptFailure::TimedOut => HealthCheckResult::timeout(name, timeout),
            AttemptFailure::Cancelled => HealthCheckResult::cancelled(name),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::{check_fn, ExecutionOutcome, HealthCheck, HealthCheckDefinition, StaticCheck};
    use crate::clock::SystemClock;
    use crate::config::CircuitBreakerConfig;
    use crate::events::EventBus;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use vigil_types::{CheckCategory, CircuitState};

    #[derive(Default)]
    struct Statuses(HashMap<String, HealthStatus>);

    impl DependencyStatus for Statuses {
        fn last_status(&self, check_name: &str) -> Option<HealthStatus> {
            self.0.get(check_name).copied()
        }
    }

    fn executor(max_retries: u32) -> CheckExecutor {
        let config = ExecutorConfig {
            default_timeout: Duration::from_millis(100),
            default_interval: Duration::from_secs(1),
            max_retries,
            retry_delay: Duration::from_millis(10),
        };
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            CircuitBreakerConfig {
                failure_threshold: 2,
                success_threshold: 1,
                open_timeout: Duration::from_secs(60),
                half_open_max_requests: 1,
            },
            Arc::new(SystemClock),
            EventBus::new(16),
        ));
        CheckExecutor::new(config, breakers, Arc::new(SystemClock))
    }

    fn registered(definition: HealthCheckDefinition, check: impl HealthCheck + 'static) -> RegisteredCheck {
        RegisteredCheck {
            definition,
            check: Arc::new(check),
        }
    }

    fn def(name: &str) -> HealthCheckDefinition {
        HealthCheckDefinition::new(name, CheckCategory::System)
    }

    #[tokio::test]
    async fn test_healthy_outcome() {
        let check = registered(def("ok"), StaticCheck::healthy());
        let result = executor(0)
            .run(&check, &Statuses::default(), &CancellationToken::new())
            .await;

        assert_eq!(result.status, HealthStatus::Healthy);
        assert_eq!(result.outcome, ExecutionOutcome::Completed);
        assert_eq!(result.data.get("attempts"), Some(&serde_json::json!(1)));
    }

    #[tokio::test]
    async fn test_error_is_captured() {
        let check = registered(
            def("err"),
            check_fn(|_| async { Err(CheckError::failed("connection refused")) }),
        );
        let result = executor(0)
            .run(&check, &Statuses::default(), &CancellationToken::new())
            .await;

        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert_eq!(result.error.as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn test_panic_is_captured() {
        let check = registered(
            def("panics"),
            check_fn(|_| async {
                if true {
                    panic!("boom");
                }
                Ok(CheckOutcome::healthy("unreachable"))
            }),
        );
        let result = executor(0)
            .run(&check, &Statuses::default(), &CancellationToken::new())
            .await;

        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert_eq!(result.error.as_deref(), Some("panicked: boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels_body() {
        let observed = Arc::new(AtomicU32::new(0));
        let seen = observed.clone();
        let check = registered(
            def("hangs").with_timeout(Duration::from_millis(50)),
            check_fn(move |ctx| {
                let seen = seen.clone();
                async move {
                    let token = ctx.cancellation().clone();
                    tokio::spawn(async move {
                        token.cancelled().await;
                        seen.fetch_add(1, Ordering::SeqCst);
                    });
                    futures::future::pending::<()>().await;
                    Ok(CheckOutcome::healthy("never"))
                }
            }),
        );

        let result = executor(0)
            .run(&check, &Statuses::default(), &CancellationToken::new())
            .await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(result.is_timeout());
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert_eq!(result.message, "timed out after 50ms");
        assert!(result.error.is_none());
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_cancellation_is_distinct_from_timeout() {
        let cancel = CancellationToken::new();
        let check = registered(
            def("slow").with_timeout(Duration::from_secs(10)),
            check_fn(|_| async {
                futures::future::pending::<()>().await;
                Ok(CheckOutcome::healthy("never"))
            }),
        );

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            trigger.cancel();
        });

        let result = executor(0).run(&check, &Statuses::default(), &cancel).await;
        assert!(result.is_cancelled());
        assert_eq!(result.status, HealthStatus::Unknown);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let check = registered(
            def("flaky"),
            check_fn(move |ctx| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if ctx.attempt() < 3 {
                        Err(CheckError::failed("not yet"))
                    } else {
                        Ok(CheckOutcome::healthy("recovered"))
                    }
                }
            }),
        );

        let result = executor(2)
            .run(&check, &Statuses::default(), &CancellationToken::new())
            .await;

        assert_eq!(result.status, HealthStatus::Healthy);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.data.get("attempts"), Some(&serde_json::json!(3)));
    }

    #[tokio::test]
    async fn test_reported_unhealthy_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let check = registered(
            def("down"),
            check_fn(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(CheckOutcome::unhealthy("disk full")) }
            }),
        );

        let result = executor(3)
            .run(&check, &Statuses::default(), &CancellationToken::new())
            .await;

        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dependency_gating_skips_body() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let check = registered(
            def("api").depends_on("db"),
            check_fn(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(CheckOutcome::healthy("ok")) }
            }),
        );

        let mut statuses = Statuses::default();
        statuses.0.insert("db".to_string(), HealthStatus::Unhealthy);
        let result = executor(0)
            .run(&check, &statuses, &CancellationToken::new())
            .await;

        assert_eq!(result.status, HealthStatus::Degraded);
        assert_eq!(result.message, "dependency unhealthy: db");
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        statuses.0.insert("db".to_string(), HealthStatus::Healthy);
        let result = executor(0)
            .run(&check, &statuses, &CancellationToken::new())
            .await;
        assert_eq!(result.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_open_breaker_maps_to_degraded() {
        let executor = executor(0);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let check = registered(
            def("net").with_circuit_breaker("net-op"),
            check_fn(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(CheckError::failed("unreachable")) }
            }),
        );

        for _ in 0..2 {
            let result = executor
                .run(&check, &Statuses::default(), &CancellationToken::new())
                .await;
            assert_eq!(result.status, HealthStatus::Unhealthy);
        }

        let result = executor
            .run(&check, &Statuses::default(), &CancellationToken::new())
            .await;
        assert_eq!(result.status, HealthStatus::Degraded);
        assert_eq!(result.outcome, ExecutionOutcome::CircuitOpen);
        assert!(result.message.contains("net-op"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(executor.breakers.state("net-op"), Some(CircuitState::Open));
    }
}
