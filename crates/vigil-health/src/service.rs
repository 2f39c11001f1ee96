//! The health service façade.
//!
//! [`HealthService`] composes the registry, executor, history store,
//! aggregator, degradation manager, circuit breakers and scheduler. It is
//! the only type external collaborators need to touch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use vigil_types::{CheckCategory, CircuitState, DegradationLevel, HealthStatus};

use crate::aggregator::{Aggregator, CheckSnapshot, HealthReport};
use crate::check::{HealthCheck, HealthCheckDefinition, HealthCheckResult};
use crate::clock::{SharedClock, SystemClock};
use crate::config::{CircuitBreakerConfig, HealthConfig};
use crate::degradation::{DegradationManager, DegradationStatus};
use crate::error::{HealthError, HealthResult};
use crate::events::{EventBus, HealthEvent, NoOpReportSink, ReportSink};
use crate::executor::CheckExecutor;
use crate::history::{CheckStatistics, HistoryStore, Statistics};
use crate::registry::{execution_waves, CheckRegistry, RegisteredCheck};
use crate::resilience::{CircuitBreaker, CircuitBreakerRegistry, CircuitBreakerStats};
use crate::scheduler::{CheckRunner, Scheduler};

/// Builder for [`HealthService`].
pub struct HealthServiceBuilder {
    config: HealthConfig,
    clock: SharedClock,
    sink: Arc<dyn ReportSink>,
}

impl HealthServiceBuilder {
    /// Start from a configuration with the system clock and no sink.
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            sink: Arc::new(NoOpReportSink),
        }
    }

    /// Time source for breaker timeouts, history age and hysteresis.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Receive every report built by the service.
    pub fn with_report_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Validate the configuration and assemble the service.
    pub fn build(self) -> HealthResult<HealthService> {
        self.config.validate()?;

        let config = self.config;
        let clock = self.clock;
        let events = EventBus::new(config.event_capacity);
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            config.circuit_breaker.clone(),
            clock.clone(),
            events.clone(),
        ));

        let inner = ServiceInner {
            registry: CheckRegistry::new(),
            executor: CheckExecutor::new(config.executor.clone(), breakers.clone(), clock.clone()),
            history: HistoryStore::new(config.history.clone(), clock.clone()),
            aggregator: Aggregator::new(events.clone()),
            degradation: DegradationManager::new(
                config.degradation.clone(),
                clock.clone(),
                events.clone(),
            ),
            scheduler: Arc::new(Scheduler::new(
                config.scheduler.clone(),
                config.executor.clone(),
                events.clone(),
            )),
            breakers,
            events,
            sink: self.sink,
            report_gate: tokio::sync::Mutex::new(()),
            last_report: Mutex::new(None),
            report_count: AtomicU64::new(0),
            clock,
            config,
        };

        Ok(HealthService {
            inner: Arc::new(inner),
        })
    }
}

struct ServiceInner {
    config: HealthConfig,
    registry: CheckRegistry,
    breakers: Arc<CircuitBreakerRegistry>,
    executor: CheckExecutor,
    history: HistoryStore,
    aggregator: Aggregator,
    degradation: DegradationManager,
    scheduler: Arc<Scheduler>,
    events: EventBus,
    sink: Arc<dyn ReportSink>,
    /// Held from snapshot to sink delivery so reports are built, observed
    /// and delivered one at a time, in order.
    report_gate: tokio::sync::Mutex<()>,
    last_report: Mutex<Option<Arc<HealthReport>>>,
    report_count: AtomicU64,
    clock: SharedClock,
}

impl ServiceInner {
    /// Build a report from the latest result of every enabled check and
    /// feed it to the aggregator and degradation manager.
    ///
    /// Callers must hold `report_gate`.
    fn rebuild(&self, total_duration: Duration) -> Arc<HealthReport> {
        let snapshots: Vec<CheckSnapshot> = self
            .registry
            .enabled_checks()
            .into_iter()
            .filter_map(|check| {
                self.history.latest(check.name()).map(|result| CheckSnapshot {
                    result,
                    category: check.definition.category.clone(),
                    non_critical: check.definition.non_critical,
                })
            })
            .collect();

        let report = Arc::new(HealthReport::from_snapshots(
            snapshots,
            total_duration,
            self.clock.now(),
        ));
        self.aggregator.observe(&report);
        self.degradation.evaluate(&report);

        *self.last_report.lock() = Some(report.clone());
        self.report_count.fetch_add(1, Ordering::SeqCst);
        report
    }

    /// Rebuild the report and hand it to the sink.
    async fn refresh(&self, total_duration: Duration) -> Arc<HealthReport> {
        let _gate = self.report_gate.lock().await;
        let report = self.rebuild(total_duration);
        self.sink.store(&report).await;
        report
    }

    fn has_report(&self) -> bool {
        self.last_report.lock().is_some()
    }
}

#[async_trait]
impl CheckRunner for ServiceInner {
    fn candidates(&self) -> Vec<RegisteredCheck> {
        self.registry.enabled_checks()
    }

    async fn run_check(&self, check: RegisteredCheck, cancel: CancellationToken) -> HealthCheckResult {
        let result = self.executor.run(&check, &self.history, &cancel).await;
        self.history.record(result.clone());
        self.events.publish(HealthEvent::CheckCompleted {
            result: Box::new(result.clone()),
        });
        result
    }

    async fn pass_completed(&self, _results: Vec<HealthCheckResult>, elapsed: Duration) {
        self.refresh(elapsed).await;
    }
}

/// Health monitoring and resilience service.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct HealthService {
    inner: Arc<ServiceInner>,
}

impl HealthService {
    /// Create a service with the system clock and no report sink.
    pub fn new(config: HealthConfig) -> HealthResult<Self> {
        HealthServiceBuilder::new(config).build()
    }

    /// Builder for a service with a custom clock or report sink.
    pub fn builder(config: HealthConfig) -> HealthServiceBuilder {
        HealthServiceBuilder::new(config)
    }

    /// Configuration the service was built with.
    pub fn config(&self) -> &HealthConfig {
        &self.inner.config
    }

    // Registration

    /// Register a health check under its definition's unique name.
    pub fn register_health_check(
        &self,
        definition: HealthCheckDefinition,
        check: Arc<dyn HealthCheck>,
    ) -> HealthResult<()> {
        let name = definition.name.clone();
        self.inner.registry.register(definition, check)?;

        info!(check = %name, "Health check registered");
        self.inner
            .events
            .publish(HealthEvent::CheckRegistered { name });
        Ok(())
    }

    /// Remove a check together with its history and latest result.
    ///
    /// Once a report exists, a fresh one without the check is built and
    /// delivered to the sink.
    pub async fn unregister_health_check(&self, name: &str) -> HealthResult<()> {
        self.inner.registry.unregister(name)?;
        self.inner.history.remove(name);
        self.inner.scheduler.forget(name);

        info!(check = %name, "Health check unregistered");
        self.inner.events.publish(HealthEvent::CheckUnregistered {
            name: name.to_string(),
        });
        if self.inner.has_report() {
            self.inner.refresh(Duration::ZERO).await;
        }
        Ok(())
    }

    /// Enable or disable a check. Disabled checks are skipped by the
    /// scheduler and left out of reports.
    pub async fn set_check_enabled(&self, name: &str, enabled: bool) -> HealthResult<()> {
        let previous = self.inner.registry.set_enabled(name, enabled)?;
        if previous == enabled {
            return Ok(());
        }

        self.inner.events.publish(HealthEvent::CheckToggled {
            name: name.to_string(),
            enabled,
        });
        if self.inner.has_report() {
            self.inner.refresh(Duration::ZERO).await;
        }
        Ok(())
    }

    /// Definitions of every registered check, sorted by name.
    pub fn registered_checks(&self) -> Vec<HealthCheckDefinition> {
        self.inner.registry.definitions()
    }

    // Execution

    /// Run one check now, outside the schedule. Runs even when the check
    /// is disabled, and waits for a worker slot like scheduled runs do.
    /// Errors only for an unknown name.
    #[instrument(skip(self, cancel))]
    pub async fn execute_health_check(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> HealthResult<HealthCheckResult> {
        let check = self
            .inner
            .registry
            .get(name)
            .ok_or_else(|| HealthError::CheckNotFound(name.to_string()))?;

        let result = {
            let _permit = self.inner.scheduler.acquire().await;
            self.inner.run_check(check, cancel.clone()).await
        };
        self.inner.scheduler.mark_run(name);
        self.inner.refresh(result.duration).await;
        Ok(result)
    }

    /// Run every enabled check, dependencies first, and return the report.
    #[instrument(skip_all)]
    pub async fn execute_all_health_checks(&self, cancel: &CancellationToken) -> HealthReport {
        let started = Instant::now();
        let scheduler = &self.inner.scheduler;

        for wave in execution_waves(self.inner.registry.enabled_checks()) {
            let runs = wave.into_iter().map(|check| async move {
                let _permit = scheduler.acquire().await;
                let name = check.definition.name.clone();
                self.inner.run_check(check, cancel.clone()).await;
                scheduler.mark_run(&name);
            });
            join_all(runs).await;
        }

        let report = self.inner.refresh(started.elapsed()).await;
        report.as_ref().clone()
    }

    // Status queries

    /// Overall status of the latest report, `Unknown` before the first.
    pub fn get_overall_health_status(&self) -> HealthStatus {
        self.inner
            .last_report
            .lock()
            .as_ref()
            .map(|report| report.overall_status)
            .unwrap_or(HealthStatus::Unknown)
    }

    /// Most recent report, `None` before the first pass.
    pub fn get_last_report(&self) -> Option<Arc<HealthReport>> {
        self.inner.last_report.lock().clone()
    }

    /// Latest result of one check, even if it has aged out of history.
    pub fn get_last_result(&self, name: &str) -> Option<HealthCheckResult> {
        self.inner.history.latest(name)
    }

    /// Worst status within a category of the latest report.
    pub fn get_category_status(&self, category: &CheckCategory) -> HealthStatus {
        self.get_last_report()
            .map(|report| report.status_for(category))
            .unwrap_or(HealthStatus::Unknown)
    }

    /// Does the latest report contain a critical failure?
    pub fn has_critical_failures(&self) -> bool {
        self.get_last_report()
            .is_some_and(|report| report.has_critical_failures())
    }

    // Degradation

    /// Active degradation level.
    pub fn get_current_degradation_level(&self) -> DegradationLevel {
        self.inner.degradation.current_level()
    }

    /// Level, last ratio and pending recovery.
    pub fn get_degradation_status(&self) -> DegradationStatus {
        self.inner.degradation.status()
    }

    /// Is `feature` available at the current degradation level?
    pub fn is_feature_enabled(&self, feature: &str) -> bool {
        self.inner.degradation.is_feature_enabled(feature)
    }

    /// Gate a feature: it is disabled once the level reaches `disabled_at`.
    pub fn set_feature(&self, feature: impl Into<String>, disabled_at: DegradationLevel) {
        self.inner.degradation.set_feature(feature, disabled_at);
    }

    /// Operator override of the degradation level.
    pub fn force_degradation_level(&self, level: DegradationLevel, reason: &str) {
        self.inner.degradation.force_level(level, reason);
    }

    // Circuit breakers

    /// State of a breaker, `None` if the operation has none.
    pub fn get_circuit_breaker_state(&self, operation: &str) -> Option<CircuitState> {
        self.inner.breakers.state(operation)
    }

    /// Hold an operation's breaker open until closed by hand.
    pub fn force_circuit_breaker_open(&self, operation: &str, reason: &str) {
        self.inner.breakers.force_open(operation, reason);
    }

    /// Close an operation's breaker regardless of its counters.
    pub fn force_circuit_breaker_closed(&self, operation: &str, reason: &str) {
        self.inner.breakers.force_close(operation, reason);
    }

    /// Breaker for an operation, created with the default config if needed.
    /// Use it to protect calls that are not health checks.
    pub fn circuit_breaker(&self, operation: &str) -> Arc<CircuitBreaker> {
        self.inner.breakers.get_or_create(operation)
    }

    /// Install a breaker with its own config, replacing any existing one.
    /// Errors only for an invalid config.
    pub fn register_circuit_breaker(
        &self,
        operation: &str,
        config: CircuitBreakerConfig,
    ) -> HealthResult<Arc<CircuitBreaker>> {
        self.inner.breakers.register_with_config(operation, config)
    }

    /// Snapshot of every known breaker.
    pub fn circuit_breaker_stats(&self) -> Vec<CircuitBreakerStats> {
        self.inner.breakers.all_stats()
    }

    // Scheduling

    /// Start automatic checks. Returns false if already running.
    pub fn start_automatic_checks(&self) -> bool {
        let runner: Weak<ServiceInner> = Arc::downgrade(&self.inner);
        let runner: Weak<dyn CheckRunner> = runner;
        self.inner.scheduler.start(runner)
    }

    /// Stop automatic checks, waiting for in-flight executions.
    pub async fn stop_automatic_checks(&self) -> bool {
        self.inner.scheduler.stop().await
    }

    /// Are automatic checks running?
    pub fn is_running(&self) -> bool {
        self.inner.scheduler.is_running()
    }

    // History and statistics

    /// Up to `max_results` results for a check, most recent first.
    pub fn get_health_history(&self, name: &str, max_results: usize) -> Vec<HealthCheckResult> {
        self.inner.history.history(name, max_results)
    }

    /// Rolling counters for one check.
    pub fn get_check_statistics(&self, name: &str) -> Option<CheckStatistics> {
        self.inner.history.statistics(name)
    }

    /// System-wide counters together with per-check statistics.
    pub fn get_statistics(&self) -> Statistics {
        let per_check = self.inner.history.all_statistics();
        let total_executions: u64 = per_check.values().map(|s| s.executions).sum();
        let total_duration: Duration = per_check.values().map(|s| s.total_duration).sum();
        let average_duration = if total_executions == 0 {
            Duration::ZERO
        } else {
            let nanos = total_duration.as_nanos() / total_executions as u128;
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        };

        Statistics {
            total_executions,
            total_failures: per_check.values().map(|s| s.failures).sum(),
            total_timeouts: per_check.values().map(|s| s.timeouts).sum(),
            total_duration,
            average_duration,
            registered_checks: self.inner.registry.len(),
            enabled_checks: self.inner.registry.enabled_checks().len(),
            overall_status: self.get_overall_health_status(),
            degradation_level: self.get_current_degradation_level(),
            open_circuit_breakers: self.inner.breakers.open_count(),
            scheduler_running: self.is_running(),
            report_count: self.inner.report_count.load(Ordering::SeqCst),
            per_check,
            generated_at: self.inner.clock.now(),
        }
    }

    // Events

    /// Subscribe to status, breaker and degradation events.
    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.inner.events.subscribe()
    }
}
