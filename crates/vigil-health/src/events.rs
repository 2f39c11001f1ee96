//! Health events and the bus that carries them.
//!
//! External collaborators (logging, alerting, messaging) observe the
//! core by subscribing to the bus rather than being called directly.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use vigil_types::{CircuitState, DegradationLevel, HealthStatus, ReportId};

use crate::aggregator::HealthReport;
use crate::check::HealthCheckResult;

/// A degradation level transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradationChange {
    pub previous: DegradationLevel,
    pub current: DegradationLevel,
    pub reason: String,
    pub unhealthy_ratio: f64,
    /// Checks whose failure drove the decision.
    pub contributing_checks: Vec<String>,
    pub at: DateTime<Utc>,
}

/// Events emitted by the health core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HealthEvent {
    /// A check was registered.
    CheckRegistered { name: String },

    /// A check was unregistered.
    CheckUnregistered { name: String },

    /// A check was enabled or disabled.
    CheckToggled { name: String, enabled: bool },

    /// A check execution finished.
    CheckCompleted { result: Box<HealthCheckResult> },

    /// Overall status differs from the previously emitted one.
    HealthStatusChanged {
        previous: HealthStatus,
        current: HealthStatus,
        report_id: ReportId,
        at: DateTime<Utc>,
    },

    /// A circuit breaker changed state.
    CircuitBreakerStateChanged {
        operation: String,
        previous: CircuitState,
        current: CircuitState,
        reason: String,
        at: DateTime<Utc>,
    },

    /// The degradation level changed.
    DegradationStatusChanged(DegradationChange),

    /// Automatic checks started.
    SchedulerStarted { tick_interval: Duration },

    /// Automatic checks stopped.
    SchedulerStopped,
}

impl HealthEvent {
    /// Short name for logging and filtering.
    pub fn kind(&self) -> &'static str {
        match self {
            HealthEvent::CheckRegistered { .. } => "check_registered",
            HealthEvent::CheckUnregistered { .. } => "check_unregistered",
            HealthEvent::CheckToggled { .. } => "check_toggled",
            HealthEvent::CheckCompleted { .. } => "check_completed",
            HealthEvent::HealthStatusChanged { .. } => "health_status_changed",
            HealthEvent::CircuitBreakerStateChanged { .. } => "circuit_breaker_state_changed",
            HealthEvent::DegradationStatusChanged(_) => "degradation_status_changed",
            HealthEvent::SchedulerStarted { .. } => "scheduler_started",
            HealthEvent::SchedulerStopped => "scheduler_stopped",
        }
    }
}

/// Broadcast channel for [`HealthEvent`]s.
///
/// Publishing never blocks and never fails; with no subscribers events
/// are dropped, and slow subscribers observe `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<HealthEvent>,
}

impl EventBus {
    /// Create a bus holding up to `capacity` unread events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Dropped silently when nobody is listening.
    pub fn publish(&self, event: HealthEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Receives every report built by the service, e.g. for external storage.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn store(&self, report: &HealthReport);
}

/// Sink that discards reports.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpReportSink;

#[async_trait]
impl ReportSink for NoOpReportSink {
    async fn store(&self, _report: &HealthReport) {}
}
