//! Circuit breaker pattern for resilience.
//!
//! Prevents cascading failures by tracking consecutive failures of a
//! named operation and temporarily rejecting calls to it.

use std::future::Future;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use vigil_types::CircuitState;

use crate::clock::{elapsed_between, SharedClock, SystemClock};
use crate::config::CircuitBreakerConfig;
use crate::events::{EventBus, HealthEvent};

/// Error returned by a breaker-protected call.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The breaker rejected the call without invoking the operation.
    #[error("circuit breaker open for operation {operation} (state: {state})")]
    Open {
        operation: String,
        state: CircuitState,
    },

    /// The operation ran and failed.
    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    /// Was the call rejected rather than attempted?
    pub fn is_rejected(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }

    /// The operation's own error, if it ran.
    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Inner(error) => Some(error),
            BreakerError::Open { .. } => None,
        }
    }
}

/// Mutable state of one breaker. Only touched under the breaker's lock.
#[derive(Debug)]
struct BreakerRecord {
    state: CircuitState,

    /// Consecutive failures while closed.
    consecutive_failures: u32,

    /// Consecutive successes while half-open.
    half_open_successes: u32,

    /// Probes currently running while half-open.
    half_open_in_flight: u32,

    /// Bumped on every transition so permits from an earlier state are
    /// recognised as stale.
    generation: u64,

    opened_at: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
    last_state_change: DateTime<Utc>,

    /// Set while an operator holds the breaker open.
    forced_reason: Option<String>,

    total_executions: u64,
    total_successes: u64,
    total_failures: u64,
    total_rejections: u64,
}

impl BreakerRecord {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            half_open_in_flight: 0,
            generation: 0,
            opened_at: None,
            last_failure: None,
            last_state_change: now,
            forced_reason: None,
            total_executions: 0,
            total_successes: 0,
            total_failures: 0,
            total_rejections: 0,
        }
    }
}

/// A state change to report once the lock is released.
#[derive(Debug)]
struct Transition {
    previous: CircuitState,
    current: CircuitState,
    reason: String,
    at: DateTime<Utc>,
}

/// Circuit breaker guarding a single named operation.
///
/// Transitions between states:
/// - Closed: calls flow, consecutive failures are counted
/// - Open: calls are rejected until the open timeout elapses
/// - Half-Open: a bounded number of probes test recovery
pub struct CircuitBreaker {
    /// Operation this breaker guards.
    operation: String,

    /// Configuration.
    config: CircuitBreakerConfig,

    /// State and counters.
    record: Mutex<BreakerRecord>,

    /// Time source.
    clock: SharedClock,

    /// Where state changes are published.
    events: Option<EventBus>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker for an operation.
    pub fn new(operation: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let clock: SharedClock = std::sync::Arc::new(SystemClock);
        Self {
            operation: operation.into(),
            config,
            record: Mutex::new(BreakerRecord::new(clock.now())),
            clock,
            events: None,
        }
    }

    /// Read time from `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.record = Mutex::new(BreakerRecord::new(clock.now()));
        self.clock = clock;
        self
    }

    /// Publish state changes to `events`.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Get the operation name.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Thresholds and timeouts this breaker runs with.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the current state.
    pub fn state(&self) -> CircuitState {
        let (state, transition) = {
            let mut record = self.record.lock();
            let transition = self.check_timeout(&mut record);
            (record.state, transition)
        };
        self.emit(transition);
        state
    }

    /// Ask to run one call. Dropping the permit without settling it
    /// releases any probe slot without counting a result.
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_>, CircuitState> {
        let (outcome, transition) = {
            let mut record = self.record.lock();
            let transition = self.check_timeout(&mut record);

            let outcome = match record.state {
                CircuitState::Closed => Ok(false),
                CircuitState::Open => Err(CircuitState::Open),
                CircuitState::HalfOpen => {
                    if record.half_open_in_flight < self.config.half_open_max_requests {
                        record.half_open_in_flight += 1;
                        Ok(true)
                    } else {
                        Err(CircuitState::HalfOpen)
                    }
                }
            };

            match outcome {
                Ok(_) => record.total_executions += 1,
                Err(_) => record.total_rejections += 1,
            }

            (outcome.map(|probe| (probe, record.generation)), transition)
        };
        self.emit(transition);

        match outcome {
            Ok((probe, generation)) => Ok(BreakerPermit {
                breaker: self,
                probe,
                generation,
                settled: false,
            }),
            Err(state) => {
                debug!(operation = %self.operation, state = %state, "Circuit breaker rejected call");
                Err(state)
            }
        }
    }

    /// Run `operation` through the breaker, counting every error as a failure.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_classified(operation, |_| true).await
    }

    /// Run `operation` through the breaker.
    ///
    /// `is_failure` decides which errors count against the breaker; the
    /// rest are returned untouched and leave the counters alone.
    pub async fn execute_classified<T, E, F, Fut, C>(
        &self,
        operation: F,
        is_failure: C,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
    {
        let permit = self.try_acquire().map_err(|state| BreakerError::Open {
            operation: self.operation.clone(),
            state,
        })?;

        match operation().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(error) => {
                if is_failure(&error) {
                    permit.failure();
                } else {
                    permit.release();
                }
                Err(BreakerError::Inner(error))
            }
        }
    }

    /// Run `operation` through the breaker, answering with `fallback`
    /// when the call is rejected.
    pub async fn execute_with_fallback<T, E, F, Fut, FB>(
        &self,
        operation: F,
        fallback: FB,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce() -> T,
    {
        match self.execute(operation).await {
            Err(BreakerError::Open { .. }) => Ok(fallback()),
            other => other,
        }
    }

    /// Hold the circuit open until closed or reset by hand.
    pub fn force_open(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let transition = {
            let mut record = self.record.lock();
            let now = self.clock.now();
            record.forced_reason = Some(reason.clone());
            self.transition_to(&mut record, CircuitState::Open, format!("forced open: {}", reason), now)
        };
        self.emit(transition);
    }

    /// Close the circuit regardless of counters.
    pub fn force_close(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let transition = {
            let mut record = self.record.lock();
            let now = self.clock.now();
            self.transition_to(&mut record, CircuitState::Closed, format!("forced closed: {}", reason), now)
        };
        self.emit(transition);
    }

    /// Reset the circuit breaker to closed state.
    pub fn reset(&self) {
        self.force_close("reset");
    }

    /// Get circuit breaker statistics.
    pub fn stats(&self) -> CircuitBreakerStats {
        let (stats, transition) = {
            let mut record = self.record.lock();
            let transition = self.check_timeout(&mut record);
            let stats = CircuitBreakerStats {
                operation: self.operation.clone(),
                state: record.state,
                consecutive_failures: record.consecutive_failures,
                half_open_successes: record.half_open_successes,
                total_executions: record.total_executions,
                total_successes: record.total_successes,
                total_failures: record.total_failures,
                total_rejections: record.total_rejections,
                opened_at: record.opened_at,
                last_failure: record.last_failure,
                last_state_change: record.last_state_change,
                forced_reason: record.forced_reason.clone(),
            };
            (stats, transition)
        };
        self.emit(transition);
        stats
    }

    fn on_success(&self, probe: bool, generation: u64) {
        let transition = {
            let mut record = self.record.lock();
            record.total_successes += 1;

            if record.generation != generation {
                None
            } else {
                match record.state {
                    CircuitState::Closed => {
                        // Reset failure count on success
                        record.consecutive_failures = 0;
                        None
                    }
                    CircuitState::HalfOpen if probe => {
                        record.half_open_in_flight = record.half_open_in_flight.saturating_sub(1);
                        record.half_open_successes += 1;

                        if record.half_open_successes >= self.config.success_threshold {
                            info!(
                                operation = %self.operation,
                                successes = record.half_open_successes,
                                "Circuit breaker closing after successful recovery"
                            );
                            let now = self.clock.now();
                            let reason = format!(
                                "{} consecutive successful probes",
                                record.half_open_successes
                            );
                            self.transition_to(&mut record, CircuitState::Closed, reason, now)
                        } else {
                            None
                        }
                    }
                    _ => None,
                }
            }
        };
        self.emit(transition);
    }

    fn on_failure(&self, probe: bool, generation: u64) {
        let transition = {
            let mut record = self.record.lock();
            let now = self.clock.now();
            record.total_failures += 1;
            record.last_failure = Some(now);

            if record.generation != generation {
                None
            } else {
                match record.state {
                    CircuitState::Closed => {
                        record.consecutive_failures += 1;

                        if record.consecutive_failures >= self.config.failure_threshold {
                            warn!(
                                operation = %self.operation,
                                failures = record.consecutive_failures,
                                "Circuit breaker opening due to failures"
                            );
                            let reason =
                                format!("{} consecutive failures", record.consecutive_failures);
                            self.transition_to(&mut record, CircuitState::Open, reason, now)
                        } else {
                            None
                        }
                    }
                    CircuitState::HalfOpen => {
                        // Any failure in half-open goes back to open
                        warn!(
                            operation = %self.operation,
                            probe = probe,
                            "Circuit breaker re-opening after half-open failure"
                        );
                        self.transition_to(
                            &mut record,
                            CircuitState::Open,
                            "probe failed while half-open".to_string(),
                            now,
                        )
                    }
                    CircuitState::Open => None,
                }
            }
        };
        self.emit(transition);
    }

    fn on_release(&self, probe: bool, generation: u64) {
        let mut record = self.record.lock();
        if probe && record.generation == generation && record.state == CircuitState::HalfOpen {
            record.half_open_in_flight = record.half_open_in_flight.saturating_sub(1);
        }
    }

    /// Move from open to half-open once the open timeout has passed.
    /// A forced-open breaker stays open.
    fn check_timeout(&self, record: &mut BreakerRecord) -> Option<Transition> {
        if record.state != CircuitState::Open || record.forced_reason.is_some() {
            return None;
        }

        let opened_at = record.opened_at?;
        let now = self.clock.now();

        if elapsed_between(opened_at, now) >= self.config.open_timeout {
            info!(
                operation = %self.operation,
                "Circuit breaker transitioning to half-open after timeout"
            );
            self.transition_to(record, CircuitState::HalfOpen, "open timeout elapsed".to_string(), now)
        } else {
            None
        }
    }

    /// Transition to a new state, resetting counters as needed.
    fn transition_to(
        &self,
        record: &mut BreakerRecord,
        new_state: CircuitState,
        reason: String,
        now: DateTime<Utc>,
    ) -> Option<Transition> {
        let previous = record.state;
        record.state = new_state;
        record.generation += 1;
        record.last_state_change = now;
        record.half_open_successes = 0;
        record.half_open_in_flight = 0;

        match new_state {
            CircuitState::Closed => {
                record.consecutive_failures = 0;
                record.opened_at = None;
                record.forced_reason = None;
            }
            CircuitState::Open => {
                record.opened_at = Some(now);
            }
            CircuitState::HalfOpen => {}
        }

        if previous == new_state {
            return None;
        }

        Some(Transition {
            previous,
            current: new_state,
            reason,
            at: now,
        })
    }

    fn emit(&self, transition: Option<Transition>) {
        let Some(transition) = transition else {
            return;
        };

        info!(
            operation = %self.operation,
            old_state = %transition.previous,
            new_state = %transition.current,
            forced = !transition.previous.can_transition_to(transition.current),
            reason = %transition.reason,
            "Circuit breaker state changed"
        );

        if let Some(events) = &self.events {
            events.publish(HealthEvent::CircuitBreakerStateChanged {
                operation: self.operation.clone(),
                previous: transition.previous,
                current: transition.current,
                reason: transition.reason,
                at: transition.at,
            });
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("operation", &self.operation)
            .field("state", &self.record.lock().state)
            .finish()
    }
}

/// Permission to run one call through a breaker.
#[must_use = "settle the permit with success() or failure()"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    generation: u64,
    settled: bool,
}

impl BreakerPermit<'_> {
    /// Is this call a half-open probe?
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// Record a successful call.
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.probe, self.generation);
    }

    /// Record a failed call.
    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.probe, self.generation);
    }

    /// Give the slot back without counting a result.
    pub fn release(self) {}
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_release(self.probe, self.generation);
        }
    }
}

/// Statistics for a circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    /// Operation name.
    pub operation: String,

    /// Current state.
    pub state: CircuitState,

    /// Consecutive failures while closed.
    pub consecutive_failures: u32,

    /// Consecutive successes while half-open.
    pub half_open_successes: u32,

    pub total_executions: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejections: u64,

    /// When the circuit last opened.
    pub opened_at: Option<DateTime<Utc>>,

    /// Time of the last failure.
    pub last_failure: Option<DateTime<Utc>>,

    /// Time of last state transition.
    pub last_state_change: DateTime<Utc>,

    /// Operator reason while forced open.
    pub forced_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn test_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 1,
            open_timeout: Duration::from_millis(100),
            half_open_max_requests: 1,
        }
    }

    fn test_breaker() -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let breaker = CircuitBreaker::new("net-op", test_config()).with_clock(clock.clone());
        (breaker, clock)
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), BreakerError<String>> {
        breaker.execute(|| async { Err::<(), _>("boom".to_string()) }).await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<(), BreakerError<String>> {
        breaker.execute(|| async { Ok::<(), String>(()) }).await
    }

    #[tokio::test]
    async fn test_circuit_breaker_closed_to_open() {
        let (breaker, _clock) = test_breaker();
        let invocations = AtomicU32::new(0);

        for _ in 0..3 {
            let result = breaker
                .execute(|| async {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("boom")
                })
                .await;
            assert!(matches!(result, Err(BreakerError::Inner("boom"))));
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        // Fourth call is rejected without invoking the operation
        let result = breaker
            .execute(|| async {
                invocations.fetch_add(1, Ordering::SeqCst);
                Ok::<(), &str>(())
            })
            .await;
        assert!(result.unwrap_err().is_rejected());
        assert_eq!(invocations.load(Ordering::SeqCst), 3);
        assert_eq!(breaker.stats().total_rejections, 1);
    }

    #[tokio::test]
    async fn test_circuit_breaker_success_resets_failures() {
        let (breaker, _clock) = test_breaker();

        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        succeed(&breaker).await.unwrap();

        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        // Still closed because we reset
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().consecutive_failures, 2);
    }

    #[tokio::test]
    async fn test_open_to_half_open_after_timeout() {
        let (breaker, clock) = test_breaker();
        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }

        clock.advance(Duration::from_millis(50));
        assert_eq!(breaker.state(), CircuitState::Open);

        clock.advance(Duration::from_millis(50));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_circuit_breaker_half_open_to_closed() {
        let (breaker, clock) = test_breaker();
        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }
        clock.advance(Duration::from_millis(100));

        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_circuit_breaker_half_open_failure() {
        let (breaker, clock) = test_breaker();
        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }
        clock.advance(Duration::from_millis(100));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // Any failure in half-open goes back to open with a fresh timer
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.stats().opened_at, Some(clock.now()));

        clock.advance(Duration::from_millis(99));
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_half_open_limits_probes() {
        let config = CircuitBreakerConfig {
            success_threshold: 2,
            ..test_config()
        };
        let clock = Arc::new(ManualClock::starting_now());
        let breaker = CircuitBreaker::new("probe", config).with_clock(clock.clone());
        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }
        clock.advance(Duration::from_millis(100));

        let probe = breaker.try_acquire().unwrap();
        assert!(probe.is_probe());
        assert_eq!(breaker.try_acquire().err(), Some(CircuitState::HalfOpen));

        // Dropping an unsettled probe frees the slot without counting
        drop(probe);
        let probe = breaker.try_acquire().unwrap();
        probe.success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.try_acquire().unwrap().success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_classified_errors_pass_through() {
        let (breaker, _clock) = test_breaker();

        for _ in 0..5 {
            let result = breaker
                .execute_classified(
                    || async { Err::<(), _>("cancelled") },
                    |error| *error != "cancelled",
                )
                .await;
            assert!(matches!(result, Err(BreakerError::Inner("cancelled"))));
        }

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_fallback_used_when_open() {
        let (breaker, _clock) = test_breaker();
        breaker.force_open("maintenance");

        let value = breaker
            .execute_with_fallback(|| async { Ok::<_, String>("live") }, || "cached")
            .await
            .unwrap();
        assert_eq!(value, "cached");
    }

    #[tokio::test]
    async fn test_forced_open_ignores_timeout() {
        let (breaker, clock) = test_breaker();
        breaker.force_open("maintenance");

        clock.advance(Duration::from_secs(10));
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.stats().forced_reason.as_deref(), Some("maintenance"));

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.stats().forced_reason.is_none());
    }

    #[tokio::test]
    async fn test_state_changes_are_published() {
        let events = EventBus::new(16);
        let mut rx = events.subscribe();
        let clock = Arc::new(ManualClock::starting_now());
        let breaker = CircuitBreaker::new("net-op", test_config())
            .with_clock(clock)
            .with_events(events);

        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }
        breaker.force_close("operator");

        match rx.recv().await.unwrap() {
            HealthEvent::CircuitBreakerStateChanged {
                operation,
                previous,
                current,
                ..
            } => {
                assert_eq!(operation, "net-op");
                assert_eq!(previous, CircuitState::Closed);
                assert_eq!(current, CircuitState::Open);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        match rx.recv().await.unwrap() {
            HealthEvent::CircuitBreakerStateChanged { current, reason, .. } => {
                assert_eq!(current, CircuitState::Closed);
                assert_eq!(reason, "forced closed: operator");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_closing_a_closed_breaker_is_silent() {
        let events = EventBus::new(16);
        let mut rx = events.subscribe();
        let breaker = CircuitBreaker::new("idle", test_config()).with_events(events);

        breaker.force_close("operator");
        breaker.reset();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(rx.try_recv().is_err());
    }
}
