//! Graceful degradation driven by the unhealthy ratio.
//!
//! The manager owns the single system-wide [`DegradationLevel`]. It is
//! changed only through [`DegradationManager::evaluate`] or an operator
//! override, and read through accessors.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use vigil_types::DegradationLevel;

use crate::aggregator::HealthReport;
use crate::clock::{elapsed_between, SharedClock};
use crate::config::{DegradationConfig, DegradationThresholds};
use crate::events::{DegradationChange, EventBus, HealthEvent};

/// Point-in-time view of the degradation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradationStatus {
    pub level: DegradationLevel,
    /// When the current level became active.
    pub since: DateTime<Utc>,
    /// Ratio seen by the last evaluation.
    pub unhealthy_ratio: f64,
    pub contributing_checks: Vec<String>,
    /// Lower level waiting out the recovery window, if any.
    pub pending_recovery: Option<DegradationLevel>,
    pub recovery_since: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct DegradationState {
    level: DegradationLevel,
    since: DateTime<Utc>,
    ratio: f64,
    contributing: Vec<String>,
    recovery_since: Option<DateTime<Utc>>,
    pending: Option<DegradationLevel>,
    transitions: VecDeque<DegradationChange>,
}

/// Maps health reports to a degradation level and answers feature gates.
pub struct DegradationManager {
    thresholds: DegradationThresholds,
    hysteresis: Duration,
    log_capacity: usize,
    /// Feature name to the level at which it is switched off.
    features: DashMap<String, DegradationLevel>,
    state: Mutex<DegradationState>,
    clock: SharedClock,
    events: EventBus,
}

impl DegradationManager {
    /// Create a manager at `DegradationLevel::None`.
    pub fn new(config: DegradationConfig, clock: SharedClock, events: EventBus) -> Self {
        let now = clock.now();
        Self {
            thresholds: config.thresholds,
            hysteresis: config.recovery_hysteresis,
            log_capacity: config.transition_log_capacity.max(1),
            features: config.features.into_iter().collect(),
            state: Mutex::new(DegradationState {
                level: DegradationLevel::None,
                since: now,
                ratio: 0.0,
                contributing: Vec::new(),
                recovery_since: None,
                pending: None,
                transitions: VecDeque::new(),
            }),
            clock,
            events,
        }
    }

    /// Ratio thresholds in effect.
    pub fn thresholds(&self) -> &DegradationThresholds {
        &self.thresholds
    }

    /// Re-evaluate the level from a fresh report.
    ///
    /// Increases apply at once. A decrease applies only after the report
    /// ratio has stayed below the current level for the recovery window;
    /// a report back at the current level restarts that window.
    pub fn evaluate(&self, report: &HealthReport) -> DegradationLevel {
        let ratio = report.unhealthy_ratio();
        let target = self.thresholds.level_for(ratio);
        let contributing = report.failing_checks();
        let now = self.clock.now();

        let (level, change) = {
            let mut state = self.state.lock();
            state.ratio = ratio;
            state.contributing = contributing.clone();

            let change = if target > state.level {
                let reason = format!(
                    "unhealthy ratio {:.2} exceeds {} threshold {:.2}",
                    ratio,
                    target,
                    self.thresholds.threshold_of(target)
                );
                Some(self.transition(&mut state, target, reason, ratio, contributing, now))
            } else if target < state.level {
                let started = *state.recovery_since.get_or_insert(now);
                state.pending = Some(target);
                let held = elapsed_between(started, now);

                if held >= self.hysteresis {
                    let reason = format!(
                        "unhealthy ratio {:.2} held below {} threshold for {}s",
                        ratio,
                        state.level,
                        held.as_secs()
                    );
                    Some(self.transition(&mut state, target, reason, ratio, contributing, now))
                } else {
                    debug!(
                        current = %state.level,
                        target = %target,
                        held_ms = held.as_millis() as u64,
                        "Degradation recovery pending"
                    );
                    None
                }
            } else {
                state.recovery_since = None;
                state.pending = None;
                None
            };

            (state.level, change)
        };

        if let Some(change) = change {
            self.publish(change);
        }
        level
    }

    /// Set the level by hand. Later evaluations apply the usual rules.
    pub fn force_level(&self, level: DegradationLevel, reason: impl Into<String>) {
        let now = self.clock.now();
        let change = {
            let mut state = self.state.lock();
            if state.level == level {
                return;
            }
            let ratio = state.ratio;
            let contributing = state.contributing.clone();
            let reason = format!("forced: {}", reason.into());
            self.transition(&mut state, level, reason, ratio, contributing, now)
        };
        self.publish(change);
    }

    fn transition(
        &self,
        state: &mut DegradationState,
        level: DegradationLevel,
        reason: String,
        ratio: f64,
        contributing: Vec<String>,
        now: DateTime<Utc>,
    ) -> DegradationChange {
        let change = DegradationChange {
            previous: state.level,
            current: level,
            reason,
            unhealthy_ratio: ratio,
            contributing_checks: contributing,
            at: now,
        };

        state.level = level;
        state.since = now;
        state.recovery_since = None;
        state.pending = None;
        state.transitions.push_back(change.clone());
        while state.transitions.len() > self.log_capacity {
            state.transitions.pop_front();
        }
        change
    }

    fn publish(&self, change: DegradationChange) {
        info!(
            previous = %change.previous,
            current = %change.current,
            degraded = change.current.is_degraded(),
            ratio = change.unhealthy_ratio,
            reason = %change.reason,
            "Degradation level changed"
        );
        self.events
            .publish(HealthEvent::DegradationStatusChanged(change));
    }

    /// Active degradation level.
    pub fn current_level(&self) -> DegradationLevel {
        self.state.lock().level
    }

    /// Level, last ratio and pending recovery target.
    pub fn status(&self) -> DegradationStatus {
        let state = self.state.lock();
        DegradationStatus {
            level: state.level,
            since: state.since,
            unhealthy_ratio: state.ratio,
            contributing_checks: state.contributing.clone(),
            pending_recovery: state.pending,
            recovery_since: state.recovery_since,
        }
    }

    /// Recorded transitions, oldest first.
    pub fn transitions(&self) -> Vec<DegradationChange> {
        self.state.lock().transitions.iter().cloned().collect()
    }

    /// Gate a feature off once the level reaches `disabled_at`.
    pub fn set_feature(&self, name: impl Into<String>, disabled_at: DegradationLevel) {
        self.features.insert(name.into(), disabled_at);
    }

    /// Stop gating a feature.
    pub fn remove_feature(&self, name: &str) {
        self.features.remove(name);
    }

    /// Is the feature available at the current level?
    ///
    /// Unmapped features stay on until the level is `Disabled`.
    pub fn is_feature_enabled(&self, name: &str) -> bool {
        let level = self.current_level();
        match self.features.get(name) {
            Some(disabled_at) => level < *disabled_at,
            None => level < DegradationLevel::Disabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::CheckSnapshot;
    use crate::check::{CheckOutcome, HealthCheckResult};
    use crate::clock::ManualClock;
    use proptest::prelude::*;
    use std::sync::Arc;
    use vigil_types::{CheckCategory, HealthStatus};

    fn report(total: usize, unhealthy: usize) -> HealthReport {
        let snapshots = (0..total).map(|i| {
            let status = if i < unhealthy {
                HealthStatus::Unhealthy
            } else {
                HealthStatus::Healthy
            };
            CheckSnapshot {
                result: HealthCheckResult::from_outcome(
                    format!("check-{}", i),
                    CheckOutcome::new(status, ""),
                ),
                category: CheckCategory::System,
                non_critical: false,
            }
        });
        HealthReport::from_snapshots(snapshots, Duration::ZERO, Utc::now())
    }

    fn manager(hysteresis: Duration) -> (DegradationManager, Arc<ManualClock>, EventBus) {
        let clock = Arc::new(ManualClock::starting_now());
        let events = EventBus::new(64);
        let config = DegradationConfig {
            recovery_hysteresis: hysteresis,
            ..Default::default()
        };
        (
            DegradationManager::new(config, clock.clone(), events.clone()),
            clock,
            events,
        )
    }

    #[test]
    fn test_threshold_levels_for_ten_checks() {
        let cases = [
            (0, DegradationLevel::None),
            (1, DegradationLevel::None),
            (2, DegradationLevel::Minor),
            (3, DegradationLevel::Moderate),
            (6, DegradationLevel::Severe),
            (8, DegradationLevel::Disabled),
        ];

        for (unhealthy, expected) in cases {
            let (manager, _, _) = manager(Duration::ZERO);
            assert_eq!(
                manager.evaluate(&report(10, unhealthy)),
                expected,
                "{} unhealthy of 10",
                unhealthy
            );
        }
    }

    #[test]
    fn test_empty_report_is_not_degraded() {
        let (manager, _, _) = manager(Duration::ZERO);
        assert_eq!(manager.evaluate(&report(0, 0)), DegradationLevel::None);
    }

    #[test]
    fn test_increase_is_immediate_recovery_waits() {
        let (manager, clock, _) = manager(Duration::from_secs(30));

        assert_eq!(manager.evaluate(&report(10, 6)), DegradationLevel::Severe);

        clock.advance(Duration::from_secs(10));
        assert_eq!(manager.evaluate(&report(10, 0)), DegradationLevel::Severe);
        assert_eq!(manager.status().pending_recovery, Some(DegradationLevel::None));

        clock.advance(Duration::from_secs(29));
        assert_eq!(manager.evaluate(&report(10, 0)), DegradationLevel::Severe);

        clock.advance(Duration::from_secs(1));
        assert_eq!(manager.evaluate(&report(10, 0)), DegradationLevel::None);
        assert_eq!(manager.status().pending_recovery, None);
    }

    #[test]
    fn test_relapse_restarts_recovery_window() {
        let (manager, clock, _) = manager(Duration::from_secs(30));

        manager.evaluate(&report(10, 3));
        manager.evaluate(&report(10, 0));
        clock.advance(Duration::from_secs(20));
        manager.evaluate(&report(10, 3));
        clock.advance(Duration::from_secs(20));

        // Only 20s since the ratio dropped again
        assert_eq!(manager.evaluate(&report(10, 0)), DegradationLevel::Moderate);
    }

    #[test]
    fn test_flapping_ratio_does_not_oscillate() {
        let (manager, clock, _) = manager(Duration::from_secs(60));

        manager.evaluate(&report(10, 3));
        let before = manager.transitions().len();

        // Flap 2/10 <-> 3/10 every 5s for one window
        for step in 0..12 {
            clock.advance(Duration::from_secs(5));
            let unhealthy = if step % 2 == 0 { 2 } else { 3 };
            manager.evaluate(&report(10, unhealthy));
        }

        assert_eq!(manager.transitions().len(), before);
        assert_eq!(manager.current_level(), DegradationLevel::Moderate);
    }

    #[tokio::test]
    async fn test_transition_event_carries_contributors() {
        let (manager, _, events) = manager(Duration::ZERO);
        let mut rx = events.subscribe();

        manager.evaluate(&report(10, 3));

        match rx.recv().await.unwrap() {
            HealthEvent::DegradationStatusChanged(change) => {
                assert_eq!(change.previous, DegradationLevel::None);
                assert_eq!(change.current, DegradationLevel::Moderate);
                assert_eq!(change.contributing_checks, vec!["check-0", "check-1", "check-2"]);
                assert!(change.reason.contains("moderate"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_feature_gating() {
        let (manager, _, _) = manager(Duration::ZERO);
        manager.set_feature("recommendations", DegradationLevel::Moderate);

        manager.evaluate(&report(10, 2));
        assert!(manager.is_feature_enabled("recommendations"));
        assert!(manager.is_feature_enabled("checkout"));

        manager.evaluate(&report(10, 3));
        assert!(!manager.is_feature_enabled("recommendations"));
        assert!(manager.is_feature_enabled("checkout"));

        manager.evaluate(&report(10, 10));
        assert!(!manager.is_feature_enabled("checkout"));
    }

    #[test]
    fn test_force_level() {
        let (manager, _, _) = manager(Duration::from_secs(60));

        manager.force_level(DegradationLevel::Severe, "maintenance");
        assert_eq!(manager.current_level(), DegradationLevel::Severe);

        let last = manager.transitions().pop().unwrap();
        assert_eq!(last.reason, "forced: maintenance");
    }

    proptest! {
        #[test]
        fn prop_level_is_monotonic_in_ratio(a in 0.0f64..=1.0, b in 0.0f64..=1.0) {
            let thresholds = DegradationThresholds::default();
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(thresholds.level_for(low) <= thresholds.level_for(high));
        }
    }
}
