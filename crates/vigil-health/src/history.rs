//! Bounded result history and rolling statistics.
//!
//! Each check owns a slice guarded by its own lock, so concurrent writers
//! for different checks never contend. The store is the only writer of
//! history data.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use vigil_types::{DegradationLevel, HealthStatus};

use crate::check::{ExecutionOutcome, HealthCheckResult};
use crate::clock::{elapsed_between, SharedClock};
use crate::config::HistoryConfig;

/// One stored result.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    /// Store-wide insertion sequence number.
    pub sequence: u64,
    pub result: Arc<HealthCheckResult>,
}

/// Rolling counters for one check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckStatistics {
    pub executions: u64,
    pub successes: u64,
    pub degraded: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub cancellations: u64,
    pub circuit_rejections: u64,
    pub dependency_skips: u64,
    pub total_duration: Duration,
    pub min_duration: Option<Duration>,
    pub max_duration: Option<Duration>,
    pub consecutive_failures: u32,
    pub last_status: Option<HealthStatus>,
    pub last_run: Option<DateTime<Utc>>,
}

impl CheckStatistics {
    fn record(&mut self, result: &HealthCheckResult) {
        self.executions += 1;
        self.total_duration += result.duration;
        self.min_duration = Some(
            self.min_duration
                .map_or(result.duration, |d| d.min(result.duration)),
        );
        self.max_duration = Some(
            self.max_duration
                .map_or(result.duration, |d| d.max(result.duration)),
        );

        match result.status {
            HealthStatus::Healthy => self.successes += 1,
            HealthStatus::Degraded => self.degraded += 1,
            status if status.is_failure() => self.failures += 1,
            _ => {}
        }

        match result.outcome {
            ExecutionOutcome::TimedOut => self.timeouts += 1,
            ExecutionOutcome::Cancelled => self.cancellations += 1,
            ExecutionOutcome::CircuitOpen => self.circuit_rejections += 1,
            ExecutionOutcome::DependencyUnhealthy => self.dependency_skips += 1,
            ExecutionOutcome::Completed | ExecutionOutcome::Failed => {}
        }

        if result.status.is_failure() {
            self.consecutive_failures += 1;
        } else if result.status.is_healthy() {
            self.consecutive_failures = 0;
        }

        self.last_status = Some(result.status);
        self.last_run = Some(result.timestamp);
    }

    /// Mean execution time, zero before the first execution.
    pub fn average_duration(&self) -> Duration {
        if self.executions == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total_duration.as_nanos() / self.executions as u128;
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Fraction of executions that were healthy.
    pub fn success_rate(&self) -> f64 {
        if self.executions == 0 {
            return 0.0;
        }
        self.successes as f64 / self.executions as f64
    }
}

/// System-wide statistics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statistics {
    pub total_executions: u64,
    pub total_failures: u64,
    pub total_timeouts: u64,
    pub total_duration: Duration,
    pub average_duration: Duration,
    pub registered_checks: usize,
    pub enabled_checks: usize,
    pub overall_status: HealthStatus,
    pub degradation_level: DegradationLevel,
    pub open_circuit_breakers: usize,
    pub scheduler_running: bool,
    /// Completed aggregation passes.
    pub report_count: u64,
    pub per_check: HashMap<String, CheckStatistics>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct CheckHistory {
    entries: VecDeque<HistoryEntry>,

    /// Survives eviction so dependency gating still sees the last verdict.
    last: Option<Arc<HealthCheckResult>>,

    stats: CheckStatistics,
}

/// Per-check ring buffers plus rolling counters.
pub struct HistoryStore {
    config: HistoryConfig,
    slices: DashMap<String, Arc<Mutex<CheckHistory>>>,
    sequence: AtomicU64,
    clock: SharedClock,
}

impl HistoryStore {
    /// Create an empty store.
    pub fn new(config: HistoryConfig, clock: SharedClock) -> Self {
        Self {
            config,
            slices: DashMap::new(),
            sequence: AtomicU64::new(0),
            clock,
        }
    }

    fn slice(&self, name: &str) -> Arc<Mutex<CheckHistory>> {
        if let Some(slice) = self.slices.get(name) {
            return slice.clone();
        }
        self.slices
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    fn existing(&self, name: &str) -> Option<Arc<Mutex<CheckHistory>>> {
        self.slices.get(name).map(|s| s.clone())
    }

    /// Store a result and return its sequence number.
    pub fn record(&self, result: HealthCheckResult) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let slice = self.slice(&result.check_name);
        let now = self.clock.now();

        let mut history = slice.lock();
        let result = Arc::new(result);
        history.stats.record(&result);
        history.last = Some(result.clone());
        history.entries.push_back(HistoryEntry { sequence, result });

        while history.entries.len() > self.config.capacity {
            history.entries.pop_front();
        }
        self.evict_expired(&mut history, now);

        sequence
    }

    fn evict_expired(&self, history: &mut CheckHistory, now: DateTime<Utc>) {
        while let Some(front) = history.entries.front() {
            if elapsed_between(front.result.timestamp, now) > self.config.max_age {
                history.entries.pop_front();
            } else {
                break;
            }
        }
    }

    /// Up to `max_results` results, most recent first.
    pub fn history(&self, name: &str, max_results: usize) -> Vec<HealthCheckResult> {
        let Some(slice) = self.existing(name) else {
            return Vec::new();
        };
        let now = self.clock.now();

        let mut history = slice.lock();
        self.evict_expired(&mut history, now);
        history
            .entries
            .iter()
            .rev()
            .take(max_results)
            .map(|entry| entry.result.as_ref().clone())
            .collect()
    }

    /// Stored entries, oldest first.
    pub fn entries(&self, name: &str) -> Vec<HistoryEntry> {
        self.existing(name)
            .map(|slice| slice.lock().entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Most recent result, even if it has aged out of the buffer.
    pub fn latest(&self, name: &str) -> Option<HealthCheckResult> {
        self.existing(name)
            .and_then(|slice| slice.lock().last.as_deref().cloned())
    }

    /// Status of the latest result for a check.
    pub fn last_status(&self, name: &str) -> Option<HealthStatus> {
        self.existing(name)
            .and_then(|slice| slice.lock().last.as_ref().map(|r| r.status))
    }

    /// Rolling counters for one check.
    pub fn statistics(&self, name: &str) -> Option<CheckStatistics> {
        self.existing(name).map(|slice| slice.lock().stats.clone())
    }

    /// Rolling counters for every check with history.
    pub fn all_statistics(&self) -> HashMap<String, CheckStatistics> {
        let slices: Vec<(String, Arc<Mutex<CheckHistory>>)> = self
            .slices
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();

        slices
            .into_iter()
            .map(|(name, slice)| {
                let stats = slice.lock().stats.clone();
                (name, stats)
            })
            .collect()
    }

    /// Evict aged entries across every check.
    pub fn prune_expired(&self) {
        let now = self.clock.now();
        let slices: Vec<Arc<Mutex<CheckHistory>>> =
            self.slices.iter().map(|r| r.value().clone()).collect();
        for slice in slices {
            self.evict_expired(&mut slice.lock(), now);
        }
    }

    /// Forget a check entirely.
    pub fn remove(&self, name: &str) {
        self.slices.remove(name);
    }

    /// Drop every slice.
    pub fn clear(&self) {
        self.slices.clear();
    }
}
