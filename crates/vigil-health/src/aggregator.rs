//! Aggregation of individual results into a system-wide report.
//!
//! Report construction is a pure function of a snapshot of the latest
//! results; no lock is held while a report is consumed.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;
use vigil_types::{CheckCategory, HealthStatus, ReportId};

use crate::check::HealthCheckResult;
use crate::events::{EventBus, HealthEvent};

/// Latest result of one check together with the definition fields the
/// aggregation needs.
#[derive(Debug, Clone)]
pub struct CheckSnapshot {
    pub result: HealthCheckResult,
    pub category: CheckCategory,
    pub non_critical: bool,
}

/// Counts for one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySummary {
    pub category: CheckCategory,
    pub total: usize,
    pub healthy: usize,
    pub degraded: usize,
    /// Unhealthy, critical or offline.
    pub unhealthy: usize,
    pub unknown: usize,
    /// Worst status in the category.
    pub status: HealthStatus,
    pub unhealthy_ratio: f64,
}

impl CategorySummary {
    fn new(category: CheckCategory) -> Self {
        Self {
            category,
            total: 0,
            healthy: 0,
            degraded: 0,
            unhealthy: 0,
            unknown: 0,
            status: HealthStatus::Unknown,
            unhealthy_ratio: 0.0,
        }
    }

    fn add(&mut self, status: HealthStatus) {
        if self.total == 0 {
            self.status = status;
        } else {
            self.status = self.status.max(status);
        }
        self.total += 1;
        match status {
            HealthStatus::Healthy => self.healthy += 1,
            HealthStatus::Degraded => self.degraded += 1,
            HealthStatus::Unknown => self.unknown += 1,
            _ => self.unhealthy += 1,
        }
        self.unhealthy_ratio = self.unhealthy as f64 / self.total as f64;
    }
}

/// System-wide health report. Built fresh per aggregation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub id: ReportId,
    pub timestamp: DateTime<Utc>,
    pub overall_status: HealthStatus,
    pub total_duration: Duration,
    pub results: HashMap<String, HealthCheckResult>,
    pub healthy_count: usize,
    pub degraded_count: usize,
    /// Unhealthy, critical or offline.
    pub unhealthy_count: usize,
    pub unknown_count: usize,
    /// One entry per category present, sorted by category name.
    pub categories: Vec<CategorySummary>,
    /// Failing checks that are not marked non-critical, sorted.
    pub critical_failures: Vec<String>,
}

impl HealthReport {
    /// Build a report from the latest result of each check.
    ///
    /// An empty snapshot yields `Unknown`.
    pub fn from_snapshots(
        snapshots: impl IntoIterator<Item = CheckSnapshot>,
        total_duration: Duration,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let mut report = Self {
            id: ReportId::generate(),
            timestamp,
            overall_status: HealthStatus::Unknown,
            total_duration,
            results: HashMap::new(),
            healthy_count: 0,
            degraded_count: 0,
            unhealthy_count: 0,
            unknown_count: 0,
            categories: Vec::new(),
            critical_failures: Vec::new(),
        };
        let mut categories: HashMap<CheckCategory, CategorySummary> = HashMap::new();

        for snapshot in snapshots {
            let status = snapshot.result.status;
            match status {
                HealthStatus::Healthy => report.healthy_count += 1,
                HealthStatus::Degraded => report.degraded_count += 1,
                HealthStatus::Unknown => report.unknown_count += 1,
                _ => report.unhealthy_count += 1,
            }
            if status.is_failure() && !snapshot.non_critical {
                report.critical_failures.push(snapshot.result.check_name.clone());
            }

            categories
                .entry(snapshot.category.clone())
                .or_insert_with(|| CategorySummary::new(snapshot.category))
                .add(status);
            report
                .results
                .insert(snapshot.result.check_name.clone(), snapshot.result);
        }

        report.overall_status = HealthStatus::worst(report.results.values().map(|r| r.status))
            .unwrap_or(HealthStatus::Unknown);
        report.critical_failures.sort();
        report.categories = categories.into_values().collect();
        report
            .categories
            .sort_by_key(|summary| summary.category.to_string());
        report
    }

    /// Number of results in the report.
    pub fn total_checks(&self) -> usize {
        self.results.len()
    }

    /// Failing checks over all checks, 0 when there are none.
    pub fn unhealthy_ratio(&self) -> f64 {
        if self.results.is_empty() {
            0.0
        } else {
            self.unhealthy_count as f64 / self.results.len() as f64
        }
    }

    /// Names of failing checks, sorted.
    pub fn failing_checks(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .results
            .values()
            .filter(|r| r.status.is_failure())
            .map(|r| r.check_name.clone())
            .collect();
        names.sort();
        names
    }

    /// Breakdown for one category, if any check belongs to it.
    pub fn category(&self, category: &CheckCategory) -> Option<&CategorySummary> {
        self.categories.iter().find(|c| &c.category == category)
    }

    /// Worst status within a category, `Unknown` when it has no checks.
    pub fn status_for(&self, category: &CheckCategory) -> HealthStatus {
        self.category(category)
            .map(|c| c.status)
            .unwrap_or(HealthStatus::Unknown)
    }

    /// Did any check not marked non-critical fail?
    pub fn has_critical_failures(&self) -> bool {
        !self.critical_failures.is_empty()
    }
}

/// Tracks the last published overall status and emits
/// `HealthStatusChanged` only on edges.
pub struct Aggregator {
    last_emitted: Mutex<HealthStatus>,
    events: EventBus,
}

impl Aggregator {
    /// Create an aggregator whose baseline is `Unknown`.
    pub fn new(events: EventBus) -> Self {
        Self {
            last_emitted: Mutex::new(HealthStatus::Unknown),
            events,
        }
    }

    /// Record a freshly built report. Returns true when the overall
    /// status changed and an event was published.
    pub fn observe(&self, report: &HealthReport) -> bool {
        let previous = {
            let mut last = self.last_emitted.lock();
            if *last == report.overall_status {
                return false;
            }
            std::mem::replace(&mut *last, report.overall_status)
        };

        info!(
            previous = %previous,
            current = %report.overall_status,
            severity = report.overall_status.severity(),
            report = %report.id,
            "Overall health status changed"
        );
        self.events.publish(HealthEvent::HealthStatusChanged {
            previous,
            current: report.overall_status,
            report_id: report.id,
            at: report.timestamp,
        });
        true
    }

    /// Last status an event was published for.
    pub fn last_emitted(&self) -> HealthStatus {
        *self.last_emitted.lock()
    }
}
