//! Health status of a check or of the whole system
//!
//! Variants are declared in severity order so the derived `Ord` ranks
//! them from best to worst. `Unknown` sits above `Degraded`: absence of
//! information is never treated as partial health.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Verdict produced by a health check or computed by aggregation
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub enum HealthStatus {
    /// Component is fully operational
    Healthy,

    /// Component works with reduced capability
    Degraded,

    /// No usable information about the component
    #[default]
    Unknown,

    /// Component is failing
    Unhealthy,

    /// Component is failing and affects core functionality
    Critical,

    /// Component is unreachable or shut down
    Offline,
}

impl HealthStatus {
    /// All statuses from best to worst.
    pub const ALL: [HealthStatus; 6] = [
        HealthStatus::Healthy,
        HealthStatus::Degraded,
        HealthStatus::Unknown,
        HealthStatus::Unhealthy,
        HealthStatus::Critical,
        HealthStatus::Offline,
    ];

    /// Numeric severity, 0 for `Healthy` up to 5 for `Offline`.
    pub fn severity(&self) -> u8 {
        *self as u8
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    /// Does this status count as a failure for degradation and alerting?
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            HealthStatus::Unhealthy | HealthStatus::Critical | HealthStatus::Offline
        )
    }

    /// Worst status in the iterator, `None` when it is empty.
    pub fn worst<I>(statuses: I) -> Option<HealthStatus>
    where
        I: IntoIterator<Item = HealthStatus>,
    {
        statuses.into_iter().max()
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unknown => write!(f, "unknown"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Critical => write!(f, "critical"),
            HealthStatus::Offline => write!(f, "offline"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_severity_ordering() {
        assert!(HealthStatus::Healthy < HealthStatus::Degraded);
        assert!(HealthStatus::Degraded < HealthStatus::Unknown);
        assert!(HealthStatus::Unknown < HealthStatus::Unhealthy);
        assert!(HealthStatus::Unhealthy < HealthStatus::Critical);
        assert!(HealthStatus::Critical < HealthStatus::Offline);
    }

    #[test]
    fn test_worst() {
        assert_eq!(
            HealthStatus::worst([HealthStatus::Healthy, HealthStatus::Degraded]),
            Some(HealthStatus::Degraded)
        );
        assert_eq!(
            HealthStatus::worst([HealthStatus::Degraded, HealthStatus::Unhealthy]),
            Some(HealthStatus::Unhealthy)
        );
        assert_eq!(HealthStatus::worst(Vec::new()), None);
    }

    #[test]
    fn test_failure_classification() {
        assert!(!HealthStatus::Degraded.is_failure());
        assert!(!HealthStatus::Unknown.is_failure());
        assert!(HealthStatus::Unhealthy.is_failure());
        assert!(HealthStatus::Offline.is_failure());
    }

    #[test]
    fn test_serde_uses_variant_names() {
        let json = serde_json::to_string(&HealthStatus::Critical).unwrap();
        assert_eq!(json, "\"Critical\"");
    }

    fn status_strategy() -> impl Strategy<Value = HealthStatus> {
        (0usize..HealthStatus::ALL.len()).prop_map(|i| HealthStatus::ALL[i])
    }

    proptest! {
        #[test]
        fn property_worst_dominates_every_member(
            statuses in proptest::collection::vec(status_strategy(), 1..20)
        ) {
            let worst = HealthStatus::worst(statuses.iter().copied()).unwrap();
            prop_assert!(statuses.contains(&worst));
            for status in &statuses {
                prop_assert!(status.severity() <= worst.severity());
            }
        }
    }
}
