//! Deployment profiles for preset tuning
//!
//! - Production: conservative thresholds, longer hysteresis
//! - Development: relaxed thresholds, fast feedback
//! - Testing: tight timings so suites run quickly

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment the health core is deployed into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DeploymentProfile {
    #[default]
    Production,
    Development,
    Testing,
}

impl DeploymentProfile {
    /// Default per-check timeout for this profile
    pub fn default_check_timeout(&self) -> Duration {
        match self {
            DeploymentProfile::Production => Duration::from_secs(30),
            DeploymentProfile::Development => Duration::from_secs(10),
            DeploymentProfile::Testing => Duration::from_millis(500),
        }
    }

    /// Does this profile favour stability over fast feedback?
    pub fn prefers_stability(&self) -> bool {
        matches!(self, DeploymentProfile::Production)
    }
}
