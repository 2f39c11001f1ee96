//! Check categories used for grouping and per-category reporting

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category a health check belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CheckCategory {
    /// Host-level resources (memory, disk, CPU)
    System,

    /// Databases and storage backends
    Database,

    /// Network reachability and remote services
    Network,

    /// Latency and throughput budgets
    Performance,

    /// Certificates, credentials, policy engines
    Security,

    /// Application-defined category
    Custom(String),

    /// No category given
    #[default]
    General,
}

impl CheckCategory {
    pub fn custom(name: impl Into<String>) -> Self {
        CheckCategory::Custom(name.into())
    }
}

impl fmt::Display for CheckCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckCategory::System => write!(f, "system"),
            CheckCategory::Database => write!(f, "database"),
            CheckCategory::Network => write!(f, "network"),
            CheckCategory::Performance => write!(f, "performance"),
            CheckCategory::Security => write!(f, "security"),
            CheckCategory::Custom(name) => write!(f, "custom:{}", name),
            CheckCategory::General => write!(f, "general"),
        }
    }
}
