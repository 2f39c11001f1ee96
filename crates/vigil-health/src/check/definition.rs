//! Health check definitions.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vigil_types::CheckCategory;

use crate::config::ExecutorConfig;
use crate::error::{HealthError, HealthResult};

/// Registration-time description of a health check.
///
/// Immutable once registered except for `enabled`, which the service
/// toggles through `set_check_enabled`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckDefinition {
    /// Unique check name.
    pub name: String,

    /// Category used for per-category reporting.
    pub category: CheckCategory,

    /// Optional human-readable description.
    pub description: Option<String>,

    /// Per-attempt timeout; falls back to the executor default.
    pub timeout: Option<Duration>,

    /// Scheduling interval; falls back to the executor default.
    pub interval: Option<Duration>,

    /// Whether the scheduler runs this check.
    pub enabled: bool,

    /// Checks that must last have been healthy before this one runs.
    pub dependencies: Vec<String>,

    /// Excluded from critical-failure detection.
    pub non_critical: bool,

    /// Explicit circuit breaker operation to run through.
    pub circuit_breaker: Option<String>,

    /// Bind a breaker named after the check when no explicit one is given.
    pub use_circuit_breaker: bool,

    /// Retry override; falls back to the executor default.
    pub max_retries: Option<u32>,

    /// Free-form tags.
    pub tags: Vec<String>,

    /// Opaque metadata.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl HealthCheckDefinition {
    /// Create an enabled definition with defaults for everything else.
    pub fn new(name: impl Into<String>, category: CheckCategory) -> Self {
        Self {
            name: name.into(),
            category,
            description: None,
            timeout: None,
            interval: None,
            enabled: true,
            dependencies: Vec::new(),
            non_critical: false,
            circuit_breaker: None,
            use_circuit_breaker: false,
            max_retries: None,
            tags: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Override the executor's default timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Override the executor's default interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Override the executor's default retry count.
    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Register the check disabled.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Only run once `dependency` last reported `Healthy`.
    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    /// Leave this check's failures out of critical failures.
    pub fn non_critical(mut self) -> Self {
        self.non_critical = true;
        self
    }

    /// Run through the breaker for `operation`.
    pub fn with_circuit_breaker(mut self, operation: impl Into<String>) -> Self {
        self.circuit_breaker = Some(operation.into());
        self
    }

    /// Run through a breaker named after this check.
    pub fn with_own_circuit_breaker(mut self) -> Self {
        self.use_circuit_breaker = true;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Name of the breaker guarding this check, if any.
    pub fn breaker_name(&self) -> Option<&str> {
        match &self.circuit_breaker {
            Some(operation) => Some(operation.as_str()),
            None if self.use_circuit_breaker => Some(self.name.as_str()),
            None => None,
        }
    }

    pub fn effective_timeout(&self, defaults: &ExecutorConfig) -> Duration {
        self.timeout.unwrap_or(defaults.default_timeout)
    }

    pub fn effective_interval(&self, defaults: &ExecutorConfig) -> Duration {
        self.interval.unwrap_or(defaults.default_interval)
    }

    pub fn effective_retries(&self, defaults: &ExecutorConfig) -> u32 {
        self.max_retries.unwrap_or(defaults.max_retries)
    }

    /// Reject definitions that could never run correctly.
    pub fn validate(&self) -> HealthResult<()> {
        let invalid = |reason: &str| HealthError::InvalidDefinition {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(invalid("timeout must be non-zero"));
        }
        if self.interval.is_some_and(|i| i.is_zero()) {
            return Err(invalid("interval must be non-zero"));
        }
        if self.dependencies.iter().any(|dep| dep == &self.name) {
            return Err(invalid("check cannot depend on itself"));
        }
        if self
            .circuit_breaker
            .as_deref()
            .is_some_and(|op| op.trim().is_empty())
        {
            return Err(invalid("circuit breaker operation must not be empty"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breaker_binding() {
        let plain = HealthCheckDefinition::new("db", CheckCategory::Database);
        assert_eq!(plain.breaker_name(), None);

        let own = plain.clone().with_own_circuit_breaker();
        assert_eq!(own.breaker_name(), Some("db"));

        let tagged = own.with_circuit_breaker("db-pool");
        assert_eq!(tagged.breaker_name(), Some("db-pool"));
    }

    #[test]
    fn test_effective_settings() {
        let defaults = ExecutorConfig::default();
        let def = HealthCheckDefinition::new("net", CheckCategory::Network)
            .with_timeout(Duration::from_secs(2));

        assert_eq!(def.effective_timeout(&defaults), Duration::from_secs(2));
        assert_eq!(def.effective_interval(&defaults), defaults.default_interval);
        assert_eq!(def.effective_retries(&defaults), defaults.max_retries);
    }

    #[test]
    fn test_validation() {
        assert!(HealthCheckDefinition::new("ok", CheckCategory::System)
            .validate()
            .is_ok());

        assert!(HealthCheckDefinition::new("  ", CheckCategory::System)
            .validate()
            .is_err());

        assert!(HealthCheckDefinition::new("loop", CheckCategory::System)
            .depends_on("loop")
            .validate()
            .is_err());

        assert!(HealthCheckDefinition::new("fast", CheckCategory::System)
            .with_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }
}
