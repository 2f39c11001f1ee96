//! Health monitoring configuration.
//!
//! Defines configuration for scheduling, check execution, circuit
//! breakers, degradation thresholds and history retention. Configuration
//! is plain data: build it (directly, from a profile, or through
//! [`HealthConfigBuilder`]), validate it, then hand it to the service.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vigil_types::{DegradationLevel, DeploymentProfile};

use crate::error::{HealthError, HealthResult};

/// Configuration for the health core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Automatic check scheduling.
    pub scheduler: SchedulerConfig,

    /// Check execution defaults.
    pub executor: ExecutorConfig,

    /// Default circuit breaker configuration.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Degradation thresholds and feature gates.
    pub degradation: DegradationConfig,

    /// History retention.
    pub history: HistoryConfig,

    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            executor: ExecutorConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            degradation: DegradationConfig::default(),
            history: HistoryConfig::default(),
            event_capacity: 1024,
        }
    }
}

impl HealthConfig {
    /// Create config tuned for a deployment profile.
    pub fn for_profile(profile: DeploymentProfile) -> Self {
        let mut config = Self::default();
        config.executor.default_timeout = profile.default_check_timeout();

        if profile.prefers_stability() {
            // Slow recovery, patient breakers
            config.degradation.recovery_hysteresis = Duration::from_secs(120);
            config.circuit_breaker.open_timeout = Duration::from_secs(60);
        }

        match profile {
            DeploymentProfile::Production => {}
            DeploymentProfile::Development => {
                config.scheduler.tick_interval = Duration::from_secs(5);
                config.degradation.recovery_hysteresis = Duration::from_secs(10);
                config.circuit_breaker.open_timeout = Duration::from_secs(10);
                config.executor.max_retries = 0;
            }
            DeploymentProfile::Testing => {
                config.scheduler.tick_interval = Duration::from_millis(50);
                config.executor.default_interval = Duration::from_millis(50);
                config.executor.max_retries = 0;
                config.executor.retry_delay = Duration::from_millis(10);
                config.degradation.recovery_hysteresis = Duration::ZERO;
                config.circuit_breaker.open_timeout = Duration::from_millis(100);
                config.history.capacity = 20;
            }
        }

        config
    }

    /// Start a builder from the default configuration.
    pub fn builder() -> HealthConfigBuilder {
        HealthConfigBuilder::new()
    }

    /// Check every section for out-of-range values.
    pub fn validate(&self) -> HealthResult<()> {
        self.scheduler.validate()?;
        self.executor.validate()?;
        self.circuit_breaker.validate()?;
        self.degradation.validate()?;
        self.history.validate()?;

        if self.event_capacity == 0 {
            return Err(HealthError::ConfigurationError(
                "event_capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often the loop looks for due checks.
    pub tick_interval: Duration,

    /// Maximum number of checks executing at once.
    pub max_concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(10),
            max_concurrency: 5,
        }
    }
}

impl SchedulerConfig {
    fn validate(&self) -> HealthResult<()> {
        if self.tick_interval.is_zero() {
            return Err(HealthError::ConfigurationError(
                "scheduler.tick_interval must be non-zero".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(HealthError::ConfigurationError(
                "scheduler.max_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Check execution defaults, applied when a definition leaves them unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Timeout for a single attempt.
    pub default_timeout: Duration,

    /// Interval between scheduled runs.
    pub default_interval: Duration,

    /// Extra attempts after a failed or timed-out attempt.
    pub max_retries: u32,

    /// Delay between attempts.
    pub retry_delay: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            default_interval: Duration::from_secs(60),
            max_retries: 1,
            retry_delay: Duration::from_millis(250),
        }
    }
}

impl ExecutorConfig {
    fn validate(&self) -> HealthResult<()> {
        if self.default_timeout.is_zero() {
            return Err(HealthError::ConfigurationError(
                "executor.default_timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Consecutive half-open successes that close the circuit.
    pub success_threshold: u32,

    /// Time to wait before transitioning from open to half-open.
    pub open_timeout: Duration,

    /// Maximum concurrent probe requests in half-open.
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(30),
            half_open_max_requests: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> HealthResult<()> {
        if self.failure_threshold == 0 {
            return Err(HealthError::ConfigurationError(
                "circuit_breaker.failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.success_threshold == 0 {
            return Err(HealthError::ConfigurationError(
                "circuit_breaker.success_threshold must be at least 1".to_string(),
            ));
        }
        if self.half_open_max_requests == 0 {
            return Err(HealthError::ConfigurationError(
                "circuit_breaker.half_open_max_requests must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Unhealthy-ratio thresholds for each degradation level.
///
/// Invariant: `0 <= minor <= moderate <= severe <= disable <= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DegradationThresholds {
    pub minor: f64,
    pub moderate: f64,
    pub severe: f64,
    pub disable: f64,
}

impl Default for DegradationThresholds {
    fn default() -> Self {
        Self {
            minor: 0.10,
            moderate: 0.25,
            severe: 0.50,
            disable: 0.75,
        }
    }
}

impl DegradationThresholds {
    /// Highest level whose threshold `ratio` strictly exceeds.
    ///
    /// A ratio sitting exactly on a boundary stays at the lower level, so
    /// one failing check out of ten with `minor = 0.10` is still `None`.
    /// A threshold of `1.0` cannot be exceeded, so it is reached once every
    /// check is failing.
    pub fn level_for(&self, ratio: f64) -> DegradationLevel {
        let reached = |threshold: f64| ratio > threshold || (ratio >= 1.0 && threshold >= 1.0);

        if reached(self.disable) {
            DegradationLevel::Disabled
        } else if reached(self.severe) {
            DegradationLevel::Severe
        } else if reached(self.moderate) {
            DegradationLevel::Moderate
        } else if reached(self.minor) {
            DegradationLevel::Minor
        } else {
            DegradationLevel::None
        }
    }

    /// Threshold that activates `level`, `0.0` for `None`.
    pub fn threshold_of(&self, level: DegradationLevel) -> f64 {
        match level {
            DegradationLevel::None => 0.0,
            DegradationLevel::Minor => self.minor,
            DegradationLevel::Moderate => self.moderate,
            DegradationLevel::Severe => self.severe,
            DegradationLevel::Disabled => self.disable,
        }
    }

    pub fn validate(&self) -> HealthResult<()> {
        let ordered = [0.0, self.minor, self.moderate, self.severe, self.disable, 1.0];
        let in_order = ordered.windows(2).all(|pair| pair[0] <= pair[1]);
        let finite = ordered.iter().all(|value| value.is_finite());

        if !in_order || !finite {
            return Err(HealthError::ConfigurationError(format!(
                "degradation thresholds must satisfy 0 <= minor <= moderate <= severe <= disable <= 1, got {}/{}/{}/{}",
                self.minor, self.moderate, self.severe, self.disable
            )));
        }
        Ok(())
    }
}

/// Degradation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradationConfig {
    /// Ratio thresholds.
    pub thresholds: DegradationThresholds,

    /// How long a lower ratio must hold before the level is lowered.
    pub recovery_hysteresis: Duration,

    /// Feature name to the level at which it is switched off.
    pub features: HashMap<String, DegradationLevel>,

    /// Number of level transitions kept for reporting.
    pub transition_log_capacity: usize,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            thresholds: DegradationThresholds::default(),
            recovery_hysteresis: Duration::from_secs(30),
            features: HashMap::new(),
            transition_log_capacity: 100,
        }
    }
}

impl DegradationConfig {
    fn validate(&self) -> HealthResult<()> {
        self.thresholds.validate()
    }
}

/// History retention configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Results kept per check.
    pub capacity: usize,

    /// Results older than this are evicted.
    pub max_age: Duration,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            max_age: Duration::from_secs(3600),
        }
    }
}

impl HistoryConfig {
    fn validate(&self) -> HealthResult<()> {
        if self.capacity == 0 {
            return Err(HealthError::ConfigurationError(
                "history.capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder producing a validated [`HealthConfig`].
#[derive(Debug, Clone, Default)]
pub struct HealthConfigBuilder {
    config: HealthConfig,
}

impl HealthConfigBuilder {
    /// Start from the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a profile preset instead of the defaults.
    pub fn from_profile(profile: DeploymentProfile) -> Self {
        Self {
            config: HealthConfig::for_profile(profile),
        }
    }

    /// How often the scheduler looks for due checks.
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.scheduler.tick_interval = interval;
        self
    }

    /// Maximum checks executing at once.
    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.config.scheduler.max_concurrency = max;
        self
    }

    /// Per-attempt timeout for checks that set none.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.config.executor.default_timeout = timeout;
        self
    }

    /// Run interval for checks that set none.
    pub fn default_interval(mut self, interval: Duration) -> Self {
        self.config.executor.default_interval = interval;
        self
    }

    /// Extra attempts and the delay between them.
    pub fn retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.config.executor.max_retries = max_retries;
        self.config.executor.retry_delay = retry_delay;
        self
    }

    /// Default config for new circuit breakers.
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.config.circuit_breaker = config;
        self
    }

    /// Unhealthy-ratio thresholds for each degradation level.
    pub fn thresholds(mut self, thresholds: DegradationThresholds) -> Self {
        self.config.degradation.thresholds = thresholds;
        self
    }

    /// How long a lower ratio must hold before the level drops.
    pub fn recovery_hysteresis(mut self, window: Duration) -> Self {
        self.config.degradation.recovery_hysteresis = window;
        self
    }

    /// Gate a feature: it is disabled once the level reaches `disabled_at`.
    pub fn feature(mut self, name: impl Into<String>, disabled_at: DegradationLevel) -> Self {
        self.config.degradation.features.insert(name.into(), disabled_at);
        self
    }

    /// Per-check history retention.
    pub fn history(mut self, capacity: usize, max_age: Duration) -> Self {
        self.config.history = HistoryConfig { capacity, max_age };
        self
    }

    /// Buffer size of the event channel.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> HealthResult<HealthConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
