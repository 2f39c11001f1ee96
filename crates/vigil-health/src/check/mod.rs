//! Health checks.
//!
//! A health check is any type implementing [`HealthCheck`]: given a
//! [`CheckContext`] it reports a [`CheckOutcome`] or fails with a
//! [`CheckError`]. Checks are registered together with a
//! [`HealthCheckDefinition`] carrying their scheduling and resilience
//! settings, and every execution produces an immutable
//! [`HealthCheckResult`].

mod custom;
mod definition;
mod result;

pub use custom::{check_fn, FnCheck, StaticCheck};
pub use definition::HealthCheckDefinition;
pub use result::{ExecutionOutcome, HealthCheckResult};

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use vigil_types::HealthStatus;

use crate::error::CheckError;

/// Trait for health checks.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Evaluate the component.
    ///
    /// Implementations doing I/O should watch `ctx.cancellation()` and
    /// return [`CheckError::Cancelled`] once it fires.
    async fn check(&self, ctx: CheckContext) -> Result<CheckOutcome, CheckError>;

    /// Short description for diagnostics.
    fn description(&self) -> &str {
        "health check"
    }
}

/// Context handed to a check body for one attempt.
#[derive(Debug, Clone)]
pub struct CheckContext {
    check_name: String,
    attempt: u32,
    cancellation: CancellationToken,
}

impl CheckContext {
    /// Context for one attempt of a check.
    pub fn new(check_name: impl Into<String>, attempt: u32, cancellation: CancellationToken) -> Self {
        Self {
            check_name: check_name.into(),
            attempt,
            cancellation,
        }
    }

    pub fn check_name(&self) -> &str {
        &self.check_name
    }

    /// 1-based attempt number within a single execution.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Fires when the caller cancels or the attempt times out.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// What a check body reports when it completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub status: HealthStatus,
    pub message: String,
    pub data: HashMap<String, serde_json::Value>,
}

impl CheckOutcome {
    pub fn new(status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            data: HashMap::new(),
        }
    }

    pub fn healthy(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Healthy, message)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Degraded, message)
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Unhealthy, message)
    }

    /// Attach a structured data point.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}
