//! Error types for vigil-health crate.
//!
//! [`HealthError`] covers programming errors at the public API boundary.
//! Nothing that happens inside a check body surfaces as a `HealthError`;
//! those failures are captured into the check's result instead.

use thiserror::Error;

/// Errors returned by the public health API.
#[derive(Debug, Error)]
pub enum HealthError {
    /// A check with this name is already registered.
    #[error("health check already registered: {0}")]
    CheckAlreadyRegistered(String),

    /// No check with this name is registered.
    #[error("health check not found: {0}")]
    CheckNotFound(String),

    /// The check definition is malformed.
    #[error("invalid health check definition '{name}': {reason}")]
    InvalidDefinition { name: String, reason: String },

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigurationError(String),
}

/// Result type for health operations.
pub type HealthResult<T> = Result<T, HealthError>;

/// Errors a health check body may return.
#[derive(Debug, Error)]
pub enum CheckError {
    /// The check ran and determined the component is failing.
    #[error("{0}")]
    Failed(String),

    /// The check observed its cancellation signal and gave up.
    #[error("check cancelled")]
    Cancelled,

    /// Any other error raised by the component under test.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl CheckError {
    /// Create a failure with a message.
    pub fn failed(message: impl Into<String>) -> Self {
        CheckError::Failed(message.into())
    }

    /// Wrap an arbitrary error.
    pub fn other<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        CheckError::Other(Box::new(error))
    }

    /// Is this a cancellation rather than a genuine failure?
    pub fn is_cancellation(&self) -> bool {
        matches!(self, CheckError::Cancelled)
    }
}
