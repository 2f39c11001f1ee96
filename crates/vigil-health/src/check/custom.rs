//! Checks built from closures or fixed answers.
//!
//! Most applications only need [`check_fn`]; [`StaticCheck`] is handy
//! for wiring tests and for placeholders while a real check is written.

use std::future::Future;

use async_trait::async_trait;
use vigil_types::HealthStatus;

use super::{CheckContext, CheckOutcome, HealthCheck};
use crate::error::CheckError;

/// Check implementation backed by an async closure.
pub struct FnCheck<F> {
    check_fn: F,
}

/// Create a check from an async closure.
///
/// ```rust
/// use vigil_health::check::{check_fn, CheckOutcome};
///
/// let check = check_fn(|_ctx| async { Ok(CheckOutcome::healthy("pool ok")) });
/// # let _ = check;
/// ```
pub fn check_fn<F, Fut>(check_fn: F) -> FnCheck<F>
where
    F: Fn(CheckContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CheckOutcome, CheckError>> + Send + 'static,
{
    FnCheck { check_fn }
}

#[async_trait]
impl<F, Fut> HealthCheck for FnCheck<F>
where
    F: Fn(CheckContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<CheckOutcome, CheckError>> + Send,
{
    async fn check(&self, ctx: CheckContext) -> Result<CheckOutcome, CheckError> {
        (self.check_fn)(ctx).await
    }

    fn description(&self) -> &str {
        "closure check"
    }
}

/// Check that always reports the same status.
#[derive(Debug, Clone)]
pub struct StaticCheck {
    status: HealthStatus,
    message: String,
}

impl StaticCheck {
    pub fn new(status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn healthy() -> Self {
        Self::new(HealthStatus::Healthy, "ok")
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Unhealthy, message)
    }
}

#[async_trait]
impl HealthCheck for StaticCheck {
    async fn check(&self, _ctx: CheckContext) -> Result<CheckOutcome, CheckError> {
        Ok(CheckOutcome::new(self.status, self.message.clone()))
    }

    fn description(&self) -> &str {
        "static check"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> CheckContext {
        CheckContext::new("test", 1, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_closure_check() {
        let check = check_fn(|ctx| async move {
            Ok(CheckOutcome::healthy("fine").with_data("attempt", ctx.attempt()))
        });

        let outcome = check.check(ctx()).await.unwrap();
        assert_eq!(outcome.status, HealthStatus::Healthy);
        assert_eq!(outcome.data.get("attempt"), Some(&serde_json::json!(1)));
    }

    #[tokio::test]
    async fn test_static_check() {
        let outcome = StaticCheck::unhealthy("down").check(ctx()).await.unwrap();
        assert_eq!(outcome.status, HealthStatus::Unhealthy);
        assert_eq!(outcome.message, "down");
    }
}
