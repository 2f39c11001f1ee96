//! Vigil Types - Core vocabulary for health monitoring and resilience
//!
//! These types are shared by every Vigil component and by external
//! collaborators (alerting, logging, dashboards) that consume health
//! events without depending on the monitoring engine itself.
//!
//! ## Key Concepts
//!
//! - **HealthStatus**: Verdict of a single check or of the whole system,
//!   ordered by severity
//! - **CheckCategory**: Grouping used for per-category breakdowns
//! - **DegradationLevel**: How much functionality has been voluntarily shed
//! - **CircuitState**: Position of a circuit breaker's state machine
//! - **DeploymentProfile**: Preset tuning for different environments

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod category;
pub mod circuit;
pub mod degradation;
pub mod ids;
pub mod profile;
pub mod status;

pub use category::CheckCategory;
pub use circuit::CircuitState;
pub use degradation::DegradationLevel;
pub use ids::{ExecutionId, ReportId};
pub use profile::DeploymentProfile;
pub use status::HealthStatus;
