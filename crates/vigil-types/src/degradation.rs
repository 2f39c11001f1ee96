//! Degradation levels
//!
//! A degradation level describes how much functionality the system has
//! voluntarily shed in response to poor health. Exactly one level is
//! active at any instant.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered degradation tier, `None < Minor < Moderate < Severe < Disabled`
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub enum DegradationLevel {
    /// Full functionality
    #[default]
    None,

    /// Non-essential features shed
    Minor,

    /// Optional features shed
    Moderate,

    /// Only core features remain
    Severe,

    /// Everything gated is off
    Disabled,
}

impl DegradationLevel {
    /// All levels from least to most degraded.
    pub const ALL: [DegradationLevel; 5] = [
        DegradationLevel::None,
        DegradationLevel::Minor,
        DegradationLevel::Moderate,
        DegradationLevel::Severe,
        DegradationLevel::Disabled,
    ];

    pub fn is_degraded(&self) -> bool {
        *self != DegradationLevel::None
    }
}

impl fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DegradationLevel::None => write!(f, "none"),
            DegradationLevel::Minor => write!(f, "minor"),
            DegradationLevel::Moderate => write!(f, "moderate"),
            DegradationLevel::Severe => write!(f, "severe"),
            DegradationLevel::Disabled => write!(f, "disabled"),
        }
    }
}
