//! Host health classification.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse health of the host the dashboard runs on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemHealth {
    /// All resources within normal bounds.
    #[default]
    Healthy,
    /// At least one resource is running hot.
    Warning,
    /// At least one resource is close to exhaustion.
    Critical,
}

impl SystemHealth {
    /// Classify utilization percentages.
    ///
    /// Critical when CPU or memory exceed 90% or disk exceeds 95%; warning
    /// when CPU or memory exceed 80% or disk exceeds 90%.
    pub fn classify(cpu_percent: f64, memory_percent: f64, disk_percent: f64) -> Self {
        if cpu_percent > 90.0 || memory_percent > 90.0 || disk_percent > 95.0 {
            Self::Critical
        } else if cpu_percent > 80.0 || memory_percent > 80.0 || disk_percent > 90.0 {
            Self::Warning
        } else {
            Self::Healthy
        }
    }

    /// Lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for SystemHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
