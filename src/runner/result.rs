use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What a unit reports back to the orchestrator once it returns.
///
/// Individual checks are recorded on the [`UnitContext`](crate::runner::context::UnitContext);
/// `Failed` means the unit itself could not carry on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Passed,
    Failed(String),
}

impl UnitOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// The outcome of one individual check inside a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Passed,
    Failed,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Result of a single check, tagged with the unit that ran it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub unit: String,
    pub name: String,
    pub status: CheckStatus,
    pub error: Option<String>,
    pub duration: Duration,
}

impl CheckResult {
    /// Create a passing check result.
    pub fn passed(unit: &str, name: &str, duration: Duration) -> Self {
        Self {
            unit: unit.to_owned(),
            name: name.to_owned(),
            status: CheckStatus::Passed,
            error: None,
            duration,
        }
    }

    /// Create a failing check result with its error text.
    pub fn failed(unit: &str, name: &str, duration: Duration, error: impl Into<String>) -> Self {
        Self {
            unit: unit.to_owned(),
            name: name.to_owned(),
            status: CheckStatus::Failed,
            error: Some(error.into()),
            duration,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == CheckStatus::Failed
    }
}
