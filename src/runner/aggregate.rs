use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::runner::result::CheckResult;

/// Check counters for a run. One increment per individual check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

impl RunCounters {
    /// Failed checks as a percentage of all checks; 0 when nothing ran.
    pub fn failure_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.failed as f64 / self.total as f64 * 100.0
    }

    /// Passed checks as a percentage of all checks; 0 when nothing ran.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.passed as f64 / self.total as f64 * 100.0
    }

    fn record(&mut self, check: &CheckResult) {
        self.total += 1;
        if check.is_failed() {
            self.failed += 1;
        } else {
            self.passed += 1;
        }
    }
}

/// Accumulates check results across units.
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    counters: RunCounters,
    checks: Vec<CheckResult>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one unit's checks into the run.
    pub fn merge(&mut self, checks: impl IntoIterator<Item = CheckResult>) {
        for check in checks {
            self.counters.record(&check);
            self.checks.push(check);
        }
    }

    /// Record a unit that could not complete as one failed check named after
    /// the unit.
    pub fn record_unit_failure(
        &mut self,
        unit: &str,
        name: &str,
        duration: Duration,
        reason: &str,
    ) {
        self.merge([CheckResult::failed(unit, name, duration, reason)]);
    }

    pub fn counters(&self) -> RunCounters {
        self.counters
    }

    pub fn checks(&self) -> &[CheckResult] {
        &self.checks
    }

    /// Every failed check, in the order it was recorded.
    pub fn failures(&self) -> Vec<&CheckResult> {
        self.checks.iter().filter(|c| c.is_failed()).collect()
    }

    pub fn into_checks(self) -> Vec<CheckResult> {
        self.checks
    }
}

/// Rough origin of a failure, for operator diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The system under test could not be reached.
    Network,
    /// The system under test answered with a server error.
    Server,
    /// The check itself broke: bad fixture, spawn failure, panic.
    Harness,
    /// The system answered, but not as expected.
    Assertion,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Server => write!(f, "server"),
            Self::Harness => write!(f, "harness"),
            Self::Assertion => write!(f, "assertion"),
        }
    }
}

const NETWORK_MARKERS: &[&str] = &[
    "connection refused",
    "connection reset",
    "timed out",
    "timeout",
    "dns",
    "unreachable",
];

const SERVER_MARKERS: &[&str] = &[
    "got 500",
    "got 502",
    "got 503",
    "got 504",
    "internal server error",
    "bad gateway",
    "service unavailable",
];

const HARNESS_MARKERS: &[&str] = &[
    "panicked",
    "failed to spawn",
    "unknown fixture",
    "missing fixture",
];

/// Classify an error message by substring. Never affects control flow.
pub fn classify_error(message: &str) -> ErrorClass {
    let lower = message.to_lowercase();
    let has = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));
    if has(NETWORK_MARKERS) {
        ErrorClass::Network
    } else if has(SERVER_MARKERS) {
        ErrorClass::Server
    } else if has(HARNESS_MARKERS) {
        ErrorClass::Harness
    } else {
        ErrorClass::Assertion
    }
}
