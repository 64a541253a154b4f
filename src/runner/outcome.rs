use std::fmt;
use std::time::Duration;

use crate::runner::aggregate::RunCounters;
use crate::runner::result::CheckResult;
use crate::runner::setup::CleanupWarning;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    AllPassed,
    PartialFailure,
    CriticalAbort,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllPassed => write!(f, "all passed"),
            Self::PartialFailure => write!(f, "partial failure"),
            Self::CriticalAbort => write!(f, "critical abort"),
        }
    }
}

/// Why the unit loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every planned unit ran.
    Completed,
    StoppedOnFailure,
    FailureRateExceeded,
    CriticalSetup,
    CriticalUnit,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::StoppedOnFailure => write!(f, "stopped on first failure"),
            Self::FailureRateExceeded => write!(f, "failure rate exceeded"),
            Self::CriticalSetup => write!(f, "critical setup failure"),
            Self::CriticalUnit => write!(f, "critical unit failure"),
        }
    }
}

/// A state the orchestrator passed through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunPhase {
    Init,
    Build,
    Start,
    HealthCheck,
    FixtureSetup,
    Unit(String),
    Summary,
    Cleanup,
    Exit { success: bool, critical: bool },
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Build => write!(f, "build"),
            Self::Start => write!(f, "start"),
            Self::HealthCheck => write!(f, "health check"),
            Self::FixtureSetup => write!(f, "fixture setup"),
            Self::Unit(id) => write!(f, "unit {id}"),
            Self::Summary => write!(f, "summary"),
            Self::Cleanup => write!(f, "cleanup"),
            Self::Exit { success, critical } => {
                write!(f, "exit (success={success}, critical={critical})")
            }
        }
    }
}

/// Everything a finished run reports back.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub kind: OutcomeKind,
    pub stop_reason: StopReason,
    pub counters: RunCounters,
    pub checks: Vec<CheckResult>,
    pub phases: Vec<RunPhase>,
    pub units_run: Vec<String>,
    pub cleanup_warnings: Vec<CleanupWarning>,
    /// Operator-facing explanation for every early stop.
    pub explanation: Option<String>,
    pub duration: Duration,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        self.kind == OutcomeKind::AllPassed
    }

    pub fn is_critical(&self) -> bool {
        self.kind == OutcomeKind::CriticalAbort
    }

    pub fn failures(&self) -> Vec<&CheckResult> {
        self.checks.iter().filter(|c| c.is_failed()).collect()
    }
}
