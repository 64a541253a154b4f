use std::fmt;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::registry::unit::Requirement;
use crate::runner::context::{Fixtures, extract_fixtures};

/// The pre-run stages, in the order the orchestrator runs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SetupStage {
    Build,
    Start,
    HealthCheck,
    FixtureSetup,
}

impl fmt::Display for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Build => write!(f, "build"),
            Self::Start => write!(f, "start"),
            Self::HealthCheck => write!(f, "health check"),
            Self::FixtureSetup => write!(f, "fixture setup"),
        }
    }
}

/// What a setup step may touch: the shared fixtures units will read, and the
/// cleanup stack for anything that must be torn down after the run.
pub struct SetupEnv<'a> {
    pub fixtures: &'a mut Fixtures,
    pub cleanup: &'a mut CleanupStack,
}

/// A critical pre-run step. Any error aborts the run.
pub trait SetupStep {
    fn stage(&self) -> SetupStage;

    fn name(&self) -> &str;

    /// The shared fixture this step creates. Steps that provide one only run
    /// when the selected units need it.
    fn provides(&self) -> Option<Requirement> {
        None
    }

    /// # Errors
    ///
    /// Returns [`SetupError`] if the step could not complete.
    fn run(&self, env: &mut SetupEnv<'_>) -> Result<(), SetupError>;
}

/// A failed critical setup step.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{stage} step \"{step}\" failed: {message}")]
pub struct SetupError {
    pub stage: SetupStage,
    pub step: String,
    pub message: String,
    pub detail: Option<String>,
}

impl SetupError {
    pub fn new(stage: SetupStage, step: &str, message: impl Into<String>) -> Self {
        Self {
            stage,
            step: step.to_owned(),
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Teardown registered during a run.
pub type CleanupAction = Box<dyn FnOnce() -> Result<(), String>>;

/// A cleanup action that failed. Logged and reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupWarning {
    pub action: String,
    pub message: String,
}

impl fmt::Display for CleanupWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cleanup \"{}\" failed: {}", self.action, self.message)
    }
}

/// Cleanup actions, run last-registered first.
#[derive(Default)]
pub struct CleanupStack {
    actions: Vec<(String, CleanupAction)>,
}

impl CleanupStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, action: CleanupAction) {
        self.actions.push((name.into(), action));
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Drain and run every action in reverse registration order.
    pub fn run_all(&mut self) -> Vec<CleanupWarning> {
        let mut warnings = Vec::new();
        while let Some((name, action)) = self.actions.pop() {
            debug!(action = %name, "running cleanup");
            if let Err(message) = action() {
                warn!(action = %name, error = %message, "cleanup failed");
                warnings.push(CleanupWarning {
                    action: name,
                    message,
                });
            }
        }
        warnings
    }
}

impl fmt::Debug for CleanupStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.actions.iter().map(|(n, _)| n.as_str()).collect();
        f.debug_struct("CleanupStack").field("actions", &names).finish()
    }
}

fn shell(command: &str, working_dir: Option<&PathBuf>) -> Command {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(command);
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }
    cmd
}

/// Runs a shell command to completion. Used for build steps and for fixture
/// steps, whose `::fixture key=value` output lines become shared fixtures.
#[derive(Debug, Clone)]
pub struct CommandStep {
    pub name: String,
    pub stage: SetupStage,
    pub command: String,
    pub provides: Option<Requirement>,
    pub working_dir: Option<PathBuf>,
}

impl CommandStep {
    pub fn new(stage: SetupStage, name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stage,
            command: command.into(),
            provides: None,
            working_dir: None,
        }
    }

    pub fn providing(mut self, requirement: Requirement) -> Self {
        self.provides = Some(requirement);
        self
    }
}

impl SetupStep for CommandStep {
    fn stage(&self) -> SetupStage {
        self.stage
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn provides(&self) -> Option<Requirement> {
        self.provides
    }

    fn run(&self, env: &mut SetupEnv<'_>) -> Result<(), SetupError> {
        let output = shell(&self.command, self.working_dir.as_ref())
            .output()
            .map_err(|e| {
                SetupError::new(self.stage, &self.name, format!("failed to spawn: {e}"))
            })?;

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            let err = SetupError::new(self.stage, &self.name, format!("exited with code {code}"));
            return Err(if stderr.is_empty() {
                err
            } else {
                err.with_detail(stderr)
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let fixtures = extract_fixtures(&stdout);
        if !fixtures.is_empty() {
            debug!(step = %self.name, count = fixtures.len(), "recorded fixtures");
        }
        env.fixtures.extend(fixtures);
        Ok(())
    }
}

/// Starts a long-running process (usually the system under test) and
/// registers a cleanup action that kills it.
#[derive(Debug, Clone)]
pub struct ProcessStep {
    pub name: String,
    pub command: String,
    pub working_dir: Option<PathBuf>,
}

impl ProcessStep {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            working_dir: None,
        }
    }
}

impl SetupStep for ProcessStep {
    fn stage(&self) -> SetupStage {
        SetupStage::Start
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, env: &mut SetupEnv<'_>) -> Result<(), SetupError> {
        // exec so the kill reaches the process itself, not a wrapping shell.
        let mut child = shell(&format!("exec {}", self.command), self.working_dir.as_ref())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                SetupError::new(SetupStage::Start, &self.name, format!("failed to spawn: {e}"))
            })?;

        let pid = child.id();
        info!(step = %self.name, pid, "started process");

        env.cleanup.push(
            format!("stop {}", self.name),
            Box::new(move || {
                if child.try_wait().map_err(|e| e.to_string())?.is_none() {
                    child.kill().map_err(|e| format!("kill {pid}: {e}"))?;
                }
                child.wait().map_err(|e| format!("wait {pid}: {e}"))?;
                Ok(())
            }),
        );
        Ok(())
    }
}

/// Polls a URL until it answers with a 2xx status.
#[derive(Debug, Clone)]
pub struct HealthCheckStep {
    pub name: String,
    pub url: String,
    pub attempts: u32,
    pub interval: Duration,
    pub timeout: Duration,
}

impl HealthCheckStep {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            name: "health".to_owned(),
            url: url.into(),
            attempts: 30,
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
        }
    }

    fn probe(&self, agent: &ureq::Agent) -> Result<(), String> {
        let resp = agent.get(&self.url).call().map_err(|e| e.to_string())?;
        let status = resp.status().as_u16();
        if (200..300).contains(&status) {
            Ok(())
        } else {
            Err(format!("status {status}"))
        }
    }
}

impl SetupStep for HealthCheckStep {
    fn stage(&self) -> SetupStage {
        SetupStage::HealthCheck
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, _env: &mut SetupEnv<'_>) -> Result<(), SetupError> {
        let config = ureq::config::Config::builder()
            .http_status_as_error(false)
            .timeout_global(Some(self.timeout))
            .build();
        let agent = ureq::Agent::new_with_config(config);

        let attempts = self.attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.probe(&agent) {
                Ok(()) => {
                    info!(url = %self.url, attempt, "health check passed");
                    return Ok(());
                }
                Err(e) => {
                    debug!(url = %self.url, attempt, error = %e, "health check not ready");
                    last_error = e;
                }
            }
            if attempt < attempts {
                thread::sleep(self.interval);
            }
        }

        Err(SetupError::new(
            SetupStage::HealthCheck,
            &self.name,
            format!("{} not healthy after {attempts} attempts", self.url),
        )
        .with_detail(last_error))
    }
}
