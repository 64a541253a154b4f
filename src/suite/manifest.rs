use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::registry::unit::{Preconditions, Requirement};

/// A suite manifest: the units to run and the steps that prepare the system
/// under test.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_failure_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical_mode: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_on_first_failure: Option<bool>,
    /// Per-request timeout for HTTP checks, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_timeout_secs: Option<u64>,
    #[serde(default)]
    pub setup: SetupDef,
    #[serde(default)]
    pub units: Vec<UnitDef>,
    #[serde(default)]
    pub phases: Vec<PhaseDef>,
}

/// Critical setup, by stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetupDef {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub build: Vec<CommandDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub start: Vec<CommandDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fixtures: Vec<FixtureDef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDef {
    pub name: String,
    pub run: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthDef {
    /// Absolute URL, or a path relative to `base_url`.
    pub url: String,
    #[serde(default = "default_health_attempts")]
    pub attempts: u32,
    #[serde(default = "default_health_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_health_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_health_attempts() -> u32 {
    30
}

fn default_health_interval_ms() -> u64 {
    1000
}

fn default_health_timeout_ms() -> u64 {
    5000
}

/// A command that creates a shared fixture; runs only when a selected unit
/// needs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureDef {
    pub name: String,
    pub run: String,
    pub provides: Requirement,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitDef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub requires: Preconditions,
    #[serde(default)]
    pub critical: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub checks: Vec<CheckDef>,
}

/// A phase groups chunk units that run back to back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseDef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub critical: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    pub chunks: Vec<UnitDef>,
}

/// One check: exactly one of `shell` or `http`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpDef {
    #[serde(default = "default_method")]
    pub method: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default = "default_expect_status")]
    pub expect_status: u16,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Fixture name -> dotted JSON path in the response body.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub capture: BTreeMap<String, String>,
}

fn default_method() -> String {
    "GET".to_owned()
}

fn default_expect_status() -> u16 {
    200
}

/// Error loading a manifest.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ManifestError {
    pub kind: ManifestErrorKind,
    pub message: String,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestErrorKind {
    Io,
    Parse,
    Invalid,
}

impl fmt::Display for ManifestErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io => write!(f, "manifest read failed"),
            Self::Parse => write!(f, "manifest parse failed"),
            Self::Invalid => write!(f, "invalid manifest"),
        }
    }
}

impl ManifestError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            kind: ManifestErrorKind::Invalid,
            message: message.into(),
            detail: None,
        }
    }
}

impl Manifest {
    /// Read and parse a YAML manifest.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError`] if the file cannot be read or parsed, or if
    /// a check does not name exactly one kind.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|e| ManifestError {
            kind: ManifestErrorKind::Io,
            message: format!("{}: {e}", path.display()),
            detail: None,
        })?;
        Self::parse(&content).map_err(|mut e| {
            e.message = format!("{}: {}", path.display(), e.message);
            e
        })
    }

    /// # Errors
    ///
    /// Same as [`load`](Self::load), minus the I/O.
    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        let manifest: Self = serde_yaml::from_str(content).map_err(|e| ManifestError {
            kind: ManifestErrorKind::Parse,
            message: e.to_string(),
            detail: None,
        })?;
        manifest.check()?;
        Ok(manifest)
    }

    fn check(&self) -> Result<(), ManifestError> {
        if self.name.trim().is_empty() {
            return Err(ManifestError::invalid("suite name is empty"));
        }
        let chunks = self.phases.iter().flat_map(|p| p.chunks.iter());
        for unit in self.units.iter().chain(chunks) {
            if unit.id.trim().is_empty() {
                return Err(ManifestError::invalid("unit with empty id"));
            }
            for check in &unit.checks {
                match (&check.shell, &check.http) {
                    (Some(_), None) | (None, Some(_)) => {}
                    _ => {
                        return Err(ManifestError::invalid(format!(
                            "check \"{}\" in unit \"{}\" must have exactly one of shell or http",
                            check.name, unit.id
                        )));
                    }
                }
            }
        }
        if let Some(rate) = self.max_failure_rate
            && !crate::config::valid_failure_rate(rate)
        {
            return Err(ManifestError::invalid(format!(
                "max_failure_rate must be between 0 and 100, got {rate}"
            )));
        }
        Ok(())
    }
}
