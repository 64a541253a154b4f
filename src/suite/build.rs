use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::registry::UnitRegistry;
use crate::registry::unit::{TestUnit, UnitSpec};
use crate::runner::phase::PhaseUnit;
use crate::runner::setup::{CommandStep, HealthCheckStep, ProcessStep, SetupStage, SetupStep};
use crate::suite::manifest::{Manifest, ManifestError, PhaseDef, UnitDef};
use crate::suite::units::{Check, ManifestUnit};

/// Per-request timeout for HTTP checks when the manifest sets none.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// A manifest turned into runnable parts.
pub struct Suite {
    pub registry: UnitRegistry,
    pub setup: Vec<Box<dyn SetupStep>>,
}

/// Build the registry and setup steps described by a manifest.
///
/// Relative `cwd` entries resolve against `base_dir`, normally the directory
/// holding the manifest. A relative health-check URL resolves against
/// `base_url`, the effective base URL after command-line and environment
/// overrides.
///
/// # Errors
///
/// Returns [`ManifestError`] if two units share an id.
pub fn build_suite(
    manifest: &Manifest,
    base_dir: &Path,
    base_url: Option<&str>,
) -> Result<Suite, ManifestError> {
    let timeout = manifest
        .http_timeout_secs
        .map_or(DEFAULT_HTTP_TIMEOUT, Duration::from_secs);

    let mut registry = UnitRegistry::new(&manifest.name);
    if let Some(auth) = &manifest.auth_unit {
        registry = registry.with_auth_unit(auth);
    }

    for def in &manifest.units {
        registry
            .register(Box::new(manifest_unit(def, timeout)))
            .map_err(|e| ManifestError::invalid(e.message))?;
    }
    for def in &manifest.phases {
        registry
            .register(Box::new(phase_unit(def, timeout)))
            .map_err(|e| ManifestError::invalid(e.message))?;
    }

    let setup = setup_steps(manifest, base_dir, base_url);
    debug!(
        suite = %manifest.name,
        units = registry.len(),
        steps = setup.len(),
        "built suite"
    );
    Ok(Suite { registry, setup })
}

fn unit_spec(
    id: &str,
    name: Option<&String>,
    depends_on: &[String],
    critical: bool,
    diagnostic: Option<&String>,
    keywords: &[String],
) -> UnitSpec {
    let mut spec = UnitSpec::new(id)
        .depends_on(depends_on.iter().cloned())
        .keywords(keywords.iter().cloned());
    if let Some(name) = name {
        spec = spec.named(name);
    }
    if critical {
        spec = spec.critical(diagnostic.cloned());
    }
    spec
}

fn manifest_unit(def: &UnitDef, timeout: Duration) -> ManifestUnit {
    let spec = unit_spec(
        &def.id,
        def.name.as_ref(),
        &def.depends_on,
        def.critical,
        def.diagnostic.as_ref(),
        &def.keywords,
    )
    .requires(def.requires);

    let checks = def
        .checks
        .iter()
        .filter_map(|c| match (&c.shell, &c.http) {
            (Some(command), _) => Some(Check::Shell {
                name: c.name.clone(),
                command: command.clone(),
            }),
            (None, Some(request)) => Some(Check::Http {
                name: c.name.clone(),
                request: request.clone(),
            }),
            (None, None) => None,
        })
        .collect();

    ManifestUnit::new(spec, checks, timeout)
}

fn phase_unit(def: &PhaseDef, timeout: Duration) -> PhaseUnit {
    let spec = unit_spec(
        &def.id,
        def.name.as_ref(),
        &def.depends_on,
        def.critical,
        def.diagnostic.as_ref(),
        &def.keywords,
    );
    let chunks: Vec<Box<dyn TestUnit>> = def
        .chunks
        .iter()
        .map(|chunk| Box::new(manifest_unit(chunk, timeout)) as Box<dyn TestUnit>)
        .collect();
    PhaseUnit::new(spec, chunks)
}

fn working_dir(base_dir: &Path, cwd: Option<&String>) -> Option<PathBuf> {
    cwd.map(|dir| base_dir.join(dir))
}

fn setup_steps(
    manifest: &Manifest,
    base_dir: &Path,
    base_url: Option<&str>,
) -> Vec<Box<dyn SetupStep>> {
    let setup = &manifest.setup;
    let mut steps: Vec<Box<dyn SetupStep>> = Vec::new();

    for cmd in &setup.build {
        let mut step = CommandStep::new(SetupStage::Build, &cmd.name, &cmd.run);
        step.working_dir = working_dir(base_dir, cmd.cwd.as_ref());
        steps.push(Box::new(step));
    }

    for cmd in &setup.start {
        let mut step = ProcessStep::new(&cmd.name, &cmd.run);
        step.working_dir = working_dir(base_dir, cmd.cwd.as_ref());
        steps.push(Box::new(step));
    }

    if let Some(health) = &setup.health {
        let mut step = HealthCheckStep::new(resolve_url(base_url, &health.url));
        step.attempts = health.attempts;
        step.interval = Duration::from_millis(health.interval_ms);
        step.timeout = Duration::from_millis(health.timeout_ms);
        steps.push(Box::new(step));
    }

    for fixture in &setup.fixtures {
        let mut step = CommandStep::new(SetupStage::FixtureSetup, &fixture.name, &fixture.run)
            .providing(fixture.provides);
        step.working_dir = working_dir(base_dir, fixture.cwd.as_ref());
        steps.push(Box::new(step));
    }

    steps
}

/// Join a relative URL path onto the base URL. Absolute URLs pass through.
pub fn resolve_url(base_url: Option<&str>, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        return url.to_owned();
    }
    match base_url {
        Some(base) => {
            let base = base.trim_end_matches('/');
            if url.starts_with('/') {
                format!("{base}{url}")
            } else {
                format!("{base}/{url}")
            }
        }
        None => url.to_owned(),
    }
}
