use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::{self, Settings, layered};
use crate::graph::analysis::{dependents, leaf_units, root_units, validate};
use crate::history::{DEFAULT_HISTORY_DIR, HistoryStore};
use crate::plan::selector::{
    FailureHistory, NoHistory, SelectionDirective, SelectionError, plan_selection,
};
use crate::plan::types::ExecutionPlan;
use crate::runner::breaker::CircuitBreaker;
use crate::runner::context::Fixtures;
use crate::runner::display::{
    format_checks, format_cleanup_warnings, format_failures, format_run_header, format_stop,
    format_summary,
};
use crate::runner::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::runner::outcome::RunOutcome;
use crate::runner::report::to_document;
use crate::suite::build::{Suite, build_suite};
use crate::suite::manifest::{Manifest, ManifestError};
use crate::suite::units::BASE_URL_FIXTURE;

/// Unit selection flags shared by `run` and `plan`.
#[derive(Debug, Clone, Default)]
pub struct SelectOptions {
    pub only: Vec<String>,
    pub skip: Vec<String>,
    pub only_failing: bool,
}

impl SelectOptions {
    fn directive(&self) -> SelectionDirective {
        let mut directive = SelectionDirective::default();
        if !self.only.is_empty() {
            directive = directive.only(self.only.iter().cloned());
        }
        if !self.skip.is_empty() {
            directive = directive.skip(self.skip.iter().cloned());
        }
        if self.only_failing {
            directive = directive.only_failing();
        }
        directive
    }
}

/// Options for the `run` command.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub manifest: PathBuf,
    pub select: SelectOptions,
    pub stop_on_first_failure: bool,
    pub max_failure_rate: Option<f64>,
    pub history_dir: Option<PathBuf>,
    pub base_url: Option<String>,
    pub hide_passed: bool,
}

/// Options for the `plan` command.
#[derive(Debug, Clone)]
pub struct PlanOptions {
    pub manifest: PathBuf,
    pub select: SelectOptions,
    pub history_dir: Option<PathBuf>,
    pub format: String,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            manifest: PathBuf::new(),
            select: SelectOptions::default(),
            history_dir: None,
            format: "yaml".to_owned(),
        }
    }
}

/// What `run` hands back to `main`.
#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Operator-facing output: checks, failures, stop explanation, summary.
    pub output: String,
    /// Result document written for this run, if writing succeeded.
    pub artifact: Option<PathBuf>,
}

fn manifest_error(err: &ManifestError) -> String {
    match &err.detail {
        Some(detail) => format!("{err}\n  {detail}"),
        None => err.to_string(),
    }
}

fn selection_error(err: &SelectionError) -> String {
    match &err.detail {
        Some(detail) => format!("{err}\n  {detail}"),
        None => err.to_string(),
    }
}

/// Load a manifest and build its suite against `base_url`, or the
/// manifest's own base URL when none is given.
fn load_suite(path: &Path, base_url: Option<&str>) -> Result<(Manifest, Suite), String> {
    let manifest = Manifest::load(path).map_err(|e| manifest_error(&e))?;
    let base_dir = path.parent().unwrap_or(Path::new("."));
    let base_url = base_url.or(manifest.base_url.as_deref());
    let suite = build_suite(&manifest, base_dir, base_url).map_err(|e| manifest_error(&e))?;
    Ok((manifest, suite))
}

/// History directory: command line, then manifest (relative to the
/// manifest's directory), then the default next to the manifest.
fn history_dir(cli: Option<&PathBuf>, manifest: &Manifest, manifest_path: &Path) -> PathBuf {
    let base_dir = manifest_path.parent().unwrap_or(Path::new("."));
    match (cli, &manifest.history_dir) {
        (Some(dir), _) => dir.clone(),
        (None, Some(dir)) => base_dir.join(dir),
        (None, None) => base_dir.join(DEFAULT_HISTORY_DIR),
    }
}

fn select_plan(
    directive: &SelectionDirective,
    suite: &Suite,
    history: &HistoryStore,
) -> Result<ExecutionPlan, String> {
    let history: &dyn FailureHistory = if directive.only_failing {
        history
    } else {
        &NoHistory
    };
    plan_selection(directive, &suite.registry, history).map_err(|e| selection_error(&e))
}

/// Run the `run` command: load the manifest, select and resolve units,
/// execute the plan, and write the result document.
///
/// # Errors
///
/// Returns an error string for pre-run failures: an out-of-range failure
/// rate, unreadable or invalid manifests, unknown ids, skipped dependencies
/// and dependency cycles. A
/// run that starts always produces a [`RunReport`], whatever its outcome.
pub fn run_run(options: &RunOptions, settings: &Settings) -> Result<RunReport, String> {
    if let Some(rate) = options.max_failure_rate
        && !config::valid_failure_rate(rate)
    {
        return Err(format!(
            "invalid --max-failure-rate {rate}: expected a percentage between 0 and 100"
        ));
    }

    let base_url_override = options.base_url.as_deref().or(settings.base_url.as_deref());
    let (manifest, suite) = load_suite(&options.manifest, base_url_override)?;
    let history = HistoryStore::new(history_dir(
        options.history_dir.as_ref(),
        &manifest,
        &options.manifest,
    ));

    let mut directive = options.select.directive();
    directive.stop_on_first_failure = options.stop_on_first_failure
        || layered(
            None,
            settings.stop_on_first_failure,
            manifest.stop_on_first_failure,
            false,
        );
    let plan = select_plan(&directive, &suite, &history)?;

    let max_failure_rate = config::max_failure_rate(
        options.max_failure_rate,
        settings,
        manifest.max_failure_rate,
    );
    let critical_mode = layered(None, settings.critical_mode, manifest.critical_mode, true);
    let hide_passed = options.hide_passed || settings.hide_passed;

    let stop_on_first_failure = directive.stop_on_first_failure;
    let config = OrchestratorConfig {
        breaker: CircuitBreaker::default().with_max_failure_rate(max_failure_rate),
        stop_on_first_failure,
        critical_mode,
    };

    let mut fixtures = Fixtures::new();
    if let Some(url) = base_url_override.or(manifest.base_url.as_deref()) {
        fixtures.insert(BASE_URL_FIXTURE, url);
    }

    let Suite { registry, setup } = suite;
    let orchestrator = setup
        .into_iter()
        .fold(Orchestrator::new(config).with_fixtures(fixtures), |o, step| {
            o.with_setup_step(step)
        });

    info!(
        suite = %registry.name(),
        units = plan.len(),
        max_failure_rate,
        stop_on_first_failure,
        critical_mode,
        "run configured"
    );
    let outcome = orchestrator.run(&registry, &plan);

    let mut output = format_run_header(registry.name(), plan.len());
    output.push_str(&format_checks(&outcome, hide_passed));
    output.push('\n');
    for section in [
        format_failures(&outcome),
        format_stop(&outcome),
        Some(format_summary(&outcome)),
        format_cleanup_warnings(&outcome),
    ]
    .into_iter()
    .flatten()
    {
        output.push_str(&section);
        output.push('\n');
    }

    let artifact = match to_document(registry.name(), &outcome).write_to_dir(history.dir()) {
        Ok(path) => {
            output.push_str(&format!("results written to {}\n", path.display()));
            Some(path)
        }
        Err(e) => {
            warn!(error = %e, "could not write result document");
            None
        }
    };

    Ok(RunReport {
        outcome,
        output,
        artifact,
    })
}

/// Run the `plan` command: print the resolved execution plan.
///
/// # Errors
///
/// Returns an error string if the manifest cannot be loaded, selection
/// fails, or `format` is unknown.
pub fn run_plan(options: &PlanOptions) -> Result<String, String> {
    let (manifest, suite) = load_suite(&options.manifest, None)?;
    let history = HistoryStore::new(history_dir(
        options.history_dir.as_ref(),
        &manifest,
        &options.manifest,
    ));
    let plan = select_plan(&options.select.directive(), &suite, &history)?;

    match options.format.as_str() {
        "yaml" => serde_yaml::to_string(&plan).map_err(|e| format!("YAML serialization failed: {e}")),
        "json" => serde_json::to_string_pretty(&plan)
            .map(|json| format!("{json}\n"))
            .map_err(|e| format!("JSON serialization failed: {e}")),
        other => Err(format!("unknown format '{other}' (expected: yaml, json)")),
    }
}

/// Run the `list` command: one line per unit with its dependencies and flags.
///
/// # Errors
///
/// Returns an error string if the manifest cannot be loaded.
pub fn run_list(manifest_path: &Path) -> Result<String, String> {
    let (_, suite) = load_suite(manifest_path, None)?;
    let registry = &suite.registry;
    let mut lines = vec![format!("{} ({} units)", registry.name(), registry.len())];

    for spec in registry.specs() {
        let mut line = if spec.name == spec.id {
            format!("  {}", spec.id)
        } else {
            format!("  {} — {}", spec.id, spec.name)
        };
        if !spec.depends_on.is_empty() {
            line.push_str(&format!(" [depends on: {}]", spec.depends_on.join(", ")));
        }
        let mut flags = Vec::new();
        if spec.critical {
            flags.push("critical".to_owned());
        }
        if spec.requires.session {
            flags.push("session".to_owned());
        }
        if spec.requires.project {
            flags.push("project".to_owned());
        }
        if spec.id == registry.auth_unit() {
            flags.push("auth".to_owned());
        }
        if !flags.is_empty() {
            line.push_str(&format!(" ({})", flags.join(", ")));
        }
        lines.push(line);
    }

    Ok(lines.join("\n"))
}

/// Run the `validate` command: check every dependency is registered and the
/// declarations are acyclic.
///
/// # Errors
///
/// Returns an error string naming the unknown dependency or the cycle.
pub fn run_validate(manifest_path: &Path) -> Result<String, String> {
    let (_, suite) = load_suite(manifest_path, None)?;
    let registry = &suite.registry;
    let dg = validate(registry).map_err(|e| format!("{}: {e}", manifest_path.display()))?;

    let roots = root_units(&dg);
    let leaves = leaf_units(&dg);
    let mut lines = vec![format!(
        "{}: {} is valid ({} units, {} roots, {} leaves)",
        manifest_path.display(),
        registry.name(),
        registry.len(),
        roots.len(),
        leaves.len(),
    )];

    let auth = registry.auth_unit();
    if registry.contains(auth) {
        let needs_session = dependents(&dg, auth);
        if !needs_session.is_empty() {
            lines.push(format!(
                "  {} units depend on {auth}: {}",
                needs_session.len(),
                needs_session.join(", ")
            ));
        }
    }

    Ok(lines.join("\n"))
}
