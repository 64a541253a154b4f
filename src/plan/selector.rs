use std::collections::BTreeSet;
use std::fmt;

use tracing::{debug, warn};

use crate::graph::resolve::Resolver;
use crate::graph::{GraphError, GraphErrorKind};
use crate::history::HistoryError;
use crate::plan::types::ExecutionPlan;
use crate::registry::UnitRegistry;

/// Operator directives that narrow a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionDirective {
    pub only: Option<Vec<String>>,
    pub skip: Option<Vec<String>>,
    pub only_failing: bool,
    pub stop_on_first_failure: bool,
}

impl SelectionDirective {
    pub fn only<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.only = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn skip<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn only_failing(mut self) -> Self {
        self.only_failing = true;
        self
    }
}

/// Source of unit ids that failed in a previous run.
pub trait FailureHistory {
    /// # Errors
    ///
    /// Returns [`HistoryError`] if an artifact exists but cannot be read.
    fn failing_units(&self, registry: &UnitRegistry) -> Result<BTreeSet<String>, HistoryError>;
}

/// A history with nothing in it.
pub struct NoHistory;

impl FailureHistory for NoHistory {
    fn failing_units(&self, _registry: &UnitRegistry) -> Result<BTreeSet<String>, HistoryError> {
        Ok(BTreeSet::new())
    }
}

/// Error from turning directives into a unit set or plan.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct SelectionError {
    pub kind: SelectionErrorKind,
    pub message: String,
    pub detail: Option<String>,
    pub units: Vec<String>,
}

/// Classification of selection errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionErrorKind {
    /// An `--only` or `--skip` entry is not registered.
    UnknownUnit,
    /// A skipped unit is required by a unit that would still run.
    SkippedDependency,
    /// The selected units' declarations form a cycle.
    DependencyCycle,
}

impl fmt::Display for SelectionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownUnit => write!(f, "unknown unit"),
            Self::SkippedDependency => write!(f, "skipped dependency"),
            Self::DependencyCycle => write!(f, "dependency cycle"),
        }
    }
}

impl From<GraphError> for SelectionError {
    fn from(err: GraphError) -> Self {
        let kind = match err.kind {
            GraphErrorKind::UnknownUnit => SelectionErrorKind::UnknownUnit,
            GraphErrorKind::DependencyCycle => SelectionErrorKind::DependencyCycle,
        };
        Self {
            kind,
            message: err.message,
            detail: None,
            units: err.units,
        }
    }
}

/// Turn directives into the set of units the operator asked for.
///
/// Starts from every registered unit, narrows to previously failing units
/// when `only_failing` is set, replaces the set with the `only` list and
/// finally removes the `skip` list. Only-failing with no usable history
/// falls back to the full registry.
///
/// # Errors
///
/// Returns `UnknownUnit` (with the valid ids in `detail`) if an `only` or
/// `skip` entry is not registered.
pub fn select(
    directive: &SelectionDirective,
    registry: &UnitRegistry,
    history: &dyn FailureHistory,
) -> Result<BTreeSet<String>, SelectionError> {
    let all: BTreeSet<String> = registry.ids().into_iter().map(str::to_owned).collect();
    let mut selected = all.clone();

    if directive.only_failing {
        selected = match history.failing_units(registry) {
            Ok(failing) => {
                let failing: BTreeSet<String> = failing.intersection(&all).cloned().collect();
                if failing.is_empty() {
                    warn!("no failing units found in history, running every unit");
                    all.clone()
                } else {
                    debug!(units = ?failing, "selected previously failing units");
                    failing
                }
            }
            Err(e) => {
                warn!(error = %e, "could not read history, running every unit");
                all.clone()
            }
        };
    }

    if let Some(only) = &directive.only {
        check_known(only, registry)?;
        selected = only.iter().cloned().collect();
    }

    if let Some(skip) = &directive.skip {
        check_known(skip, registry)?;
        for id in skip {
            selected.remove(id);
        }
    }

    debug!(selected = selected.len(), "applied selection directives");
    Ok(selected)
}

/// Select units and resolve them into an execution plan.
///
/// # Errors
///
/// Everything [`select`] returns, plus `SkippedDependency` if a remaining
/// unit needs a skipped one, and the resolver's graph errors.
pub fn plan_selection(
    directive: &SelectionDirective,
    registry: &UnitRegistry,
    history: &dyn FailureHistory,
) -> Result<ExecutionPlan, SelectionError> {
    let selected = select(directive, registry, history)?;
    let resolver = Resolver::new(registry);

    if let Some(skip) = &directive.skip {
        let closure = resolver.closure(&selected)?;
        let needed: Vec<&String> = skip.iter().filter(|id| closure.contains(id.as_str())).collect();
        if let Some(&skipped) = needed.first() {
            let mut required_by = Vec::new();
            for id in &selected {
                let single = BTreeSet::from([id.clone()]);
                if resolver.closure(&single)?.contains(skipped.as_str()) {
                    required_by.push(id.clone());
                }
            }
            return Err(SelectionError {
                kind: SelectionErrorKind::SkippedDependency,
                message: format!(
                    "\"{skipped}\" is skipped but required by {}",
                    required_by.join(", ")
                ),
                detail: Some("remove it from --skip or skip its dependents too".to_owned()),
                units: needed.into_iter().cloned().collect(),
            });
        }
    }

    Ok(resolver.resolve(&selected)?)
}

fn check_known(ids: &[String], registry: &UnitRegistry) -> Result<(), SelectionError> {
    let unknown: Vec<String> = ids
        .iter()
        .filter(|id| !registry.contains(id))
        .cloned()
        .collect();
    if unknown.is_empty() {
        return Ok(());
    }
    Err(SelectionError {
        kind: SelectionErrorKind::UnknownUnit,
        message: format!("not registered: {}", unknown.join(", ")),
        detail: Some(format!("valid units: {}", registry.ids().join(", "))),
        units: unknown,
    })
}
