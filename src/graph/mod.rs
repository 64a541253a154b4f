pub mod analysis;
pub mod builder;
pub mod resolve;

use std::fmt;

/// Error from dependency graph construction or resolution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct GraphError {
    pub kind: GraphErrorKind,
    pub message: String,
    /// Offending unit ids: the unknown ids, or the cycle path.
    pub units: Vec<String>,
}

impl GraphError {
    pub fn unknown(units: Vec<String>, message: String) -> Self {
        Self {
            kind: GraphErrorKind::UnknownUnit,
            message,
            units,
        }
    }

    pub fn cycle(path: Vec<String>) -> Self {
        Self {
            kind: GraphErrorKind::DependencyCycle,
            message: path.join(" -> "),
            units: path,
        }
    }
}

/// Classification of graph errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphErrorKind {
    /// A requested or required id is not in the registry.
    UnknownUnit,
    /// The dependency declarations form a cycle.
    DependencyCycle,
}

impl fmt::Display for GraphErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownUnit => write!(f, "unknown unit"),
            Self::DependencyCycle => write!(f, "dependency cycle"),
        }
    }
}
