pub mod document;
pub mod keywords;
pub mod text_log;

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;

use crate::history::document::ResultDocument;
use crate::history::keywords::KeywordMatcher;
use crate::plan::selector::FailureHistory;
use crate::registry::UnitRegistry;

/// Default directory for run artifacts, relative to the working directory.
pub const DEFAULT_HISTORY_DIR: &str = "test-results";

/// Previous-run artifacts in a directory: the newest `*.log` console
/// capture and the newest `*.json` result document.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Most recently modified file with the given extension, if any.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError`] if the directory exists but cannot be listed.
    pub fn latest(&self, extension: &str) -> Result<Option<PathBuf>, HistoryError> {
        if !self.dir.is_dir() {
            return Ok(None);
        }
        let entries = fs::read_dir(&self.dir).map_err(|e| HistoryError::io(&self.dir, &e))?;

        let mut newest: Option<(SystemTime, PathBuf)> = None;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() || path.extension().is_none_or(|ext| ext != extension) {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            // Same mtime: timestamped names sort chronologically.
            if newest
                .as_ref()
                .is_none_or(|(t, p)| (modified, &path) > (*t, p))
            {
                newest = Some((modified, path));
            }
        }
        Ok(newest.map(|(_, path)| path))
    }
}

impl FailureHistory for HistoryStore {
    fn failing_units(&self, registry: &UnitRegistry) -> Result<BTreeSet<String>, HistoryError> {
        let matcher = KeywordMatcher::from_registry(registry);
        let mut failing = BTreeSet::new();

        if let Some(path) = self.latest("json")? {
            let doc = ResultDocument::read(&path)?;
            let units = doc.failing_units(&matcher);
            debug!(path = %path.display(), units = units.len(), "read result document");
            failing.extend(units);
        }

        if let Some(path) = self.latest("log")? {
            let content = fs::read_to_string(&path).map_err(|e| HistoryError::io(&path, &e))?;
            let checks = text_log::failed_checks(&content);
            let units = checks.iter().flat_map(|c| matcher.units_for(c));
            let before = failing.len();
            failing.extend(units);
            debug!(
                path = %path.display(),
                checks = checks.len(),
                added = failing.len() - before,
                "read text log"
            );
        }

        Ok(failing)
    }
}

/// Error reading a history artifact.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct HistoryError {
    pub kind: HistoryErrorKind,
    pub message: String,
    pub detail: Option<String>,
}

impl HistoryError {
    pub fn io(path: &Path, err: &std::io::Error) -> Self {
        Self {
            kind: HistoryErrorKind::Io,
            message: format!("{}: {err}", path.display()),
            detail: None,
        }
    }

    pub fn malformed(path: &Path, err: impl fmt::Display) -> Self {
        Self {
            kind: HistoryErrorKind::Malformed,
            message: format!("{}: {err}", path.display()),
            detail: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryErrorKind {
    Io,
    Malformed,
}

impl fmt::Display for HistoryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io => write!(f, "history read failed"),
            Self::Malformed => write!(f, "malformed history artifact"),
        }
    }
}
