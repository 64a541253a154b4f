use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::history::HistoryError;
use crate::history::keywords::KeywordMatcher;

/// Structured result of one run, written after every run and read back by
/// only-failing selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultDocument {
    pub suite: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<DocumentSummary>,
    #[serde(default)]
    pub records: Vec<TestRecord>,
}

/// Counters in the result document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub success_rate: f64,
}

/// A single check in the result document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestRecord {
    pub name: String,
    /// Older documents and foreign tools may not carry the unit id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TestRecord {
    pub fn passed(name: impl Into<String>, unit: Option<&str>) -> Self {
        Self {
            name: name.into(),
            unit: unit.map(str::to_owned),
            status: "passed".to_owned(),
            error: None,
        }
    }

    pub fn failed(name: impl Into<String>, unit: Option<&str>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unit: unit.map(str::to_owned),
            status: "failed".to_owned(),
            error: Some(error.into()),
        }
    }

    /// Whether the record counts as a failure. Accepts the spellings other
    /// reporters use.
    pub fn is_failed(&self) -> bool {
        matches!(
            self.status.to_ascii_lowercase().as_str(),
            "failed" | "fail" | "failure" | "error"
        )
    }
}

impl ResultDocument {
    pub fn new(suite: impl Into<String>) -> Self {
        Self {
            suite: suite.into(),
            generated_at: None,
            outcome: None,
            stop_reason: None,
            summary: None,
            records: Vec::new(),
        }
    }

    /// # Errors
    ///
    /// Returns [`HistoryError`] if the file cannot be read or is not a
    /// result document.
    pub fn read(path: &Path) -> Result<Self, HistoryError> {
        let content = fs::read_to_string(path).map_err(|e| HistoryError::io(path, &e))?;
        serde_json::from_str(&content).map_err(|e| HistoryError::malformed(path, e))
    }

    /// Write the document as `results-<timestamp>.json` in `dir`, creating
    /// the directory if needed. Returns the written path.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError`] if the directory or file cannot be written.
    pub fn write_to_dir(&self, dir: &Path) -> Result<PathBuf, HistoryError> {
        fs::create_dir_all(dir).map_err(|e| HistoryError::io(dir, &e))?;
        let stamp = self.generated_at.unwrap_or_else(Utc::now);
        let path = dir.join(format!("results-{}.json", stamp.format("%Y%m%dT%H%M%S%3f")));
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| HistoryError::malformed(&path, e))?;
        fs::write(&path, json).map_err(|e| HistoryError::io(&path, &e))?;
        Ok(path)
    }

    /// Units with at least one failed record. Records without a unit id are
    /// attributed by keyword.
    pub fn failing_units(&self, matcher: &KeywordMatcher) -> BTreeSet<String> {
        let mut units = BTreeSet::new();
        for record in self.records.iter().filter(|r| r.is_failed()) {
            match &record.unit {
                Some(unit) => {
                    units.insert(unit.clone());
                }
                None => units.extend(matcher.units_for(&record.name)),
            }
        }
        units
    }
}
