use chrono::Utc;

use crate::history::document::{DocumentSummary, ResultDocument, TestRecord};
use crate::runner::outcome::RunOutcome;

/// Convert a [`RunOutcome`] into the [`ResultDocument`] written after the run.
pub fn to_document(suite: &str, outcome: &RunOutcome) -> ResultDocument {
    let records = outcome
        .checks
        .iter()
        .map(|check| TestRecord {
            name: check.name.clone(),
            unit: Some(check.unit.clone()),
            status: check.status.to_string(),
            error: check.error.clone(),
        })
        .collect();

    let c = &outcome.counters;
    ResultDocument {
        suite: suite.to_owned(),
        generated_at: Some(Utc::now()),
        outcome: Some(outcome.kind.to_string()),
        stop_reason: Some(outcome.stop_reason.to_string()),
        summary: Some(DocumentSummary {
            total: c.total,
            passed: c.passed,
            failed: c.failed,
            success_rate: c.success_rate(),
        }),
        records,
    }
}
