use crate::runner::aggregate::classify_error;
use crate::runner::outcome::RunOutcome;
use crate::runner::result::{CheckResult, CheckStatus};

/// Format a status label for terminal output.
fn status_label(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Passed => "PASSED",
        CheckStatus::Failed => "FAILED",
    }
}

/// Format the run header line.
pub fn format_run_header(suite: &str, units: usize) -> String {
    format!("Running {suite} ({units} units)...\n")
}

/// Display a header line for a unit's block of checks.
pub fn format_unit_header(unit: &str, order: usize, total: usize) -> String {
    format!("  [{order}/{total}] {unit} ...")
}

/// Format a check result line.
pub fn format_check(check: &CheckResult) -> String {
    let status = status_label(check.status);
    let duration_secs = check.duration.as_secs_f64();
    let mut line = format!("  [{status}] {} ({:.1}s)", check.name, duration_secs);

    if check.is_failed()
        && let Some(err) = &check.error
    {
        line.push_str(&format!("\n         → {err}"));
    }

    line
}

/// Every check of the run, grouped under the unit that recorded it.
/// Passed checks are left out when `hide_passed` is set.
pub fn format_checks(outcome: &RunOutcome, hide_passed: bool) -> String {
    let total = outcome.units_run.len();
    let mut lines = Vec::new();

    for (i, unit) in outcome.units_run.iter().enumerate() {
        lines.push(format_unit_header(unit, i + 1, total));
        for check in outcome.checks.iter().filter(|c| &c.unit == unit) {
            if hide_passed && !check.is_failed() {
                continue;
            }
            lines.push(format_check(check));
        }
    }

    lines.join("\n")
}

/// Format the final summary after the run.
pub fn format_summary(outcome: &RunOutcome) -> String {
    let c = &outcome.counters;
    let duration_secs = outcome.duration.as_secs_f64();
    let mut parts = Vec::new();

    if c.passed > 0 {
        parts.push(format!("{} passed", c.passed));
    }
    if c.failed > 0 {
        parts.push(format!("{} failed", c.failed));
    }
    if parts.is_empty() {
        parts.push("0 checks".into());
    }

    let mut line = format!("\nResults: {} ({:.1}s)", parts.join(", "), duration_secs);
    if c.total > 0 {
        line.push_str(&format!("\nSuccess rate: {:.1}%", c.success_rate()));
    }
    line.push_str(&format!("\nOutcome: {}", outcome.kind));
    line
}

/// List every failed check with its unit and rough error class.
pub fn format_failures(outcome: &RunOutcome) -> Option<String> {
    let failures = outcome.failures();
    if failures.is_empty() {
        return None;
    }

    let mut lines = vec![format!("\nFailures ({}):", failures.len())];
    for check in failures {
        let err = check.error.as_deref().unwrap_or("no error text");
        lines.push(format!(
            "  - [{}] {} ({}): {err}",
            check.unit,
            check.name,
            classify_error(err)
        ));
    }
    Some(lines.join("\n"))
}

/// Explain why the run stopped early, with counts.
pub fn format_stop(outcome: &RunOutcome) -> Option<String> {
    let explanation = outcome.explanation.as_ref()?;
    let c = &outcome.counters;
    Some(format!(
        "\nRun stopped: {} ({} checks, {} passed, {} failed)\n{explanation}",
        outcome.stop_reason, c.total, c.passed, c.failed
    ))
}

/// Cleanup problems, reported after the summary.
pub fn format_cleanup_warnings(outcome: &RunOutcome) -> Option<String> {
    if outcome.cleanup_warnings.is_empty() {
        return None;
    }
    let lines: Vec<String> = outcome
        .cleanup_warnings
        .iter()
        .map(|w| format!("  warning: {w}"))
        .collect();
    Some(format!("\n{}", lines.join("\n")))
}
