/// Status label that marks a failed check in captured console output.
pub const FAILED_MARKER: &str = "[FAILED]";

/// Names of the failed checks in a captured `run` console log.
///
/// Recognizes the progress lines the runner prints,
/// `  [FAILED] <check name> (<seconds>s)`, anywhere in a line so that
/// prefixed captures (timestamps, CI annotations) still parse.
pub fn failed_checks(log: &str) -> Vec<String> {
    log.lines()
        .filter_map(|line| {
            let (_, rest) = line.split_once(FAILED_MARKER)?;
            let name = strip_duration(rest.trim());
            (!name.is_empty()).then(|| name.to_owned())
        })
        .collect()
}

fn strip_duration(s: &str) -> &str {
    if let Some(open) = s.rfind(" (")
        && s.ends_with("s)")
        && s[open + 2..s.len() - 2].parse::<f64>().is_ok()
    {
        return s[..open].trim_end();
    }
    s
}
