use tracing::warn;

use crate::runner::breaker::DEFAULT_MAX_FAILURE_RATE;

pub const ENV_MAX_FAILURE_RATE: &str = "SUITECHECK_MAX_FAILURE_RATE";
pub const ENV_CRITICAL_MODE: &str = "SUITECHECK_CRITICAL_MODE";
pub const ENV_VERBOSE: &str = "SUITECHECK_VERBOSE";
pub const ENV_HIDE_PASSED: &str = "SUITECHECK_HIDE_PASSED";
pub const ENV_STOP_ON_FIRST_FAILURE: &str = "SUITECHECK_STOP_ON_FIRST_FAILURE";
pub const ENV_BASE_URL: &str = "SUITECHECK_BASE_URL";

/// Settings read from the environment. `None` means the variable was unset
/// (or unparseable) and the manifest value, if any, applies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    pub max_failure_rate: Option<f64>,
    pub critical_mode: Option<bool>,
    pub verbose: bool,
    pub hide_passed: bool,
    pub stop_on_first_failure: Option<bool>,
    pub base_url: Option<String>,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let max_failure_rate = lookup(ENV_MAX_FAILURE_RATE).and_then(|raw| {
            match raw.trim().trim_end_matches('%').parse::<f64>() {
                Ok(rate) if valid_failure_rate(rate) => Some(rate),
                _ => {
                    warn!(variable = ENV_MAX_FAILURE_RATE, value = %raw, "ignoring invalid failure rate");
                    None
                }
            }
        });

        Self {
            max_failure_rate,
            critical_mode: flag(&lookup, ENV_CRITICAL_MODE),
            verbose: flag(&lookup, ENV_VERBOSE).unwrap_or(false),
            hide_passed: flag(&lookup, ENV_HIDE_PASSED).unwrap_or(false),
            stop_on_first_failure: flag(&lookup, ENV_STOP_ON_FIRST_FAILURE),
            base_url: lookup(ENV_BASE_URL).filter(|url| !url.trim().is_empty()),
        }
    }

    /// Whether `SUITECHECK_VERBOSE` asks for debug logging. Read on its own,
    /// without warnings, so logging can be set up before the rest of the
    /// settings are parsed.
    pub fn verbose_from_env() -> bool {
        Self::verbose_from_lookup(|key| std::env::var(key).ok())
    }

    pub fn verbose_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> bool {
        lookup(ENV_VERBOSE)
            .and_then(|raw| parse_flag(&raw))
            .unwrap_or(false)
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    let raw = lookup(key)?;
    let parsed = parse_flag(&raw);
    if parsed.is_none() {
        warn!(variable = key, value = %raw, "ignoring invalid boolean");
    }
    parsed
}

/// Failure rates are percentages; NaN and anything outside 0..=100 is
/// rejected wherever a rate comes from.
pub fn valid_failure_rate(rate: f64) -> bool {
    (0.0..=100.0).contains(&rate)
}

/// Pick the first value that is set: command line, then environment, then
/// manifest, then the default.
pub fn layered<T>(cli: Option<T>, env: Option<T>, manifest: Option<T>, default: T) -> T {
    cli.or(env).or(manifest).unwrap_or(default)
}

/// Failure-rate threshold after layering.
pub fn max_failure_rate(cli: Option<f64>, settings: &Settings, manifest: Option<f64>) -> f64 {
    layered(
        cli,
        settings.max_failure_rate,
        manifest,
        DEFAULT_MAX_FAILURE_RATE,
    )
}
