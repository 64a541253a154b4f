use std::collections::BTreeMap;
use std::time::Duration;

use crate::runner::result::CheckResult;
use crate::runner::surface::ExecutionSurface;

/// Prefix of a stdout line that publishes a fixture value.
pub const FIXTURE_PREFIX: &str = "::fixture ";

/// Values provisioned during a run (session tokens, project ids) that later
/// units read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fixtures {
    values: BTreeMap<String, String>,
}

impl Fixtures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn extend(&mut self, values: impl IntoIterator<Item = (String, String)>) {
        self.values.extend(values);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Substitute `{key}` placeholders with fixture values.
    ///
    /// # Errors
    ///
    /// Returns the names of placeholders with no recorded fixture.
    pub fn render(&self, template: &str) -> Result<String, Vec<String>> {
        let mut out = String::with_capacity(template.len());
        let mut missing = Vec::new();
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) if is_placeholder(&after[..close]) => {
                    let key = &after[..close];
                    match self.get(key) {
                        Some(value) => out.push_str(value),
                        None => missing.push(key.to_owned()),
                    }
                    rest = &after[close + 1..];
                }
                Some(_) => {
                    out.push('{');
                    rest = after;
                }
                None => {
                    out.push_str(&rest[open..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);

        if missing.is_empty() {
            Ok(out)
        } else {
            Err(missing)
        }
    }
}

fn is_placeholder(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Parse `::fixture key=value` lines out of command output.
pub fn extract_fixtures(stdout: &str) -> Vec<(String, String)> {
    stdout
        .lines()
        .filter_map(|line| line.trim().strip_prefix(FIXTURE_PREFIX))
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_owned(), value.trim().to_owned()))
        })
        .collect()
}

/// Per-unit context handed to [`TestUnit::run`](crate::registry::unit::TestUnit::run).
///
/// Checks recorded here belong to this unit only; the orchestrator takes them
/// back with [`into_checks`](Self::into_checks) once the unit returns and
/// merges them into the run totals.
pub struct UnitContext<'a> {
    unit: String,
    checks: Vec<CheckResult>,
    pub fixtures: &'a mut Fixtures,
    pub surface: &'a mut dyn ExecutionSurface,
}

impl<'a> UnitContext<'a> {
    pub fn new(
        unit: impl Into<String>,
        fixtures: &'a mut Fixtures,
        surface: &'a mut dyn ExecutionSurface,
    ) -> Self {
        Self {
            unit: unit.into(),
            checks: Vec::new(),
            fixtures,
            surface,
        }
    }

    /// Id of the unit this context was created for.
    pub fn unit_id(&self) -> &str {
        &self.unit
    }

    pub fn pass(&mut self, name: &str, duration: Duration) {
        let check = CheckResult::passed(&self.unit, name, duration);
        self.checks.push(check);
    }

    pub fn fail(&mut self, name: &str, duration: Duration, error: impl Into<String>) {
        let check = CheckResult::failed(&self.unit, name, duration, error);
        self.checks.push(check);
    }

    pub fn checks(&self) -> &[CheckResult] {
        &self.checks
    }

    pub fn failed_checks(&self) -> usize {
        self.checks.iter().filter(|c| c.is_failed()).count()
    }

    pub fn into_checks(self) -> Vec<CheckResult> {
        self.checks
    }
}
