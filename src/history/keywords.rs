use crate::registry::UnitRegistry;

/// Attributes free-text check names to units by keyword.
///
/// Each unit contributes its declared keywords, or its id when it declares
/// none. Matching is a case-insensitive substring test, so it is best-effort.
#[derive(Debug, Clone, Default)]
pub struct KeywordMatcher {
    entries: Vec<(String, Vec<String>)>,
}

impl KeywordMatcher {
    pub fn from_registry(registry: &UnitRegistry) -> Self {
        let entries = registry
            .specs()
            .map(|spec| {
                let keywords = if spec.keywords.is_empty() {
                    vec![spec.id.to_lowercase()]
                } else {
                    spec.keywords
                        .iter()
                        .map(|k| k.trim().to_lowercase())
                        .filter(|k| !k.is_empty())
                        .collect()
                };
                (spec.id.clone(), keywords)
            })
            .collect();
        Self { entries }
    }

    /// Ids of every unit with a keyword contained in `check_name`, in
    /// registry order.
    pub fn units_for(&self, check_name: &str) -> Vec<String> {
        let name = check_name.to_lowercase();
        self.entries
            .iter()
            .filter(|(_, keywords)| keywords.iter().any(|k| name.contains(k.as_str())))
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::testing::{FakeUnit, Script};
    use crate::registry::unit::UnitSpec;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn unit(spec: UnitSpec) -> Box<FakeUnit> {
        Box::new(FakeUnit {
            spec,
            script: Script::Checks {
                passed: 1,
                failed: 0,
            },
            calls: Rc::new(RefCell::new(Vec::new())),
        })
    }

    fn matcher() -> KeywordMatcher {
        let mut reg = UnitRegistry::new("content");
        reg.register(unit(UnitSpec::new("auth").keywords(["login", "token"])))
            .unwrap();
        reg.register(unit(UnitSpec::new("documents").keywords(["Document"])))
            .unwrap();
        reg.register(unit(UnitSpec::new("webhooks"))).unwrap();
        KeywordMatcher::from_registry(&reg)
    }

    #[test]
    fn matches_declared_keywords_case_insensitively() {
        let m = matcher();
        assert_eq!(m.units_for("LOGIN with expired password"), vec!["auth"]);
        assert_eq!(m.units_for("create document draft"), vec!["documents"]);
    }

    #[test]
    fn unit_without_keywords_matches_its_id() {
        assert_eq!(matcher().units_for("Webhooks retry delivery"), vec!["webhooks"]);
    }

    #[test]
    fn one_name_can_match_several_units() {
        assert_eq!(
            matcher().units_for("token scoped to document"),
            vec!["auth", "documents"]
        );
    }

    #[test]
    fn no_match_is_empty() {
        assert!(matcher().units_for("health endpoint").is_empty());
    }
}
