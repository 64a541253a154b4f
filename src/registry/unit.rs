use std::fmt;

use serde::{Deserialize, Serialize};

use crate::runner::context::UnitContext;
use crate::runner::result::UnitOutcome;

/// Shared fixtures a unit expects to exist before the run starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preconditions {
    #[serde(default)]
    pub session: bool,
    #[serde(default)]
    pub project: bool,
}

impl Preconditions {
    pub const NONE: Self = Self {
        session: false,
        project: false,
    };

    pub const ALL: Self = Self {
        session: true,
        project: true,
    };

    /// Union of two flag sets.
    pub fn merge(self, other: Self) -> Self {
        Self {
            session: self.session || other.session,
            project: self.project || other.project,
        }
    }

    pub fn includes(&self, requirement: Requirement) -> bool {
        match requirement {
            Requirement::Session => self.session,
            Requirement::Project => self.project,
        }
    }
}

/// A single shared fixture kind a setup step can provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Requirement {
    Session,
    Project,
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session => write!(f, "session"),
            Self::Project => write!(f, "project"),
        }
    }
}

/// Static metadata of a test unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSpec {
    pub id: String,
    pub name: String,
    pub depends_on: Vec<String>,
    pub requires: Preconditions,
    /// A failure of this unit makes the rest of the run meaningless.
    pub critical: bool,
    /// Substrings that identify this unit in free-text failure logs.
    pub keywords: Vec<String>,
    /// Extra explanation printed when a critical failure aborts the run.
    pub diagnostic: Option<String>,
}

impl UnitSpec {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            depends_on: Vec::new(),
            requires: Preconditions::NONE,
            critical: false,
            keywords: Vec::new(),
            diagnostic: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn requires(mut self, requires: Preconditions) -> Self {
        self.requires = requires;
        self
    }

    pub fn critical(mut self, diagnostic: Option<String>) -> Self {
        self.critical = true;
        self.diagnostic = diagnostic;
        self
    }

    pub fn keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }
}

/// A named, independently runnable test group.
///
/// The orchestrator hands every unit a fresh [`UnitContext`]; checks are
/// recorded on the context and `run` returns [`UnitOutcome::Failed`] only
/// when the unit as a whole could not complete.
pub trait TestUnit {
    fn spec(&self) -> &UnitSpec;

    fn run(&self, ctx: &mut UnitContext<'_>) -> UnitOutcome;

    fn id(&self) -> &str {
        &self.spec().id
    }

    fn name(&self) -> &str {
        &self.spec().name
    }

    fn dependencies(&self) -> &[String] {
        &self.spec().depends_on
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_defaults_name_to_id() {
        let spec = UnitSpec::new("auth");
        assert_eq!(spec.name, "auth");
        assert!(spec.depends_on.is_empty());
        assert_eq!(spec.requires, Preconditions::NONE);
        assert!(!spec.critical);
    }

    #[test]
    fn spec_builder_sets_fields() {
        let spec = UnitSpec::new("documents")
            .named("Document CRUD")
            .depends_on(["auth", "projects"])
            .requires(Preconditions {
                session: true,
                project: true,
            })
            .keywords(["document"]);
        assert_eq!(spec.name, "Document CRUD");
        assert_eq!(spec.depends_on, vec!["auth", "projects"]);
        assert!(spec.requires.session);
        assert_eq!(spec.keywords, vec!["document"]);
    }

    #[test]
    fn critical_spec_keeps_diagnostic() {
        let spec = UnitSpec::new("auth").critical(Some("no session, no tests".into()));
        assert!(spec.critical);
        assert_eq!(spec.diagnostic.as_deref(), Some("no session, no tests"));
    }

    #[test]
    fn preconditions_merge_is_union() {
        let a = Preconditions {
            session: true,
            project: false,
        };
        let b = Preconditions {
            session: false,
            project: true,
        };
        assert_eq!(a.merge(b), Preconditions::ALL);
        assert_eq!(Preconditions::NONE.merge(Preconditions::NONE), Preconditions::NONE);
    }

    #[test]
    fn preconditions_includes_requirement() {
        let p = Preconditions {
            session: true,
            project: false,
        };
        assert!(p.includes(Requirement::Session));
        assert!(!p.includes(Requirement::Project));
    }

    #[test]
    fn requirement_display() {
        assert_eq!(Requirement::Session.to_string(), "session");
        assert_eq!(Requirement::Project.to_string(), "project");
    }
}
