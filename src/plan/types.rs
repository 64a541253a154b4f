use serde::{Deserialize, Serialize};

/// A resolved execution plan, ready for output or execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub plan: PlanMetadata,
    pub steps: Vec<PlanStep>,
}

/// Metadata about the plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanMetadata {
    pub suite: String,
    /// The ids that were asked for, before dependency closure.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requested: Vec<String>,
}

/// A single unit in the plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanStep {
    pub order: usize,
    pub unit: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl ExecutionPlan {
    /// Unit ids in execution order.
    pub fn units(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.unit.as_str())
    }

    pub fn contains(&self, unit: &str) -> bool {
        self.steps.iter().any(|s| s.unit == unit)
    }

    pub fn position(&self, unit: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.unit == unit)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
