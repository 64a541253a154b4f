use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};

use petgraph::Direction;
use petgraph::graph::NodeIndex;
use petgraph::visit::{Dfs, Reversed};
use tracing::debug;

use crate::graph::GraphError;
use crate::graph::analysis::find_cycle_from;
use crate::graph::builder::{DependencyGraph, build_partial};
use crate::plan::types::{ExecutionPlan, PlanMetadata, PlanStep};
use crate::registry::UnitRegistry;
use crate::registry::unit::{Preconditions, UnitSpec};

/// Linearizes requested units into an [`ExecutionPlan`].
pub struct Resolver<'r> {
    registry: &'r UnitRegistry,
    dg: DependencyGraph,
    /// Indexed by node index, which is registry position.
    specs: Vec<&'r UnitSpec>,
}

impl<'r> Resolver<'r> {
    pub fn new(registry: &'r UnitRegistry) -> Self {
        Self {
            registry,
            dg: build_partial(registry),
            specs: registry.specs().collect(),
        }
    }

    fn spec(&self, idx: NodeIndex) -> &'r UnitSpec {
        self.specs[idx.index()]
    }

    /// Resolve a requested set into a dependency-closed execution plan.
    ///
    /// The plan is a function of the dependency closure alone: every unit
    /// follows all of its dependencies, and independent units keep registry
    /// order. Resolving a plan's own units again yields the same plan.
    ///
    /// # Errors
    ///
    /// Returns `UnknownUnit` if a requested or transitively required id is not
    /// registered, and `DependencyCycle` if the closure contains a cycle.
    pub fn resolve(&self, requested: &BTreeSet<String>) -> Result<ExecutionPlan, GraphError> {
        let closure = self.closure_nodes(requested)?;
        let order = self.stable_order(&closure)?;

        debug!(
            requested = requested.len(),
            resolved = order.len(),
            "resolved execution plan"
        );

        let steps = order
            .into_iter()
            .enumerate()
            .map(|(i, idx)| {
                let spec = self.spec(idx);
                PlanStep {
                    order: i + 1,
                    unit: spec.id.clone(),
                    name: spec.name.clone(),
                    depends_on: spec.depends_on.clone(),
                }
            })
            .collect();

        Ok(ExecutionPlan {
            plan: PlanMetadata {
                suite: self.registry.name().to_owned(),
                requested: requested.iter().cloned().collect(),
            },
            steps,
        })
    }

    /// Every unit the requested set needs, including the requested units.
    ///
    /// # Errors
    ///
    /// Returns `UnknownUnit` if a requested or transitively required id is not
    /// registered. Cycles are left to [`resolve`](Self::resolve).
    pub fn closure(&self, requested: &BTreeSet<String>) -> Result<HashSet<&'r str>, GraphError> {
        let nodes = self.closure_nodes(requested)?;
        Ok(nodes.into_iter().map(|idx| self.spec(idx).id.as_str()).collect())
    }

    fn closure_nodes(&self, requested: &BTreeSet<String>) -> Result<BTreeSet<NodeIndex>, GraphError> {
        let mut starts = Vec::with_capacity(requested.len());
        let mut unknown = Vec::new();
        for id in requested {
            match self.dg.node(id) {
                Some(idx) => starts.push(idx),
                None => unknown.push(id.clone()),
            }
        }
        if !unknown.is_empty() {
            let message = format!("not registered: {}", unknown.join(", "));
            return Err(GraphError::unknown(unknown, message));
        }

        // Edges run dependency -> dependent, so dependencies are upstream.
        let upstream = Reversed(&self.dg.graph);
        let mut closure = BTreeSet::new();
        let mut dfs = Dfs::empty(upstream);
        for start in starts {
            dfs.move_to(start);
            while let Some(idx) = dfs.next(upstream) {
                closure.insert(idx);
            }
        }

        let missing: Vec<&(String, String)> = self
            .dg
            .missing()
            .iter()
            .filter(|(unit, _)| self.dg.node(unit).is_some_and(|idx| closure.contains(&idx)))
            .collect();
        if !missing.is_empty() {
            let problems: Vec<String> = missing
                .iter()
                .map(|(unit, dep)| format!("\"{unit}\" depends on unregistered \"{dep}\""))
                .collect();
            return Err(GraphError::unknown(
                missing.into_iter().map(|(_, dep)| dep.clone()).collect(),
                problems.join(", "),
            ));
        }

        Ok(closure)
    }

    /// Kahn's algorithm over `closure`, ties broken by registry position.
    fn stable_order(&self, closure: &BTreeSet<NodeIndex>) -> Result<Vec<NodeIndex>, GraphError> {
        let graph = &self.dg.graph;
        let mut pending: HashMap<NodeIndex, usize> = HashMap::new();
        let mut ready = BinaryHeap::new();

        // A closure is dependency-closed, so every incoming edge is internal.
        for &idx in closure {
            match graph.neighbors_directed(idx, Direction::Incoming).count() {
                0 => ready.push(Reverse(idx)),
                deps => {
                    pending.insert(idx, deps);
                }
            }
        }

        let mut order = Vec::with_capacity(closure.len());
        while let Some(Reverse(idx)) = ready.pop() {
            order.push(idx);
            for dependent in graph.neighbors_directed(idx, Direction::Outgoing) {
                if let Some(count) = pending.get_mut(&dependent) {
                    *count -= 1;
                    if *count == 0 {
                        pending.remove(&dependent);
                        ready.push(Reverse(dependent));
                    }
                }
            }
        }

        if pending.is_empty() {
            return Ok(order);
        }
        let stuck: BTreeSet<NodeIndex> = pending.into_keys().collect();
        let path = find_cycle_from(&self.dg, stuck).unwrap_or_default();
        Err(GraphError::cycle(path))
    }

    /// Shared fixtures the selected units need before the run starts.
    ///
    /// Folds the units' declared flags, and also requires a session when any
    /// selected unit other than the auth unit depends on it, directly or
    /// transitively.
    ///
    /// # Errors
    ///
    /// Returns `UnknownUnit` if a selected id is not registered.
    pub fn initialization_requirements(
        &self,
        selected: &BTreeSet<String>,
    ) -> Result<Preconditions, GraphError> {
        let mut auth_dependents = HashSet::new();
        if let Some(auth) = self.dg.node(self.registry.auth_unit()) {
            let mut dfs = Dfs::new(&self.dg.graph, auth);
            while let Some(idx) = dfs.next(&self.dg.graph) {
                if idx != auth {
                    auth_dependents.insert(idx);
                }
            }
        }

        let mut requirements = Preconditions::NONE;
        for id in selected {
            let idx = self.dg.node(id).ok_or_else(|| {
                GraphError::unknown(vec![id.clone()], format!("not registered: {id}"))
            })?;
            requirements = requirements.merge(self.spec(idx).requires);
            if auth_dependents.contains(&idx) {
                requirements.session = true;
            }
        }

        Ok(requirements)
    }
}
