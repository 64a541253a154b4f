use std::collections::HashSet;

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::NodeIndex;
use petgraph::visit::Dfs;

use crate::graph::GraphError;
use crate::graph::builder::{DependencyGraph, build};
use crate::registry::UnitRegistry;

/// Check the whole registry: every dependency must be registered and the
/// declarations must be acyclic.
///
/// # Errors
///
/// Returns `UnknownUnit` for unregistered dependencies and `DependencyCycle`
/// (with the cycle path) for cyclic declarations.
pub fn validate(registry: &UnitRegistry) -> Result<DependencyGraph, GraphError> {
    let dg = build(registry)?;
    if toposort(&dg.graph, None).is_err() {
        let path = find_cycle(&dg).unwrap_or_default();
        return Err(GraphError::cycle(path));
    }
    Ok(dg)
}

/// Find a cycle, returned as a depends-on chain that starts and ends on the
/// same unit. Returns `None` if the graph is acyclic.
pub fn find_cycle(dg: &DependencyGraph) -> Option<Vec<String>> {
    find_cycle_from(dg, dg.node_indices.iter().copied())
}

/// Like [`find_cycle`], but only follows dependencies of `starts`.
pub fn find_cycle_from(
    dg: &DependencyGraph,
    starts: impl IntoIterator<Item = NodeIndex>,
) -> Option<Vec<String>> {
    let mut visited = HashSet::new();
    let mut in_stack = HashSet::new();
    let mut stack_path = Vec::new();

    for start in starts {
        if !visited.contains(&start)
            && let Some(cycle) =
                dfs_find_cycle(dg, start, &mut visited, &mut in_stack, &mut stack_path)
        {
            return Some(cycle);
        }
    }

    None
}

fn dfs_find_cycle(
    dg: &DependencyGraph,
    node: NodeIndex,
    visited: &mut HashSet<NodeIndex>,
    in_stack: &mut HashSet<NodeIndex>,
    stack_path: &mut Vec<NodeIndex>,
) -> Option<Vec<String>> {
    visited.insert(node);
    in_stack.insert(node);
    stack_path.push(node);

    // Incoming edges come from the unit's dependencies.
    for dep in dg.graph.neighbors_directed(node, Direction::Incoming) {
        if !visited.contains(&dep) {
            if let Some(cycle) = dfs_find_cycle(dg, dep, visited, in_stack, stack_path) {
                return Some(cycle);
            }
        } else if in_stack.contains(&dep) {
            let cycle_start = stack_path.iter().position(|&n| n == dep)?;
            let mut cycle: Vec<String> = stack_path[cycle_start..]
                .iter()
                .map(|&idx| dg.unit(idx).to_owned())
                .collect();
            cycle.push(dg.unit(dep).to_owned());
            return Some(cycle);
        }
    }

    stack_path.pop();
    in_stack.remove(&node);
    None
}

/// Units with no dependencies.
pub fn root_units(dg: &DependencyGraph) -> Vec<&str> {
    dg.node_indices
        .iter()
        .filter(|&&idx| {
            dg.graph
                .neighbors_directed(idx, Direction::Incoming)
                .next()
                .is_none()
        })
        .map(|&idx| dg.unit(idx))
        .collect()
}

/// Units nothing else depends on.
pub fn leaf_units(dg: &DependencyGraph) -> Vec<&str> {
    dg.node_indices
        .iter()
        .filter(|&&idx| {
            dg.graph
                .neighbors_directed(idx, Direction::Outgoing)
                .next()
                .is_none()
        })
        .map(|&idx| dg.unit(idx))
        .collect()
}

/// Every unit that depends on `id`, directly or transitively, in registry
/// order. Unknown ids have no dependents.
pub fn dependents<'g>(dg: &'g DependencyGraph, id: &str) -> Vec<&'g str> {
    let Some(start) = dg.node(id) else {
        return Vec::new();
    };
    let mut reached = HashSet::new();
    let mut dfs = Dfs::new(&dg.graph, start);
    while let Some(idx) = dfs.next(&dg.graph) {
        if idx != start {
            reached.insert(idx);
        }
    }
    dg.node_indices
        .iter()
        .filter(|idx| reached.contains(idx))
        .map(|&idx| dg.unit(idx))
        .collect()
}
