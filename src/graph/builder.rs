use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};

use crate::graph::GraphError;
use crate::registry::UnitRegistry;

/// The registry's dependency declarations as a petgraph `DiGraph`.
///
/// Edges point from a dependency to its dependent, so a topological order of
/// the graph is a valid execution order. Nodes are added in registration
/// order, so a node's index is its unit's registry position.
pub struct DependencyGraph {
    pub graph: DiGraph<String, ()>,
    pub node_indices: Vec<NodeIndex>,
    index: HashMap<String, NodeIndex>,
    missing: Vec<(String, String)>,
}

impl DependencyGraph {
    pub fn node(&self, id: &str) -> Option<NodeIndex> {
        self.index.get(id).copied()
    }

    pub fn unit(&self, idx: NodeIndex) -> &str {
        &self.graph[idx]
    }

    /// `(unit, dependency)` pairs whose dependency is not registered. These
    /// declarations have no edge in the graph.
    pub fn missing(&self) -> &[(String, String)] {
        &self.missing
    }
}

/// Build the dependency graph for every unit in the registry.
///
/// # Errors
///
/// Returns an `UnknownUnit` [`GraphError`] listing every dependency that
/// names an unregistered unit.
pub fn build(registry: &UnitRegistry) -> Result<DependencyGraph, GraphError> {
    let dg = build_partial(registry);
    if dg.missing.is_empty() {
        return Ok(dg);
    }

    let unknown = dg.missing.iter().map(|(_, dep)| dep.clone()).collect();
    let problems: Vec<String> = dg
        .missing
        .iter()
        .map(|(unit, dep)| format!("\"{unit}\" depends on \"{dep}\""))
        .collect();
    Err(GraphError::unknown(
        unknown,
        format!("unregistered dependencies: {}", problems.join(", ")),
    ))
}

/// Build the graph, leaving out declarations that name unregistered units.
/// They are kept in [`DependencyGraph::missing`] for callers that only care
/// about part of the graph.
pub fn build_partial(registry: &UnitRegistry) -> DependencyGraph {
    let mut graph = DiGraph::new();
    let mut index = HashMap::with_capacity(registry.len());
    let node_indices: Vec<NodeIndex> = registry
        .ids()
        .into_iter()
        .map(|id| {
            let idx = graph.add_node(id.to_owned());
            index.insert(id.to_owned(), idx);
            idx
        })
        .collect();

    let mut missing = Vec::new();
    for spec in registry.specs() {
        let to = index[&spec.id];
        for dep in &spec.depends_on {
            match index.get(dep) {
                Some(&from) => {
                    graph.add_edge(from, to, ());
                }
                None => missing.push((spec.id.clone(), dep.clone())),
            }
        }
    }

    DependencyGraph {
        graph,
        node_indices,
        index,
        missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphErrorKind;
    use crate::registry::testing::{content_registry, registry};

    #[test]
    fn builds_empty_graph() {
        let reg = UnitRegistry::new("empty");
        let dg = build(&reg).unwrap();
        assert_eq!(dg.graph.node_count(), 0);
        assert_eq!(dg.graph.edge_count(), 0);
    }

    #[test]
    fn builds_one_edge_per_dependency() {
        let dg = build(&content_registry()).unwrap();
        assert_eq!(dg.graph.node_count(), 4);
        // projects:1 + collections:2 + documents:3
        assert_eq!(dg.graph.edge_count(), 6);
    }

    #[test]
    fn node_lookup_by_id() {
        let dg = build(&content_registry()).unwrap();
        let idx = dg.node("collections").unwrap();
        assert_eq!(dg.unit(idx), "collections");
        assert!(dg.node("webhooks").is_none());
    }

    #[test]
    fn unknown_dependency_is_reported() {
        let reg = registry(&[("auth", &[]), ("documents", &["auth", "storage"])]);
        let err = build(&reg).err().unwrap();
        assert_eq!(err.kind, GraphErrorKind::UnknownUnit);
        assert_eq!(err.units, vec!["storage"]);
        assert!(err.message.contains("\"documents\" depends on \"storage\""));
    }

    #[test]
    fn partial_build_keeps_known_edges() {
        let reg = registry(&[("auth", &[]), ("documents", &["auth", "storage"])]);
        let dg = build_partial(&reg);
        assert_eq!(dg.graph.edge_count(), 1);
        assert_eq!(
            dg.missing(),
            &[("documents".to_owned(), "storage".to_owned())]
        );
        assert_eq!(dg.node("documents").unwrap().index(), 1);
    }

    #[test]
    fn topological_sort_respects_dependencies() {
        use petgraph::algo::toposort;
        let dg = build(&content_registry()).unwrap();
        let sorted = toposort(&dg.graph, None).expect("acyclic");
        let names: Vec<&str> = sorted.iter().map(|i| dg.unit(*i)).collect();
        assert_eq!(names, vec!["auth", "projects", "collections", "documents"]);
    }
}
