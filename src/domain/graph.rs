//! Dependency graphs and lookup index
//!
//! [`DependencyGraph`] holds one directed dependency graph (groups or
//! services) on top of petgraph. [`GraphIndex`] bundles both graphs with the
//! O(1) lookup maps the validator, planner and CLI need. Both are pure
//! functions of a snapshot and are rebuilt whenever a new one is committed.

use std::collections::{HashMap, HashSet};

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use thiserror::Error;

use super::snapshot::Config;

#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),
}

/// A directed dependency graph over string IDs
///
/// The edge direction is: dependency -> dependent. Self-edges and cycles are
/// allowed so that the validator can find and report them.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    /// The underlying directed graph
    graph: DiGraph<String, ()>,

    /// Map from ID to node index
    node_map: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    /// Creates an empty dependency graph
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            node_map: HashMap::new(),
        }
    }

    /// Adds a node; adding an existing ID is a no-op
    pub fn add_node(&mut self, id: &str) {
        if !self.node_map.contains_key(id) {
            let idx = self.graph.add_node(id.to_string());
            self.node_map.insert(id.to_string(), idx);
        }
    }

    /// Adds a dependency edge: `node` depends on `depends_on`
    ///
    /// Duplicate edges are collapsed.
    pub fn add_dependency(&mut self, node: &str, depends_on: &str) -> Result<(), GraphError> {
        let node_idx = *self
            .node_map
            .get(node)
            .ok_or_else(|| GraphError::NodeNotFound(node.to_string()))?;

        let dep_idx = *self
            .node_map
            .get(depends_on)
            .ok_or_else(|| GraphError::NodeNotFound(depends_on.to_string()))?;

        if self.graph.find_edge(dep_idx, node_idx).is_none() {
            self.graph.add_edge(dep_idx, node_idx, ());
        }

        Ok(())
    }

    fn neighbors_in_order(&self, idx: NodeIndex, direction: Direction) -> Vec<NodeIndex> {
        // petgraph yields neighbors newest-first
        let mut out: Vec<_> = self.graph.neighbors_directed(idx, direction).collect();
        out.reverse();
        out
    }

    /// Returns the direct dependencies of a node, in declaration order
    pub fn dependencies(&self, id: &str) -> Vec<String> {
        let idx = match self.node_map.get(id) {
            Some(idx) => *idx,
            None => return vec![],
        };

        self.neighbors_in_order(idx, Direction::Incoming)
            .into_iter()
            .filter_map(|i| self.graph.node_weight(i).cloned())
            .collect()
    }

    /// Returns the direct dependents of a node (nodes that depend on it)
    pub fn dependents(&self, id: &str) -> Vec<String> {
        let idx = match self.node_map.get(id) {
            Some(idx) => *idx,
            None => return vec![],
        };

        self.neighbors_in_order(idx, Direction::Outgoing)
            .into_iter()
            .filter_map(|i| self.graph.node_weight(i).cloned())
            .collect()
    }

    /// Returns every node reachable through dependency edges, including `id`
    pub fn dependency_closure(&self, id: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut stack = vec![id.to_string()];

        while let Some(current) = stack.pop() {
            if !self.contains(&current) || !seen.insert(current.clone()) {
                continue;
            }
            stack.extend(self.dependencies(&current));
        }

        seen
    }

    /// Returns true if the graph contains a cycle (self-edges included)
    pub fn has_cycle(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    /// Finds the first cycle by depth-first search
    ///
    /// Nodes are visited in insertion order and dependencies in declaration
    /// order. The returned path starts and ends with the repeated node, e.g.
    /// `[a, b, a]` for "a depends on b depends on a".
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut on_stack = HashSet::new();
        let mut path = Vec::new();

        for idx in self.graph.node_indices() {
            if visited.contains(&idx) {
                continue;
            }
            if let Some(cycle) = self.dfs(idx, &mut visited, &mut on_stack, &mut path) {
                return Some(cycle);
            }
        }

        None
    }

    fn dfs(
        &self,
        idx: NodeIndex,
        visited: &mut HashSet<NodeIndex>,
        on_stack: &mut HashSet<NodeIndex>,
        path: &mut Vec<NodeIndex>,
    ) -> Option<Vec<String>> {
        if on_stack.contains(&idx) {
            let start = path.iter().position(|n| *n == idx).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..]
                .iter()
                .map(|n| self.graph[*n].clone())
                .collect();
            cycle.push(self.graph[idx].clone());
            return Some(cycle);
        }

        if !visited.insert(idx) {
            return None;
        }

        on_stack.insert(idx);
        path.push(idx);

        for dep in self.neighbors_in_order(idx, Direction::Incoming) {
            if let Some(cycle) = self.dfs(dep, visited, on_stack, path) {
                return Some(cycle);
            }
        }

        path.pop();
        on_stack.remove(&idx);
        None
    }

    /// Returns true if the graph contains the node
    pub fn contains(&self, id: &str) -> bool {
        self.node_map.contains_key(id)
    }

    /// Returns the number of nodes in the graph
    pub fn len(&self) -> usize {
        self.node_map.len()
    }

    /// Returns true if the graph is empty
    pub fn is_empty(&self) -> bool {
        self.node_map.is_empty()
    }

    /// Returns all node IDs in insertion order
    pub fn node_ids(&self) -> impl Iterator<Item = &String> {
        self.graph.node_indices().map(move |idx| &self.graph[idx])
    }
}

/// Lookup structures derived from one snapshot
#[derive(Debug, Default, Clone)]
pub struct GraphIndex {
    /// Service ID -> ID of the group that contains it
    service_group: HashMap<String, String>,

    /// Group ID -> IDs of its services, in group order
    group_services: HashMap<String, Vec<String>>,

    /// Group ID -> groups that directly depend on it
    group_dependents: HashMap<String, Vec<String>>,

    /// Service ID -> services that directly depend on it (required edges)
    service_dependents: HashMap<String, Vec<String>>,

    groups: DependencyGraph,

    /// Service graph restricted to required edges
    services: DependencyGraph,
}

impl GraphIndex {
    /// Builds the index from a snapshot
    ///
    /// Dangling references are skipped rather than reported; deciding whether
    /// they are acceptable is the validator's job.
    pub fn build(config: &Config) -> Self {
        let mut groups = DependencyGraph::new();
        let mut services = DependencyGraph::new();
        let mut service_group = HashMap::new();
        let mut group_services: HashMap<String, Vec<String>> = HashMap::new();

        // First pass: add all nodes
        for group in &config.groups {
            groups.add_node(&group.id);
            let members = group_services.entry(group.id.clone()).or_default();
            for service in &group.services {
                services.add_node(&service.id);
                members.push(service.id.clone());
                service_group
                    .entry(service.id.clone())
                    .or_insert_with(|| group.id.clone());
            }
        }

        // Second pass: add all edges
        for group in &config.groups {
            for dep in &group.dependencies {
                let _ = groups.add_dependency(&group.id, dep);
            }
            for service in &group.services {
                for dep in service.required_dependencies() {
                    let _ = services.add_dependency(&service.id, dep);
                }
            }
        }

        let group_dependents = groups
            .node_ids()
            .map(|id| (id.clone(), groups.dependents(id)))
            .collect();
        let service_dependents = services
            .node_ids()
            .map(|id| (id.clone(), services.dependents(id)))
            .collect();

        Self {
            service_group,
            group_services,
            group_dependents,
            service_dependents,
            groups,
            services,
        }
    }

    /// Returns the ID of the group containing a service
    pub fn group_of(&self, service_id: &str) -> Option<&str> {
        self.service_group.get(service_id).map(String::as_str)
    }

    /// Returns the service IDs of a group
    pub fn services_in(&self, group_id: &str) -> &[String] {
        self.group_services
            .get(group_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Returns groups that directly depend on a group
    pub fn dependent_groups(&self, group_id: &str) -> &[String] {
        self.group_dependents
            .get(group_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Returns services that directly require a service
    pub fn dependent_services(&self, service_id: &str) -> &[String] {
        self.service_dependents
            .get(service_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn group_graph(&self) -> &DependencyGraph {
        &self.groups
    }

    pub fn service_graph(&self) -> &DependencyGraph {
        &self.services
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DependencyConfig, Service, ServiceGroup};

    fn graph(edges: &[(&str, &str)], nodes: &[&str]) -> DependencyGraph {
        let mut g = DependencyGraph::new();
        for n in nodes {
            g.add_node(n);
        }
        for (node, dep) in edges {
            g.add_dependency(node, dep).unwrap();
        }
        g
    }

    #[test]
    fn empty_graph() {
        let g = DependencyGraph::new();
        assert!(g.is_empty());
        assert_eq!(g.len(), 0);
        assert!(g.find_cycle().is_none());
    }

    #[test]
    fn dependencies_keep_declaration_order() {
        let g = graph(&[("a", "b"), ("a", "c"), ("a", "d")], &["a", "b", "c", "d"]);
        assert_eq!(g.dependencies("a"), vec!["b", "c", "d"]);
        assert_eq!(g.dependents("c"), vec!["a"]);
    }

    #[test]
    fn duplicate_edges_collapse() {
        let g = graph(&[("a", "b"), ("a", "b")], &["a", "b"]);
        assert_eq!(g.dependencies("a"), vec!["b"]);
    }

    #[test]
    fn unknown_node_returns_error() {
        let mut g = DependencyGraph::new();
        g.add_node("a");
        assert_eq!(
            g.add_dependency("a", "zzz"),
            Err(GraphError::NodeNotFound("zzz".to_string()))
        );
    }

    #[test]
    fn find_two_node_cycle() {
        let g = graph(&[("a", "b"), ("b", "a")], &["a", "b"]);
        assert!(g.has_cycle());
        assert_eq!(g.find_cycle().unwrap(), vec!["a", "b", "a"]);
    }

    #[test]
    fn cycle_path_excludes_lead_in() {
        // x -> a -> b -> c -> a
        let g = graph(
            &[("x", "a"), ("a", "b"), ("b", "c"), ("c", "a")],
            &["x", "a", "b", "c"],
        );
        assert_eq!(g.find_cycle().unwrap(), vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let g = graph(&[("a", "a")], &["a"]);
        assert_eq!(g.find_cycle().unwrap(), vec!["a", "a"]);
    }

    #[test]
    fn diamond_is_acyclic() {
        let g = graph(
            &[("b", "a"), ("c", "a"), ("d", "b"), ("d", "c")],
            &["a", "b", "c", "d"],
        );
        assert!(!g.has_cycle());
        assert!(g.find_cycle().is_none());
    }

    #[test]
    fn dependency_closure_is_transitive() {
        let g = graph(&[("c", "b"), ("b", "a")], &["a", "b", "c", "z"]);
        let closure = g.dependency_closure("c");
        assert_eq!(closure.len(), 3);
        assert!(closure.contains("a"));
        assert!(!closure.contains("z"));
    }

    #[test]
    fn index_lookups() {
        let mut db = ServiceGroup::new("db", "Database");
        db.services.push(Service::new("pg", "Postgres", "db", "/bin/pg"));
        let mut api = ServiceGroup::new("api", "API");
        api.dependencies = vec!["db".to_string()];
        let mut server = Service::new("server", "Server", "api", "/bin/server");
        server.dependency_configs = Some(vec![
            DependencyConfig::required("pg"),
            DependencyConfig::conflict("ghost"),
        ]);
        api.services.push(server);

        let config = Config {
            groups: vec![db, api],
            ..Config::default()
        };
        let index = GraphIndex::build(&config);

        assert_eq!(index.group_of("server"), Some("api"));
        assert_eq!(index.group_of("ghost"), None);
        assert_eq!(index.services_in("db"), ["pg".to_string()]);
        assert_eq!(index.dependent_groups("db"), ["api".to_string()]);
        assert_eq!(index.dependent_services("pg"), ["server".to_string()]);
        assert!(index.services_in("nope").is_empty());
    }

    #[test]
    fn index_skips_dangling_edges() {
        let mut g = ServiceGroup::new("g", "G");
        g.dependencies = vec!["missing".to_string()];
        let config = Config {
            groups: vec![g],
            ..Config::default()
        };

        let index = GraphIndex::build(&config);
        assert!(index.group_graph().dependencies("g").is_empty());
    }

    #[test]
    fn performance_500_node_chain() {
        use std::time::Instant;

        let ids: Vec<String> = (0..500).map(|i| format!("n{}", i)).collect();
        let mut g = DependencyGraph::new();
        for id in &ids {
            g.add_node(id);
        }
        for i in 1..500 {
            g.add_dependency(&ids[i], &ids[i - 1]).unwrap();
        }

        let start = Instant::now();
        assert!(g.find_cycle().is_none());
        assert_eq!(g.dependency_closure("n499").len(), 500);
        let duration = start.elapsed();

        assert!(duration.as_millis() < 100, "Cycle check took {:?}", duration);
    }
}
