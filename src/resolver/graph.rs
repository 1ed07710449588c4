//! The module dependency graph.
//!
//! An edge `a -> b` means module `a` needs module `b`. Every edge carries
//! the strongest [`DependencyKind`] that produced it, which decides how
//! readily it is dropped when a cycle has to be broken.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use indexmap::IndexMap;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::core::{DependencyKind, Module};
use crate::util::config::LayoutConfig;

/// Suffix of modules that generate bindings for a sibling module.
pub const ADAPTBX_SUFFIX: &str = "_adaptbx";

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<String, DependencyKind>,
    nodes: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph for `modules` and break every cycle in it.
    pub fn build(modules: &IndexMap<String, Module>, layout: &LayoutConfig) -> Self {
        let mut graph = DependencyGraph::new();
        for name in modules.keys() {
            graph.add_node(name);
        }

        for module in modules.values() {
            for required in &module.required {
                let kind = module
                    .config
                    .kind_of_aliased(required, &layout.module_aliases)
                    .unwrap_or(DependencyKind::Build);
                graph.add_edge(&module.name, required, kind);
            }
            if module.name != layout.root_module {
                graph.add_edge(&module.name, &layout.root_module, DependencyKind::Build);
            }

            let missing: Vec<&str> = module
                .required
                .iter()
                .filter(|name| !modules.contains_key(*name))
                .map(String::as_str)
                .collect();
            if !missing.is_empty() {
                tracing::warn!("{} has missing dependency: {}", module.name, missing.join(", "));
            }
        }

        for (from, to) in &layout.corrective_edges {
            graph.add_edge(from, to, DependencyKind::Build);
        }

        // `X` usually also means `X_adaptbx`
        for (from, to, kind) in graph.edges() {
            let adaptbx = format!("{}{}", to, ADAPTBX_SUFFIX);
            if graph.contains_node(&adaptbx) && from != adaptbx && !graph.contains_edge(&from, &adaptbx) {
                tracing::debug!("Adding extra adaptbx edge {}, {}", from, adaptbx);
                graph.add_edge(&from, &adaptbx, kind);
            }
        }

        graph.break_cycles();
        graph
    }

    pub fn add_node(&mut self, name: &str) -> NodeIndex {
        if let Some(&index) = self.nodes.get(name) {
            return index;
        }
        let index = self.graph.add_node(name.to_string());
        self.nodes.insert(name.to_string(), index);
        index
    }

    /// Add `from -> to`, creating missing nodes. An existing edge keeps the
    /// stronger of the two kinds.
    pub fn add_edge(&mut self, from: &str, to: &str, kind: DependencyKind) {
        let a = self.add_node(from);
        let b = self.add_node(to);
        match self.graph.find_edge(a, b) {
            Some(edge) => {
                let weight = &mut self.graph[edge];
                *weight = (*weight).min(kind);
            }
            None => {
                self.graph.add_edge(a, b, kind);
            }
        }
    }

    pub fn remove_edge(&mut self, from: &str, to: &str) -> bool {
        let (Some(&a), Some(&b)) = (self.nodes.get(from), self.nodes.get(to)) else {
            return false;
        };
        match self.graph.find_edge(a, b) {
            Some(edge) => {
                self.graph.remove_edge(edge);
                true
            }
            None => false,
        }
    }

    pub fn contains_node(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn contains_edge(&self, from: &str, to: &str) -> bool {
        match (self.nodes.get(from), self.nodes.get(to)) {
            (Some(&a), Some(&b)) => self.graph.contains_edge(a, b),
            _ => false,
        }
    }

    pub fn edge_kind(&self, from: &str, to: &str) -> Option<DependencyKind> {
        let (&a, &b) = (self.nodes.get(from)?, self.nodes.get(to)?);
        self.graph.find_edge(a, b).map(|edge| self.graph[edge])
    }

    /// All edges, sorted by endpoints.
    pub fn edges(&self) -> Vec<(String, String, DependencyKind)> {
        let mut edges: Vec<_> = self
            .graph
            .edge_indices()
            .filter_map(|edge| {
                let (a, b) = self.graph.edge_endpoints(edge)?;
                Some((self.graph[a].clone(), self.graph[b].clone(), self.graph[edge]))
            })
            .collect();
        edges.sort();
        edges
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Direct dependencies of `name`, sorted.
    pub fn dependencies_of(&self, name: &str) -> Vec<&str> {
        let Some(&index) = self.nodes.get(name) else {
            return Vec::new();
        };
        self.sorted_neighbors(index, Direction::Outgoing)
            .into_iter()
            .map(|n| self.graph[n].as_str())
            .collect()
    }

    fn sorted_neighbors(&self, index: NodeIndex, direction: Direction) -> Vec<NodeIndex> {
        let mut neighbors: Vec<NodeIndex> = self.graph.neighbors_directed(index, direction).collect();
        neighbors.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));
        neighbors.dedup();
        neighbors
    }

    fn sorted_nodes(&self) -> Vec<NodeIndex> {
        let mut nodes: Vec<NodeIndex> = self.graph.node_indices().collect();
        nodes.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));
        nodes
    }

    /// One cycle as its list of edges, or `None` if the graph is acyclic.
    ///
    /// The search visits nodes and successors in name order, so the same
    /// graph always yields the same cycle.
    pub fn find_cycle(&self) -> Option<Vec<(String, String)>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            OnStack,
            Done,
        }

        let mut marks = vec![Mark::Unvisited; self.graph.node_count()];
        for start in self.sorted_nodes() {
            if marks[start.index()] != Mark::Unvisited {
                continue;
            }
            // (node, successors, next successor)
            let mut stack: Vec<(NodeIndex, Vec<NodeIndex>, usize)> =
                vec![(start, self.sorted_neighbors(start, Direction::Outgoing), 0)];
            marks[start.index()] = Mark::OnStack;

            while let Some((node, successors, next)) = stack.last_mut() {
                let node = *node;
                let Some(&successor) = successors.get(*next) else {
                    marks[node.index()] = Mark::Done;
                    stack.pop();
                    continue;
                };
                *next += 1;
                match marks[successor.index()] {
                    Mark::Done => {}
                    Mark::OnStack => {
                        let from = stack.iter().position(|(n, _, _)| *n == successor).unwrap_or(0);
                        let path: Vec<NodeIndex> = stack[from..].iter().map(|(n, _, _)| *n).collect();
                        let mut cycle: Vec<(String, String)> = path
                            .windows(2)
                            .map(|pair| (self.graph[pair[0]].clone(), self.graph[pair[1]].clone()))
                            .collect();
                        cycle.push((self.graph[node].clone(), self.graph[successor].clone()));
                        return Some(cycle);
                    }
                    Mark::Unvisited => {
                        marks[successor.index()] = Mark::OnStack;
                        let next_successors = self.sorted_neighbors(successor, Direction::Outgoing);
                        stack.push((successor, next_successors, 0));
                    }
                }
            }
        }
        None
    }

    /// Remove edges until the graph is acyclic. Returns the removed edges.
    ///
    /// Each round removes the most breakable edge of one cycle, the
    /// lexicographically smallest on a tie.
    pub fn break_cycles(&mut self) -> Vec<(String, String, DependencyKind)> {
        let mut removed = Vec::new();
        while let Some(cycle) = self.find_cycle() {
            let names: Vec<&str> = cycle.iter().map(|(from, _)| from.as_str()).collect();
            tracing::debug!("Cycle found in dependency graph: {}", names.join(" → "));

            let weakest = cycle
                .iter()
                .filter_map(|(from, to)| {
                    let kind = self.edge_kind(from, to)?;
                    tracing::debug!(". Edge ({}, {}) priority = {:?}", from, to, kind);
                    Some((Reverse(kind), from, to))
                })
                .min()
                .map(|(Reverse(kind), from, to)| (from.clone(), to.clone(), kind));
            let Some((from, to, kind)) = weakest else {
                break;
            };

            tracing::info!(
                "Resolving cycle by removing dependency {}={} from {}",
                kind.manifest_key(),
                to,
                from
            );
            self.remove_edge(&from, &to);
            removed.push((from, to, kind));
        }
        removed
    }

    /// Modules in processing order: every module after all of its
    /// dependencies. Among ready modules the lexicographically smallest
    /// dependent is placed last, mirroring a reversed lexicographic
    /// topological sort.
    pub fn order(&self) -> Vec<String> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|n| self.sorted_neighbors(n, Direction::Incoming).len())
            .collect();
        let mut ready: BinaryHeap<Reverse<(&str, NodeIndex)>> = self
            .graph
            .node_indices()
            .filter(|n| in_degree[n.index()] == 0)
            .map(|n| Reverse((self.graph[n].as_str(), n)))
            .collect();

        let mut sorted = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse((name, node))) = ready.pop() {
            sorted.push(name.to_string());
            for successor in self.sorted_neighbors(node, Direction::Outgoing) {
                in_degree[successor.index()] -= 1;
                if in_degree[successor.index()] == 0 {
                    ready.push(Reverse((self.graph[successor].as_str(), successor)));
                }
            }
        }
        sorted.reverse();
        sorted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::DistFixture;
    use crate::resolver::discovery::find_modules;

    fn edge_graph(edges: &[(&str, &str, DependencyKind)]) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for (from, to, kind) in edges {
            graph.add_edge(from, to, *kind);
        }
        graph
    }

    #[test]
    fn test_order_puts_dependencies_first() {
        let graph = edge_graph(&[
            ("b", "a", DependencyKind::Build),
            ("c", "b", DependencyKind::Use),
            ("d", "a", DependencyKind::Build),
        ]);
        let order = graph.order();
        let pos = |name: &str| order.iter().position(|n| n == name).unwrap();
        assert_eq!(order.len(), 4);
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("c"));
        assert!(pos("a") < pos("d"));
    }

    #[test]
    fn test_order_is_reversed_lexicographic_topological_sort() {
        let graph = edge_graph(&[
            ("x", "root", DependencyKind::Build),
            ("y", "root", DependencyKind::Build),
            ("z", "root", DependencyKind::Build),
        ]);
        assert_eq!(graph.order(), vec!["root", "z", "y", "x"]);
    }

    #[test]
    fn test_break_cycle_removes_most_breakable_edge() {
        let mut graph = edge_graph(&[
            ("a", "b", DependencyKind::Build),
            ("b", "c", DependencyKind::Optional),
            ("c", "a", DependencyKind::Use),
        ]);
        let removed = graph.break_cycles();
        assert_eq!(removed, vec![("b".to_string(), "c".to_string(), DependencyKind::Optional)]);
        assert!(graph.find_cycle().is_none());
        assert!(graph.contains_edge("a", "b"));
        assert!(graph.contains_edge("c", "a"));
    }

    #[test]
    fn test_break_cycle_tie_uses_smallest_edge() {
        let mut graph = edge_graph(&[
            ("m", "n", DependencyKind::Use),
            ("n", "m", DependencyKind::Use),
        ]);
        let removed = graph.break_cycles();
        assert_eq!(removed.len(), 1);
        assert_eq!((removed[0].0.as_str(), removed[0].1.as_str()), ("m", "n"));
        assert!(graph.contains_edge("n", "m"));
    }

    #[test]
    fn test_existing_edge_keeps_strongest_kind() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("a", "b", DependencyKind::Optional);
        graph.add_edge("a", "b", DependencyKind::Use);
        graph.add_edge("a", "b", DependencyKind::Optional);
        assert_eq!(graph.edge_kind("a", "b"), Some(DependencyKind::Use));
        assert_eq!(graph.edges().len(), 1);
    }

    #[test]
    fn test_build_from_distribution() {
        let fixture = DistFixture::new()
            .module("libtbx", Some("{}"))
            .module(
                "cctbx_project/scitbx",
                Some("{'modules_required_for_build': ['boost'], 'optional_modules': ['cctbx']}"),
            )
            .module(
                "cctbx_project/cctbx",
                Some("{'modules_required_for_use': ['scitbx']}"),
            )
            .module("cctbx_project/boost_adaptbx", Some("{}"))
            .module("cctbx_project/omptbx", Some("{}"));
        let layout = LayoutConfig::default();
        let modules = find_modules(fixture.path(), &layout).unwrap();
        let graph = DependencyGraph::build(&modules, &layout);

        // alias applied
        assert!(graph.contains_edge("scitbx", "boost_adaptbx"));
        assert!(!graph.contains_node("boost"));
        // root and corrective edges
        assert!(graph.contains_edge("cctbx", "libtbx"));
        assert!(!graph.contains_edge("libtbx", "libtbx"));
        assert!(graph.contains_edge("scitbx", "omptbx"));
        // the optional half of the scitbx/cctbx cycle goes
        assert!(!graph.contains_edge("scitbx", "cctbx"));
        assert!(graph.contains_edge("cctbx", "scitbx"));

        let order = graph.order();
        assert_eq!(order.first().map(String::as_str), Some("libtbx"));
        let pos = |name: &str| order.iter().position(|n| n == name).unwrap();
        assert!(pos("scitbx") < pos("cctbx"));
        assert!(pos("omptbx") < pos("scitbx"));
    }

    #[test]
    fn test_adaptbx_edges_are_added() {
        let mut modules = IndexMap::new();
        let fixture = DistFixture::new()
            .module("libtbx", None)
            .module("annlib_adaptbx", None)
            .module("mmtbx", Some("{'modules_required_for_build': ['spotfinder']}"))
            .module("spotfinder", None)
            .module("spotfinder_adaptbx", None);
        let layout = LayoutConfig {
            corrective_edges: Vec::new(),
            ..LayoutConfig::default()
        };
        for name in ["libtbx", "annlib_adaptbx", "mmtbx", "spotfinder", "spotfinder_adaptbx"] {
            let module = Module::open(name, name, fixture.path(), &layout.module_aliases).unwrap();
            modules.insert(name.to_string(), module);
        }
        let graph = DependencyGraph::build(&modules, &layout);
        assert_eq!(graph.edge_kind("mmtbx", "spotfinder_adaptbx"), Some(DependencyKind::Build));
        assert!(!graph.contains_edge("spotfinder_adaptbx", "spotfinder_adaptbx"));
    }
}
