//! Dependency graph over task names, backed by petgraph.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use crate::{Error, Result};

/// Directed dependency graph over task names.
///
/// Edges point from a dependency to its dependents, so walking outgoing
/// edges answers "who is unblocked when this task completes".
#[derive(Debug)]
pub struct DepGraph {
    graph: DiGraph<String, ()>,
    name_to_node: HashMap<String, NodeIndex>,
}

impl DepGraph {
    /// Build a graph from the full task set and the dependency mapping
    /// `task -> [tasks it depends on]`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownDependencies`] if the mapping references a
    /// name (as key or value) that is not in `tasks`.
    pub fn build<'a, I>(tasks: I, deps: &BTreeMap<String, Vec<String>>) -> Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut graph = DiGraph::new();
        let mut name_to_node = HashMap::new();
        for name in tasks {
            if !name_to_node.contains_key(name) {
                let node = graph.add_node(name.to_string());
                name_to_node.insert(name.to_string(), node);
            }
        }

        let mut unknown = BTreeSet::new();
        for (task, dependencies) in deps {
            let Some(&task_node) = name_to_node.get(task) else {
                unknown.insert(task.clone());
                continue;
            };
            for dep in dependencies {
                match name_to_node.get(dep) {
                    Some(&dep_node) => {
                        graph.add_edge(dep_node, task_node, ());
                    }
                    None => {
                        unknown.insert(dep.clone());
                    }
                }
            }
        }
        if !unknown.is_empty() {
            return Err(Error::UnknownDependencies {
                unknown: unknown.into_iter().collect(),
            });
        }

        debug!(
            tasks = graph.node_count(),
            edges = graph.edge_count(),
            "built dependency graph"
        );
        Ok(Self {
            graph,
            name_to_node,
        })
    }

    /// Verify that the graph contains no dependency cycle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CycleDetected`] carrying the names of one offending
    /// cycle.
    pub fn ensure_acyclic(&self) -> Result<()> {
        for component in tarjan_scc(&self.graph) {
            let is_self_loop = component.len() == 1
                && self
                    .graph
                    .find_edge(component[0], component[0])
                    .is_some();
            if component.len() > 1 || is_self_loop {
                let mut cycle: Vec<String> = component
                    .iter()
                    .map(|&n| self.graph[n].clone())
                    .collect();
                if let Some(first) = cycle.first().cloned() {
                    cycle.push(first);
                }
                return Err(Error::CycleDetected { cycle });
            }
        }
        Ok(())
    }

    /// Names of tasks that directly depend on `name`.
    #[must_use]
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.neighbors(name, Direction::Outgoing)
    }

    /// Names of tasks that `name` directly depends on.
    #[must_use]
    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        self.neighbors(name, Direction::Incoming)
    }

    /// The full reverse index `task -> set of tasks depending on it`.
    #[must_use]
    pub fn dependents_map(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.name_to_node
            .keys()
            .map(|name| {
                (
                    name.clone(),
                    self.dependents_of(name).into_iter().collect(),
                )
            })
            .collect()
    }

    /// Tasks with no dependencies at all.
    #[must_use]
    pub fn roots(&self) -> Vec<String> {
        let mut roots: Vec<String> = self
            .graph
            .node_indices()
            .filter(|&n| {
                self.graph
                    .neighbors_directed(n, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|n| self.graph[n].clone())
            .collect();
        roots.sort();
        roots
    }

    /// Number of tasks in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Whether the graph has no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Vec<String> {
        let Some(&node) = self.name_to_node.get(name) else {
            return Vec::new();
        };
        let mut names: Vec<String> = self
            .graph
            .neighbors_directed(node, direction)
            .map(|n| self.graph[n].clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}
