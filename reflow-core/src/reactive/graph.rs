//! Dependency Graph
//!
//! The graph is an arena of [`Node`] records addressed by [`NodeId`], with
//! every edge stored in two owned adjacency tables (producer → consumers and
//! consumer → producers). It answers the two questions the scheduler needs:
//!
//! 1. Which derived nodes are affected by a set of changed sources, and in
//!    what order may they be recomputed so that every producer settles
//!    before its consumers? (BFS dirty-marking + Kahn's topological sort.)
//!
//! 2. Which edges does a consumer keep after re-evaluating? Dependency sets
//!    are rebuilt from the exact set of reads observed during evaluation;
//!    edges to producers that are no longer read are dropped, new ones are
//!    added, and both adjacency tables stay in sync.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexSet;

use super::node::{DirtyState, Node, NodeId};

/// The dependency graph shared by all reactive values of one [`Runtime`].
///
/// [`Runtime`]: super::runtime::Runtime
#[derive(Debug, Default)]
pub struct DepGraph {
    /// All nodes in the graph, indexed by ID.
    nodes: HashMap<NodeId, Node>,
}

impl DepGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Add a node to the graph.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node from the graph.
    ///
    /// Also removes all edges involving this node, on both sides.
    pub fn remove_node(&mut self, node_id: NodeId) {
        if let Some(node) = self.nodes.remove(&node_id) {
            for dep_id in node.dependencies() {
                if let Some(dep) = self.nodes.get_mut(dep_id) {
                    dep.remove_dependent(node_id);
                }
            }
            for dependent_id in node.dependents() {
                if let Some(dependent) = self.nodes.get_mut(dependent_id) {
                    dependent.remove_dependency(node_id);
                }
            }
        }
    }

    /// Get a reference to a node.
    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    /// Replace a consumer's dependency set with the reads observed during
    /// its latest evaluation.
    ///
    /// Producers that were read before but not this time lose their edge;
    /// newly read producers gain one.
    pub fn set_dependencies(&mut self, consumer: NodeId, reads: &IndexSet<NodeId>) {
        let old: Vec<NodeId> = match self.nodes.get(&consumer) {
            Some(node) => node.dependencies().iter().copied().collect(),
            None => return,
        };

        for producer in &old {
            if !reads.contains(producer) {
                if let Some(node) = self.nodes.get_mut(producer) {
                    node.remove_dependent(consumer);
                }
            }
        }
        for producer in reads {
            if let Some(node) = self.nodes.get_mut(producer) {
                node.add_dependent(consumer);
            }
        }
        if let Some(node) = self.nodes.get_mut(&consumer) {
            for producer in old {
                if !reads.contains(&producer) {
                    node.remove_dependency(producer);
                }
            }
            for producer in reads {
                node.add_dependency(*producer);
            }
        }
    }

    /// Get a copy of a node's dependency set.
    pub fn dependencies_of(&self, node_id: NodeId) -> IndexSet<NodeId> {
        self.nodes
            .get(&node_id)
            .map(|n| n.dependencies().clone())
            .unwrap_or_default()
    }

    /// Number of consumers subscribed to a producer.
    pub fn dependent_count(&self, node_id: NodeId) -> usize {
        self.nodes
            .get(&node_id)
            .map(|n| n.dependents().len())
            .unwrap_or(0)
    }

    /// Current dirty state of a node.
    pub fn dirty_state(&self, node_id: NodeId) -> DirtyState {
        self.nodes
            .get(&node_id)
            .map(|n| n.dirty_state())
            .unwrap_or(DirtyState::Clean)
    }

    /// Mark a node clean.
    pub fn mark_clean(&mut self, node_id: NodeId) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.mark_clean();
        }
    }

    /// Mark changed sources and collect the affected derived nodes.
    ///
    /// Every derived node transitively downstream of a source is marked
    /// maybe-dirty. The returned list is topologically sorted: a node never
    /// appears before any of its in-set producers, so processing the list
    /// front to back evaluates each node against fully-settled inputs.
    pub fn affected_by(&mut self, sources: &[NodeId]) -> Vec<NodeId> {
        let mut to_process = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        for source_id in sources {
            if let Some(source) = self.nodes.get(source_id) {
                for dependent_id in source.dependents() {
                    queue.push_back(*dependent_id);
                }
            }
        }

        // BFS to propagate maybe-dirty status
        while let Some(node_id) = queue.pop_front() {
            if !visited.insert(node_id) {
                continue;
            }
            if let Some(node) = self.nodes.get_mut(&node_id) {
                node.mark_maybe_dirty();
                to_process.push(node_id);

                for dependent_id in node.dependents().clone() {
                    queue.push_back(dependent_id);
                }
            }
        }

        self.topological_sort(to_process)
    }

    /// Sort the given nodes so that in-set dependencies come before their
    /// dependents (Kahn's algorithm).
    fn topological_sort(&self, nodes: Vec<NodeId>) -> Vec<NodeId> {
        let node_set: HashSet<_> = nodes.iter().copied().collect();
        let mut in_degree: HashMap<NodeId, usize> = HashMap::new();
        let mut result = Vec::with_capacity(nodes.len());
        let mut queue = VecDeque::new();

        for &node_id in &nodes {
            if let Some(node) = self.nodes.get(&node_id) {
                let degree = node
                    .dependencies()
                    .iter()
                    .filter(|d| node_set.contains(d))
                    .count();
                in_degree.insert(node_id, degree);
                if degree == 0 {
                    queue.push_back(node_id);
                }
            }
        }

        while let Some(node_id) = queue.pop_front() {
            result.push(node_id);

            if let Some(node) = self.nodes.get(&node_id) {
                for &dependent_id in node.dependents() {
                    if let Some(degree) = in_degree.get_mut(&dependent_id) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            queue.push_back(dependent_id);
                        }
                    }
                }
            }
        }

        result
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}
