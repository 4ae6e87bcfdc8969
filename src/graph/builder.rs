//! GraphBuilder implementation for constructing workflow graph specs.
//!
//! The builder is the only way to obtain a [`GraphSpec`]: `build()` runs the
//! structural validation pass (declared endpoints, entry node, divergent-cycle
//! rejection) so an invalid graph can never reach the executor.

use rustc_hash::{FxHashMap, FxHashSet};

use super::spec::{AsyncEntryPoint, EdgeSpec, GraphSpec, NodeSpec};
use super::validation::{self, GraphValidationError};
use crate::types::{IsolationLevel, NodeId};

/// Default global step ceiling when a graph does not declare one.
pub const DEFAULT_MAX_STEPS: u64 = 256;

/// Fluent builder for [`GraphSpec`].
///
/// # Required Configuration
///
/// Every graph must have:
/// - At least one node added via [`add_node`](Self::add_node)
/// - An entry node declared via [`entry`](Self::entry) that references a
///   declared node
/// - Edge endpoints that all reference declared nodes
///
/// # Examples
///
/// ```rust
/// use skeinrun::graph::{EdgeSpec, GraphBuilder, NodeSpec};
/// use skeinrun::types::NodeType;
///
/// let graph = GraphBuilder::new("triage", "goal-triage")
///     .add_node(NodeSpec::new("classify", NodeType::ModelCall))
///     .add_node(NodeSpec::new("archive", NodeType::Function))
///     .add_edge(EdgeSpec::always("classify", "archive"))
///     .entry("classify")
///     .terminal("archive")
///     .build()
///     .expect("valid graph");
/// assert_eq!(graph.nodes.len(), 2);
/// ```
pub struct GraphBuilder {
    id: String,
    goal_id: String,
    entry_node: Option<NodeId>,
    terminal_nodes: FxHashSet<NodeId>,
    pause_nodes: FxHashSet<NodeId>,
    nodes: Vec<NodeSpec>,
    edges: Vec<EdgeSpec>,
    max_steps: u64,
    max_retries_per_node: u32,
    entry_points: FxHashMap<String, NodeId>,
    async_entry_points: Vec<AsyncEntryPoint>,
}

impl GraphBuilder {
    #[must_use]
    pub fn new(id: impl Into<String>, goal_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            goal_id: goal_id.into(),
            entry_node: None,
            terminal_nodes: FxHashSet::default(),
            pause_nodes: FxHashSet::default(),
            nodes: Vec::new(),
            edges: Vec::new(),
            max_steps: DEFAULT_MAX_STEPS,
            max_retries_per_node: 0,
            entry_points: FxHashMap::default(),
            async_entry_points: Vec::new(),
        }
    }

    /// Adds a node spec to the graph. Ids must be unique; duplicates are
    /// rejected at `build()` time.
    #[must_use]
    pub fn add_node(mut self, node: NodeSpec) -> Self {
        self.nodes.push(node);
        self
    }

    /// Adds an edge spec. Both endpoints must reference declared nodes.
    #[must_use]
    pub fn add_edge(mut self, edge: EdgeSpec) -> Self {
        self.edges.push(edge);
        self
    }

    /// Declares the entry node that begins execution.
    #[must_use]
    pub fn entry(mut self, node: impl Into<NodeId>) -> Self {
        self.entry_node = Some(node.into());
        self
    }

    /// Declares a terminal node; reaching one ends the run with success.
    #[must_use]
    pub fn terminal(mut self, node: impl Into<NodeId>) -> Self {
        self.terminal_nodes.insert(node.into());
        self
    }

    /// Declares a pause node; reaching one suspends the run rather than
    /// failing or succeeding.
    #[must_use]
    pub fn pause(mut self, node: impl Into<NodeId>) -> Self {
        self.pause_nodes.insert(node.into());
        self
    }

    /// Sets the global execution ceiling.
    #[must_use]
    pub fn max_steps(mut self, steps: u64) -> Self {
        self.max_steps = steps;
        self
    }

    /// Sets the default retry budget for nodes without their own.
    #[must_use]
    pub fn max_retries_per_node(mut self, retries: u32) -> Self {
        self.max_retries_per_node = retries;
        self
    }

    /// Registers a named resume target.
    #[must_use]
    pub fn entry_point(mut self, name: impl Into<String>, node: impl Into<NodeId>) -> Self {
        self.entry_points.insert(name.into(), node.into());
        self
    }

    /// Declares a concurrent trigger with its isolation level and cap.
    #[must_use]
    pub fn async_entry_point(
        mut self,
        name: impl Into<String>,
        node: impl Into<NodeId>,
        isolation: IsolationLevel,
        max_concurrent: usize,
    ) -> Self {
        self.async_entry_points
            .push(AsyncEntryPoint::new(name, node, isolation, max_concurrent));
        self
    }

    /// Validates and constructs the immutable [`GraphSpec`].
    ///
    /// # Errors
    ///
    /// Returns [`GraphValidationError`] when the graph is empty, declares
    /// duplicate node ids, references undeclared nodes from edges or entry
    /// declarations, or contains a divergent cycle (a cycle whose edges are
    /// all unconditional and whose nodes have no alternative exit).
    pub fn build(self) -> Result<GraphSpec, GraphValidationError> {
        if self.nodes.is_empty() {
            return Err(GraphValidationError::EmptyGraph);
        }

        let mut node_index: FxHashMap<NodeId, usize> = FxHashMap::default();
        for (ix, node) in self.nodes.iter().enumerate() {
            if node_index.insert(node.id.clone(), ix).is_some() {
                return Err(GraphValidationError::DuplicateNode {
                    id: node.id.clone(),
                });
            }
        }

        for (edge_ix, edge) in self.edges.iter().enumerate() {
            for endpoint in [&edge.source, &edge.target] {
                if !node_index.contains_key(endpoint) {
                    return Err(GraphValidationError::UnknownEdgeEndpoint {
                        edge_index: edge_ix,
                        id: endpoint.clone(),
                    });
                }
            }
        }

        let entry_node = self.entry_node.ok_or(GraphValidationError::MissingEntry)?;
        if !node_index.contains_key(&entry_node) {
            return Err(GraphValidationError::UndeclaredEntry {
                id: entry_node.clone(),
            });
        }
        for id in self.terminal_nodes.iter().chain(self.pause_nodes.iter()) {
            if !node_index.contains_key(id) {
                return Err(GraphValidationError::UndeclaredMarker { id: id.clone() });
            }
        }
        for (name, id) in &self.entry_points {
            if !node_index.contains_key(id) {
                return Err(GraphValidationError::UnknownEntryPoint {
                    name: name.clone(),
                    id: id.clone(),
                });
            }
        }
        for entry in &self.async_entry_points {
            if !node_index.contains_key(&entry.node) {
                return Err(GraphValidationError::UnknownEntryPoint {
                    name: entry.name.clone(),
                    id: entry.node.clone(),
                });
            }
        }

        // Outgoing edge indices per node, higher priority first; declaration
        // order breaks ties so routing stays deterministic.
        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (edge_ix, edge) in self.edges.iter().enumerate() {
            adjacency[node_index[&edge.source]].push(edge_ix);
        }
        for outgoing in &mut adjacency {
            outgoing.sort_by_key(|&eix| std::cmp::Reverse(self.edges[eix].priority));
        }

        let graph = GraphSpec {
            id: self.id,
            goal_id: self.goal_id,
            entry_node,
            terminal_nodes: self.terminal_nodes,
            pause_nodes: self.pause_nodes,
            nodes: self.nodes,
            edges: self.edges,
            max_steps: self.max_steps,
            max_retries_per_node: self.max_retries_per_node,
            entry_points: self.entry_points,
            async_entry_points: self.async_entry_points,
            node_index,
            adjacency,
        };

        validation::reject_divergent_cycles(&graph)?;
        Ok(graph)
    }
}
