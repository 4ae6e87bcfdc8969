//! Immutable graph specification types.
//!
//! A [`GraphSpec`] and its node/edge specs are created once by an external
//! authoring process (through [`GraphBuilder`](super::GraphBuilder)) and are
//! read-only for the runtime's lifetime. The spec owns an arena of
//! [`NodeSpec`]s plus an index-based adjacency table so cycle and convergence
//! analysis are pure traversals over indices, never pointer chases.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::types::{EdgeCondition, IsolationLevel, NodeId, NodeType};

/// Specification of one unit of work in a workflow graph.
///
/// # Examples
///
/// ```rust
/// use skeinrun::graph::NodeSpec;
/// use skeinrun::types::NodeType;
///
/// let node = NodeSpec::new("fetch", NodeType::ToolUse)
///     .with_input_keys(["url"])
///     .with_output_keys(["body", "status"])
///     .with_max_retries(2);
/// assert_eq!(node.id.as_str(), "fetch");
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Unique identifier within the graph.
    pub id: NodeId,
    /// Execution kind, dispatched to a step-executor implementation.
    pub node_type: NodeType,
    /// Memory keys assembled into the step context before execution.
    #[serde(default)]
    pub input_keys: Vec<String>,
    /// Memory keys merged back from the step output after execution.
    #[serde(default)]
    pub output_keys: Vec<String>,
    /// Per-node retry budget; `None` falls back to the graph default.
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Visit ceiling for this node; `0` means unbounded (the global
    /// `max_steps` ceiling still applies).
    #[serde(default)]
    pub max_node_visits: u32,
}

impl NodeSpec {
    pub fn new(id: impl Into<NodeId>, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            node_type,
            input_keys: Vec::new(),
            output_keys: Vec::new(),
            max_retries: None,
            max_node_visits: 0,
        }
    }

    #[must_use]
    pub fn with_input_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_output_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    #[must_use]
    pub fn with_max_node_visits(mut self, visits: u32) -> Self {
        self.max_node_visits = visits;
        self
    }
}

/// Specification of a conditional transition between two nodes.
///
/// Among simultaneously-eligible edges from one node, higher `priority` wins;
/// ties are broken by declaration order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub source: NodeId,
    pub target: NodeId,
    pub condition: EdgeCondition,
    /// Guard expression for [`EdgeCondition::Conditional`] edges, evaluated
    /// in the sandboxed evaluator against node output and shared memory.
    #[serde(default)]
    pub condition_expr: Option<String>,
    #[serde(default)]
    pub priority: i32,
    /// Rename map applied to the source node's outputs before they are
    /// presented as the target node's inputs.
    #[serde(default)]
    pub input_mapping: FxHashMap<String, String>,
}

impl EdgeSpec {
    fn new(source: impl Into<NodeId>, target: impl Into<NodeId>, condition: EdgeCondition) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            condition,
            condition_expr: None,
            priority: 0,
            input_mapping: FxHashMap::default(),
        }
    }

    /// An unconditional edge.
    pub fn always(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self::new(source, target, EdgeCondition::Always)
    }

    /// An edge that fires only after a successful outcome.
    pub fn on_success(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self::new(source, target, EdgeCondition::OnSuccess)
    }

    /// An edge that fires only after a failed outcome.
    pub fn on_failure(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self::new(source, target, EdgeCondition::OnFailure)
    }

    /// An edge guarded by a boolean expression over output and memory.
    pub fn conditional(
        source: impl Into<NodeId>,
        target: impl Into<NodeId>,
        expr: impl Into<String>,
    ) -> Self {
        let mut edge = Self::new(source, target, EdgeCondition::Conditional);
        edge.condition_expr = Some(expr.into());
        edge
    }

    /// An edge whose choice is deferred to the step-executor collaborator.
    pub fn model_decide(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self::new(source, target, EdgeCondition::ModelDecide)
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Map a source output key onto a differently named target input key.
    #[must_use]
    pub fn with_mapping(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.input_mapping.insert(from.into(), to.into());
        self
    }
}

/// A declared concurrent trigger for a graph.
///
/// Each async entry point becomes one execution stream at runtime, with its
/// own isolation level and concurrency cap.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AsyncEntryPoint {
    pub name: String,
    pub node: NodeId,
    pub isolation: IsolationLevel,
    pub max_concurrent: usize,
}

impl AsyncEntryPoint {
    pub fn new(
        name: impl Into<String>,
        node: impl Into<NodeId>,
        isolation: IsolationLevel,
        max_concurrent: usize,
    ) -> Self {
        Self {
            name: name.into(),
            node: node.into(),
            isolation,
            max_concurrent: max_concurrent.max(1),
        }
    }
}

/// Immutable specification of a workflow graph.
///
/// Constructed only through [`GraphBuilder`](super::GraphBuilder), which
/// validates structure (declared endpoints, entry node, no divergent cycle)
/// before this type can exist. The derived index tables are rebuilt at
/// construction and never serialized.
#[derive(Clone, Debug)]
pub struct GraphSpec {
    pub id: String,
    pub goal_id: String,
    pub entry_node: NodeId,
    pub terminal_nodes: FxHashSet<NodeId>,
    pub pause_nodes: FxHashSet<NodeId>,
    pub nodes: Vec<NodeSpec>,
    pub edges: Vec<EdgeSpec>,
    /// Global execution ceiling across the whole run.
    pub max_steps: u64,
    /// Default retry budget for nodes that do not declare their own.
    pub max_retries_per_node: u32,
    /// Named resume targets for re-entering paused runs.
    pub entry_points: FxHashMap<String, NodeId>,
    /// Declared concurrent triggers.
    pub async_entry_points: Vec<AsyncEntryPoint>,

    pub(super) node_index: FxHashMap<NodeId, usize>,
    /// Outgoing edge indices per node, sorted by descending edge priority
    /// (declaration order within equal priorities).
    pub(super) adjacency: Vec<Vec<usize>>,
}

impl GraphSpec {
    /// Look up a node spec by id.
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&NodeSpec> {
        self.node_index.get(id).map(|&ix| &self.nodes[ix])
    }

    /// Arena index of a node id.
    #[must_use]
    pub fn index_of(&self, id: &NodeId) -> Option<usize> {
        self.node_index.get(id).copied()
    }

    /// Outgoing edges of a node, ordered by descending priority.
    pub fn outgoing(&self, id: &NodeId) -> impl Iterator<Item = &EdgeSpec> {
        let edge_indices = self
            .node_index
            .get(id)
            .map(|&ix| self.adjacency[ix].as_slice())
            .unwrap_or(&[]);
        edge_indices.iter().map(|&eix| &self.edges[eix])
    }

    /// Outgoing edge indices of an arena index, ordered by descending
    /// priority. Used by the analysis traversals.
    pub(super) fn outgoing_by_index(&self, node_ix: usize) -> &[usize] {
        &self.adjacency[node_ix]
    }

    /// Whether the node is a declared terminal.
    #[must_use]
    pub fn is_terminal(&self, id: &NodeId) -> bool {
        self.terminal_nodes.contains(id)
    }

    /// Whether the node is a declared pause point.
    #[must_use]
    pub fn is_pause(&self, id: &NodeId) -> bool {
        self.pause_nodes.contains(id)
    }

    /// Effective retry budget for a node (its own, or the graph default).
    #[must_use]
    pub fn retry_budget(&self, node: &NodeSpec) -> u32 {
        node.max_retries.unwrap_or(self.max_retries_per_node)
    }

    /// The resume target registered under an entry-point name.
    #[must_use]
    pub fn entry_point(&self, name: &str) -> Option<&NodeId> {
        self.entry_points.get(name)
    }
}
