//! Core types for the skeinrun workflow runtime.
//!
//! This module defines the fundamental vocabulary used throughout the system
//! for identifying nodes, classifying transitions, and describing how
//! concurrent executions share state. These are the core domain concepts that
//! define what a workflow graph *is*; execution infrastructure types live in
//! the modules that own them.
//!
//! # Key Types
//!
//! - [`NodeId`]: Identifies a node within a workflow graph
//! - [`NodeType`]: The polymorphic execution kind of a node
//! - [`EdgeCondition`]: When a transition between nodes is eligible to fire
//! - [`IsolationLevel`]: How concurrent executions under one entry point
//!   share mutable state
//! - [`StateScope`]: The visibility boundary of a shared-memory scope
//! - [`RunStatus`]: Lifecycle status of a run record
//! - [`JoinPolicy`]: How forked branches without a convergence node complete
//!
//! # Examples
//!
//! ```rust
//! use skeinrun::types::{EdgeCondition, NodeId, NodeType};
//!
//! let fetch = NodeId::from("fetch");
//! assert_eq!(fetch.as_str(), "fetch");
//! assert_eq!(NodeType::ToolUse.to_string(), "tool_use");
//! assert!(EdgeCondition::Always.is_unconditional());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a node within a workflow graph.
///
/// Node ids are authored externally as part of the graph specification and
/// must be unique within one graph. The newtype keeps id-keyed maps honest
/// without imposing any structure on the identifier itself.
///
/// # Examples
///
/// ```rust
/// use skeinrun::types::NodeId;
///
/// let id = NodeId::from("classify");
/// assert_eq!(id.to_string(), "classify");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// View the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId(s)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The polymorphic execution kind of a node.
///
/// Node types form a closed set: the runtime resolves each type to a
/// step-executor implementation once, at executor construction, via a lookup
/// table. The runtime itself never interprets what a type *means* beyond
/// dispatch (and guardrail review for [`ToolUse`](Self::ToolUse) steps).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// A pure function step with no external side effects.
    Function,
    /// A language-model invocation.
    ModelCall,
    /// A tool invocation with possible external side effects.
    ///
    /// Tool steps are the ones subject to guardrail review and evidence
    /// grading, since their effects may land invisibly across a timeout.
    ToolUse,
    /// A routing step whose only output is a branching decision.
    Router,
    /// A step that waits on human-supplied input.
    HumanInput,
    /// A step that loops on external events until a condition is met.
    EventLoop,
}

impl NodeType {
    /// All node types, in declaration order.
    ///
    /// Useful for building complete executor registries in tests.
    pub const ALL: [NodeType; 6] = [
        NodeType::Function,
        NodeType::ModelCall,
        NodeType::ToolUse,
        NodeType::Router,
        NodeType::HumanInput,
        NodeType::EventLoop,
    ];
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NodeType::Function => "function",
            NodeType::ModelCall => "model_call",
            NodeType::ToolUse => "tool_use",
            NodeType::Router => "router",
            NodeType::HumanInput => "human_input",
            NodeType::EventLoop => "event_loop",
        };
        write!(f, "{label}")
    }
}

/// Condition governing when an edge is eligible to fire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeCondition {
    /// Fires unconditionally after the source node runs.
    Always,
    /// Fires only when the source node's outcome was a success.
    OnSuccess,
    /// Fires only when the source node's outcome was a failure.
    OnFailure,
    /// Fires when the edge's guard expression evaluates to true against the
    /// node output and shared memory.
    Conditional,
    /// Defers the choice among candidate targets to the step-executor
    /// collaborator.
    ModelDecide,
}

impl EdgeCondition {
    /// Returns `true` for [`Always`](Self::Always) edges.
    ///
    /// Divergent-cycle validation treats only these edges as unconditional;
    /// every other condition constitutes a possible exit from a cycle.
    #[must_use]
    pub fn is_unconditional(&self) -> bool {
        matches!(self, EdgeCondition::Always)
    }
}

/// Policy governing whether concurrent executions under one entry point share
/// mutable state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Every execution gets a private memory scope, invisible to others.
    Isolated,
    /// All executions under the same stream see one scope.
    Shared,
    /// Like [`Shared`](Self::Shared), but mutations are serialized through a
    /// single writer lock so readers never observe a partial update.
    Synchronized,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            IsolationLevel::Isolated => "isolated",
            IsolationLevel::Shared => "shared",
            IsolationLevel::Synchronized => "synchronized",
        };
        write!(f, "{label}")
    }
}

/// Visibility boundary of a shared-memory scope.
///
/// Scopes are resolved by the stream manager from an entry point's
/// [`IsolationLevel`]; the global scope is visible across all streams and
/// survives process restart by being flushed to storage on shutdown.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum StateScope {
    /// Visible to every stream and execution; durable across restarts.
    Global,
    /// Shared by all executions of one stream.
    Stream(String),
    /// Private to a single execution.
    Execution(String),
}

impl fmt::Display for StateScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateScope::Global => write!(f, "global"),
            StateScope::Stream(id) => write!(f, "stream:{id}"),
            StateScope::Execution(id) => write!(f, "execution:{id}"),
        }
    }
}

/// Lifecycle status of a run record.
///
/// A record is mutated only while `Running`; once the status leaves
/// `Running` the record is immutable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        write!(f, "{label}")
    }
}

/// How a fork with no convergence node completes.
///
/// When concurrently forked branches share no common descendant they run
/// independently to their own terminal nodes; this policy decides when the
/// overall run reports completion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinPolicy {
    /// Wait for every forked branch to reach a terminal node.
    #[default]
    WaitAll,
    /// Report completion as soon as the first branch reaches a terminal node
    /// and cancel the remaining branches cooperatively.
    FirstTerminal,
}
