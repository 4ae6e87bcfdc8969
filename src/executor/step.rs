//! The step-executor collaborator contract.
//!
//! The runtime treats "execute this node" as an opaque polymorphic
//! capability: one [`StepExecutor`] implementation per [`NodeType`], resolved
//! once into a lookup table at executor construction. How a step is
//! implemented (model call, tool call, pure function, human-input wait) is
//! none of the runtime's business.

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::graph::NodeSpec;
use crate::types::{NodeId, NodeType};

/// Context assembled for one step invocation.
///
/// `inputs` carries exactly the node's declared `input_keys` resolved from
/// shared memory, plus any values renamed in by the incoming edge's
/// `input_mapping`.
#[derive(Clone, Debug)]
pub struct StepContext {
    pub node_id: NodeId,
    pub execution_id: String,
    pub run_id: String,
    pub stream_id: Option<String>,
    /// Global step number at the time of invocation.
    pub step: u64,
    /// 1-based attempt number within the node's retry budget.
    pub attempt: u32,
    pub inputs: FxHashMap<String, Value>,
}

/// Successful result of one step invocation.
#[derive(Clone, Debug, Default)]
pub struct StepOutput {
    /// Raw output values; the runtime merges only the node's declared
    /// `output_keys` back into shared memory.
    pub output: FxHashMap<String, Value>,
    pub tokens_used: u64,
    pub latency_ms: u64,
}

impl StepOutput {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.output.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens_used = tokens;
        self
    }
}

/// Errors raised by the external step executor.
///
/// The retry loop consults [`is_retryable`](Self::is_retryable): transient
/// provider errors, rate limits, and timeouts are retried within the node's
/// budget; everything else surfaces immediately.
#[derive(Debug, Error, Diagnostic)]
pub enum StepError {
    /// External provider or service error.
    #[error("provider error ({provider}): {message}")]
    #[diagnostic(code(skeinrun::step::provider))]
    Provider {
        provider: String,
        message: String,
        retryable: bool,
    },

    /// Downstream rate limit; retried with backoff.
    #[error("rate limited: {message}")]
    #[diagnostic(
        code(skeinrun::step::rate_limited),
        help("The runtime backs off and retries within the node's budget.")
    )]
    RateLimited {
        message: String,
        retry_after_ms: Option<u64>,
    },

    /// The step exceeded its time bound.
    #[error("step timed out after {elapsed_ms}ms")]
    #[diagnostic(code(skeinrun::step::timeout))]
    Timeout { elapsed_ms: u64 },

    /// The step rejected its input; never retried.
    #[error("invalid step input: {0}")]
    #[diagnostic(code(skeinrun::step::invalid_input))]
    InvalidInput(String),

    #[error(transparent)]
    #[diagnostic(code(skeinrun::step::serde))]
    Serde(#[from] serde_json::Error),
}

impl StepError {
    /// Whether the retry loop may re-issue the step.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            StepError::Provider { retryable, .. } => *retryable,
            StepError::RateLimited { .. } | StepError::Timeout { .. } => true,
            StepError::InvalidInput(_) | StepError::Serde(_) => false,
        }
    }

    /// Whether this is a rate limit, which backs off harder than other
    /// retryable failures.
    #[must_use]
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, StepError::RateLimited { .. })
    }
}

/// The external "execute this node" capability.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Execute one step. Failure semantics are carried by [`StepError`];
    /// a returned [`StepOutput`] is always a success.
    async fn execute(&self, node: &NodeSpec, ctx: StepContext) -> Result<StepOutput, StepError>;

    /// Choose among candidate targets for a model-decide edge.
    ///
    /// The default picks the first candidate, which keeps deterministic
    /// executors (pure functions, tests) from having to implement routing.
    async fn decide(
        &self,
        node: &NodeSpec,
        candidates: &[NodeId],
        _ctx: &StepContext,
    ) -> Result<NodeId, StepError> {
        candidates.first().cloned().ok_or_else(|| {
            StepError::InvalidInput(format!("no decide candidates for node {}", node.id))
        })
    }
}

/// Lookup table from node type to step-executor implementation.
///
/// Built once and handed to the graph executor; a node type without a
/// binding is a fatal configuration error discovered at construction, not
/// mid-run.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    bindings: FxHashMap<NodeType, Arc<dyn StepExecutor>>,
}

impl ExecutorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an implementation to a node type, replacing any previous binding.
    #[must_use]
    pub fn with(mut self, node_type: NodeType, executor: Arc<dyn StepExecutor>) -> Self {
        self.bindings.insert(node_type, executor);
        self
    }

    /// Bind one implementation to every node type.
    ///
    /// Handy for tests and for runtimes that dispatch internally.
    #[must_use]
    pub fn with_all(mut self, executor: Arc<dyn StepExecutor>) -> Self {
        for node_type in NodeType::ALL {
            self.bindings.insert(node_type, executor.clone());
        }
        self
    }

    #[must_use]
    pub fn resolve(&self, node_type: NodeType) -> Option<Arc<dyn StepExecutor>> {
        self.bindings.get(&node_type).cloned()
    }
}
