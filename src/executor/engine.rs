//! The graph executor: drives one graph instance node by node.
//!
//! Each step invokes the external step-executor for the current node,
//! merges declared outputs into shared memory, records a Decision and its
//! Outcome, then evaluates outgoing edges by descending priority. When more
//! than one edge fires the targets run as concurrent branches; the executor
//! computes their nearest common descendant and the branches rendezvous
//! there, or, with no common descendant, run independently under the
//! configured [`JoinPolicy`].
//!
//! Ceilings: the global step counter fails the run with `step_limit_exceeded`
//! at `max_steps`; per-node visit counters act as a secondary circuit breaker
//! on cyclic graphs. Cycle validity itself was established at graph build
//! time and is not re-checked here.
//!
//! Pause points: reaching a declared pause node (or a guardrail verdict of
//! require-confirmation) suspends the run instead of finishing it; the
//! stream layer hands the suspension to the durable wait runtime.

use futures_util::future::{join_all, select_all};
use parking_lot::Mutex;
use rand::Rng;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::instrument;

use super::breaker::CircuitBreaker;
use super::condition::{self, ConditionScope};
use super::guardrail::{AllowAll, Guardrail, PolicyDecision, PolicyEvent, PolicyPhase,
    PolicySeverity};
use super::step::{ExecutorRegistry, StepContext, StepError, StepOutput};
use crate::cancel::CancelToken;
use crate::event_bus::{EventBus, EventType, RuntimeEvent};
use crate::graph::{EdgeSpec, GraphSpec, NodeSpec, convergence_node};
use crate::memory::ScopeHandle;
use crate::run::{DecisionOption, EvidenceGrade, Outcome, RunRecorder};
use crate::types::{EdgeCondition, JoinPolicy, NodeId};

/// Originating error kind of a run failure; stored on the run record and
/// surfaced with every failed result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing required collaborator or binding; fatal, never retried.
    Configuration,
    /// The external step executor failed past the retry budget.
    StepExecution,
    /// A rate limit exhausted the retry budget.
    RateLimit,
    /// A step or wait exceeded its time bound.
    Timeout,
    /// Graph or input contract violation discovered mid-run.
    Validation,
    /// The global `max_steps` ceiling (or a node visit ceiling) was hit.
    StepLimitExceeded,
    /// The execution was cancelled.
    Cancelled,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::StepExecution => "step_execution",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Validation => "validation",
            ErrorKind::StepLimitExceeded => "step_limit_exceeded",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    fn of_step_error(err: &StepError) -> Self {
        match err {
            StepError::RateLimited { .. } => ErrorKind::RateLimit,
            StepError::Timeout { .. } => ErrorKind::Timeout,
            StepError::InvalidInput(_) | StepError::Serde(_) => ErrorKind::Validation,
            StepError::Provider { .. } => ErrorKind::StepExecution,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fatal executor construction errors.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum ExecutorError {
    #[error("no step executor bound for node type {node_type} (node {node})")]
    #[diagnostic(
        code(skeinrun::executor::unbound_node_type),
        help("Bind an implementation for every node type used by the graph.")
    )]
    Configuration { node_type: String, node: NodeId },
}

/// Final result of one execution.
#[derive(Clone, Debug)]
pub struct ExecutionResult {
    pub success: bool,
    /// Snapshot of the execution's memory scope at completion.
    pub output: FxHashMap<String, Value>,
    pub error: Option<String>,
    pub run_id: String,
}

/// Where a suspended execution stopped.
#[derive(Clone, Debug)]
pub struct ExecutionPausedAt {
    pub node: NodeId,
    pub run_id: String,
    pub execution_id: String,
}

/// Outcome of driving an execution: it either finished or suspended.
#[derive(Clone, Debug)]
pub enum ExecutionOutcome {
    Finished(ExecutionResult),
    Paused(ExecutionPausedAt),
}

/// Tunables for one executor instance.
#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    pub join_policy: JoinPolicy,
    /// Base backoff between retries; rate limits back off harder.
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            join_policy: JoinPolicy::default(),
            base_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(5),
        }
    }
}

#[derive(Default)]
struct Counters {
    steps: u64,
    visits: FxHashMap<NodeId, u32>,
}

/// How one segment (the main line or a forked branch) of an execution ended.
enum SegmentEnd {
    /// The segment arrived at its convergence node without executing it.
    ReachedJoin,
    /// A declared terminal node ran; the segment is complete.
    Terminal,
    Paused(NodeId),
    Failed { kind: ErrorKind, message: String },
}

enum NodeRun {
    Success {
        output: FxHashMap<String, Value>,
    },
    Failed {
        kind: ErrorKind,
        message: String,
    },
    PauseRequired,
}

/// Drives one graph instance from a starting input to completion, pause, or
/// failure.
///
/// The step counter and per-node visit counters are owned exclusively by
/// this instance, never shared across executions.
pub struct GraphExecutor {
    graph: Arc<GraphSpec>,
    registry: Arc<ExecutorRegistry>,
    guardrail: Arc<dyn Guardrail>,
    config: ExecutorConfig,
    breaker: Option<Arc<CircuitBreaker>>,
    bus: Option<Arc<EventBus>>,
    memory: ScopeHandle,
    recorder: RunRecorder,
    cancel: CancelToken,
    stream_id: Option<String>,
    execution_id: String,
    counters: Mutex<Counters>,
}

impl fmt::Debug for GraphExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphExecutor")
            .field("execution_id", &self.execution_id)
            .field("stream_id", &self.stream_id)
            .finish_non_exhaustive()
    }
}

impl GraphExecutor {
    /// Build an executor, resolving every node type to its step-executor
    /// binding up front.
    ///
    /// # Errors
    ///
    /// [`ExecutorError::Configuration`] when any node's type has no binding;
    /// fatal and never retried.
    pub fn new(
        graph: Arc<GraphSpec>,
        registry: Arc<ExecutorRegistry>,
        memory: ScopeHandle,
        recorder: RunRecorder,
    ) -> Result<Self, ExecutorError> {
        for node in &graph.nodes {
            if registry.resolve(node.node_type).is_none() {
                return Err(ExecutorError::Configuration {
                    node_type: node.node_type.to_string(),
                    node: node.id.clone(),
                });
            }
        }
        Ok(Self {
            graph,
            registry,
            guardrail: Arc::new(AllowAll),
            config: ExecutorConfig::default(),
            breaker: None,
            bus: None,
            memory,
            recorder,
            cancel: CancelToken::new(),
            stream_id: None,
            execution_id: uuid::Uuid::new_v4().to_string(),
            counters: Mutex::new(Counters::default()),
        })
    }

    #[must_use]
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_guardrail(mut self, guardrail: Arc<dyn Guardrail>) -> Self {
        self.guardrail = guardrail;
        self
    }

    #[must_use]
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    #[must_use]
    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_stream(mut self, stream_id: impl Into<String>) -> Self {
        self.stream_id = Some(stream_id.into());
        self
    }

    #[must_use]
    pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = execution_id.into();
        self
    }

    #[must_use]
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Execute from the graph's entry node.
    #[instrument(skip(self, input), fields(execution = %self.execution_id, graph = %self.graph.id))]
    pub async fn execute(&self, input: FxHashMap<String, Value>) -> ExecutionOutcome {
        self.memory.apply(input).await;
        let entry = self.graph.entry_node.clone();
        let end = self
            .run_segment(entry, None, FxHashMap::default(), &self.cancel, false)
            .await;
        self.conclude(end)
    }

    /// Re-enter a paused run at its recorded pause node.
    ///
    /// The pause check is skipped for the first node so the run moves past
    /// the point it suspended at.
    #[instrument(skip(self, input), fields(execution = %self.execution_id, node = %node))]
    pub async fn resume(&self, node: NodeId, input: FxHashMap<String, Value>) -> ExecutionOutcome {
        self.recorder.clear_paused();
        self.memory.apply(input).await;
        let end = self
            .run_segment(node, None, FxHashMap::default(), &self.cancel, true)
            .await;
        self.conclude(end)
    }

    fn conclude(&self, end: SegmentEnd) -> ExecutionOutcome {
        match end {
            SegmentEnd::Terminal | SegmentEnd::ReachedJoin => {
                self.recorder.finalize_completed();
                ExecutionOutcome::Finished(ExecutionResult {
                    success: true,
                    output: self.memory.snapshot(),
                    error: None,
                    run_id: self.recorder.run_id(),
                })
            }
            SegmentEnd::Paused(node) => {
                self.recorder.mark_paused(node.clone());
                ExecutionOutcome::Paused(ExecutionPausedAt {
                    node,
                    run_id: self.recorder.run_id(),
                    execution_id: self.execution_id.clone(),
                })
            }
            SegmentEnd::Failed { kind, message } => {
                self.recorder.finalize_failed(kind.as_str(), &message);
                ExecutionOutcome::Finished(ExecutionResult {
                    success: false,
                    output: self.memory.snapshot(),
                    error: Some(message),
                    run_id: self.recorder.run_id(),
                })
            }
        }
    }

    fn run_segment<'a>(
        &'a self,
        start: NodeId,
        stop_at: Option<NodeId>,
        carried: FxHashMap<String, Value>,
        cancel: &'a CancelToken,
        mut resuming: bool,
    ) -> Pin<Box<dyn Future<Output = SegmentEnd> + Send + 'a>> {
        Box::pin(async move {
            let mut current = start;
            let mut carried = carried;

            loop {
                if cancel.is_cancelled() {
                    return SegmentEnd::Failed {
                        kind: ErrorKind::Cancelled,
                        message: "execution cancelled".to_string(),
                    };
                }
                if stop_at.as_ref() == Some(&current) {
                    return SegmentEnd::ReachedJoin;
                }

                // Ceilings, checked before the node is issued.
                {
                    let mut counters = self.counters.lock();
                    if counters.steps >= self.graph.max_steps {
                        return SegmentEnd::Failed {
                            kind: ErrorKind::StepLimitExceeded,
                            message: format!(
                                "runaway graph: step ceiling {} reached at node {current}",
                                self.graph.max_steps
                            ),
                        };
                    }
                    counters.steps += 1;
                    let visits = counters.visits.entry(current.clone()).or_insert(0);
                    *visits += 1;
                    let node = self.graph.node(&current).expect("validated node id");
                    if node.max_node_visits > 0 && *visits > node.max_node_visits {
                        return SegmentEnd::Failed {
                            kind: ErrorKind::StepLimitExceeded,
                            message: format!(
                                "node {current} exceeded its visit ceiling ({})",
                                node.max_node_visits
                            ),
                        };
                    }
                }
                self.recorder.bump_step();

                if self.graph.is_pause(&current) && !resuming {
                    return SegmentEnd::Paused(current);
                }
                resuming = false;

                let node = self.graph.node(&current).expect("validated node id");
                let run = self.run_node_with_retries(node, &carried, cancel).await;
                let (success, output) = match run {
                    NodeRun::Success { output } => (true, output),
                    NodeRun::PauseRequired => return SegmentEnd::Paused(current),
                    NodeRun::Failed { kind, message } => {
                        // Failure is routable: an eligible on-failure (or
                        // always) edge absorbs it; otherwise it propagates.
                        match self.select_targets(node, false, &FxHashMap::default()).await {
                            Ok(routes) if !routes.is_empty() => {
                                match self
                                    .continue_or_fork(routes, stop_at.as_ref(), cancel)
                                    .await
                                {
                                    Continuation::Single(next, mapped) => {
                                        current = next;
                                        carried = mapped;
                                        continue;
                                    }
                                    Continuation::Segment(end) => return end,
                                }
                            }
                            _ => return SegmentEnd::Failed { kind, message },
                        }
                    }
                };

                if self.graph.is_terminal(&current) {
                    return SegmentEnd::Terminal;
                }

                let routes = match self.select_targets(node, success, &output).await {
                    Ok(routes) => routes,
                    Err(end) => return end,
                };
                if routes.is_empty() {
                    return SegmentEnd::Failed {
                        kind: ErrorKind::Validation,
                        message: format!(
                            "no eligible edge out of non-terminal node {current}"
                        ),
                    };
                }

                match self.continue_or_fork(routes, stop_at.as_ref(), cancel).await {
                    Continuation::Single(next, mapped) => {
                        current = next;
                        carried = mapped;
                    }
                    Continuation::Segment(end) => return end,
                }
            }
        })
    }

    async fn continue_or_fork(
        &self,
        routes: Vec<(NodeId, FxHashMap<String, Value>)>,
        stop_at: Option<&NodeId>,
        cancel: &CancelToken,
    ) -> Continuation {
        if routes.len() == 1 {
            let (next, mapped) = routes.into_iter().next().expect("one route");
            return Continuation::Single(next, mapped);
        }

        let targets: Vec<NodeId> = routes.iter().map(|(id, _)| id.clone()).collect();
        match convergence_node(&self.graph, &targets) {
            Some(join) => {
                tracing::debug!(join = %join, branches = targets.len(), "fork converges");
                let branches = routes.into_iter().map(|(target, mapped)| {
                    self.run_segment(target, Some(join.clone()), mapped, cancel, false)
                });
                let ends = join_all(branches).await;
                for end in ends {
                    match end {
                        SegmentEnd::ReachedJoin | SegmentEnd::Terminal => {}
                        other => return Continuation::Segment(other),
                    }
                }
                // The join node itself executes exactly once, on the main line.
                Continuation::Single(join, FxHashMap::default())
            }
            None => {
                tracing::debug!(branches = targets.len(), "fork without convergence");
                Continuation::Segment(self.run_free_branches(routes, stop_at, cancel).await)
            }
        }
    }

    /// Branches with no common descendant run to their own terminal nodes
    /// under the configured join policy.
    async fn run_free_branches(
        &self,
        routes: Vec<(NodeId, FxHashMap<String, Value>)>,
        stop_at: Option<&NodeId>,
        cancel: &CancelToken,
    ) -> SegmentEnd {
        match self.config.join_policy {
            JoinPolicy::WaitAll => {
                let branches = routes.into_iter().map(|(target, mapped)| {
                    self.run_segment(target, stop_at.cloned(), mapped, cancel, false)
                });
                let mut terminal_seen = false;
                for end in join_all(branches).await {
                    match end {
                        SegmentEnd::Terminal | SegmentEnd::ReachedJoin => terminal_seen = true,
                        other => return other,
                    }
                }
                debug_assert!(terminal_seen);
                SegmentEnd::Terminal
            }
            JoinPolicy::FirstTerminal => {
                let branch_cancel = cancel.child();
                let mut pending: Vec<_> = routes
                    .into_iter()
                    .map(|(target, mapped)| {
                        self.run_segment(target, stop_at.cloned(), mapped, &branch_cancel, false)
                    })
                    .collect();
                let mut first_defect: Option<SegmentEnd> = None;
                while !pending.is_empty() {
                    let (end, _, rest) = select_all(pending).await;
                    pending = rest;
                    match end {
                        SegmentEnd::Terminal | SegmentEnd::ReachedJoin => {
                            branch_cancel.cancel();
                            return SegmentEnd::Terminal;
                        }
                        other => first_defect = first_defect.or(Some(other)),
                    }
                }
                first_defect.unwrap_or(SegmentEnd::Terminal)
            }
        }
    }

    /// Run one node through its retry budget.
    async fn run_node_with_retries(
        &self,
        node: &NodeSpec,
        carried: &FxHashMap<String, Value>,
        cancel: &CancelToken,
    ) -> NodeRun {
        let executor = self
            .registry
            .resolve(node.node_type)
            .expect("bindings validated at construction");
        let budget = self.graph.retry_budget(node);
        let mut attempt: u32 = 0;
        let mut timed_out_before = false;

        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return NodeRun::Failed {
                    kind: ErrorKind::Cancelled,
                    message: "execution cancelled".to_string(),
                };
            }

            let ctx = self.assemble_context(node, carried, attempt);

            if node.node_type == crate::types::NodeType::ToolUse {
                let verdict = self
                    .guardrail
                    .review(&PolicyEvent {
                        execution_id: self.execution_id.clone(),
                        run_id: self.recorder.run_id(),
                        node_id: node.id.clone(),
                        phase: PolicyPhase::Before,
                        payload: serde_json::to_value(condition::redact_map(&ctx.inputs))
                            .unwrap_or(Value::Null),
                    })
                    .await;
                match verdict {
                    PolicyDecision::Allow => {}
                    PolicyDecision::RequireConfirmation => return NodeRun::PauseRequired,
                    PolicyDecision::Deny { severity, reason } => {
                        let retryable = severity == PolicySeverity::Advisory;
                        if retryable && attempt <= budget {
                            self.recorder.bump_retries();
                            self.backoff(attempt, false, cancel).await;
                            continue;
                        }
                        return NodeRun::Failed {
                            kind: ErrorKind::StepExecution,
                            message: format!("guardrail denied {}: {reason}", node.id),
                        };
                    }
                }
            }

            if let Some(breaker) = &self.breaker
                && !breaker.allow()
            {
                tracing::warn!(node = %node.id, "circuit breaker open, failing fast");
                if attempt <= budget {
                    self.recorder.bump_retries();
                    self.backoff(attempt, false, cancel).await;
                    continue;
                }
                return NodeRun::Failed {
                    kind: ErrorKind::StepExecution,
                    message: format!("circuit breaker open for node {}", node.id),
                };
            }

            self.emit(
                RuntimeEvent::new(EventType::NodeStarted)
                    .with_node(&node.id)
                    .with_data("attempt", Value::from(attempt)),
            )
            .await;

            let decision_id = self
                .recorder
                .begin_decision(
                    format!("execute {}", node.node_type),
                    vec![DecisionOption::new(
                        node.id.to_string(),
                        format!("{} node", node.node_type),
                    )],
                    node.id.to_string(),
                    format!("attempt {attempt} of node {}", node.id),
                )
                .ok();

            let started = Instant::now();
            let result = executor.execute(node, ctx.clone()).await;
            let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            match result {
                Ok(step_output) => {
                    return self
                        .complete_step(
                            node,
                            &ctx,
                            step_output,
                            decision_id,
                            latency_ms,
                            timed_out_before,
                        )
                        .await;
                }
                Err(err) => {
                    if let Some(breaker) = &self.breaker {
                        breaker.record_failure();
                    }
                    let evidence = if matches!(err, StepError::Timeout { .. })
                        && node.node_type == crate::types::NodeType::ToolUse
                    {
                        // The effect may have landed invisibly.
                        timed_out_before = true;
                        EvidenceGrade::Assumed
                    } else {
                        EvidenceGrade::Unknown
                    };
                    if let Some(decision_id) = &decision_id {
                        let _ = self.recorder.record_outcome(
                            decision_id,
                            Outcome::failure(err.to_string(), latency_ms).with_evidence(evidence),
                        );
                    }
                    self.emit(
                        RuntimeEvent::new(EventType::NodeError)
                            .with_node(&node.id)
                            .with_data("error", Value::String(err.to_string()))
                            .with_data("attempt", Value::from(attempt)),
                    )
                    .await;

                    if err.is_retryable() && attempt <= budget {
                        self.recorder.bump_retries();
                        tracing::debug!(
                            node = %node.id,
                            attempt,
                            budget,
                            error = %err,
                            "retrying step"
                        );
                        self.backoff(attempt, err.is_rate_limit(), cancel).await;
                        continue;
                    }
                    return NodeRun::Failed {
                        kind: ErrorKind::of_step_error(&err),
                        message: format!("node {} failed: {err}", node.id),
                    };
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn complete_step(
        &self,
        node: &NodeSpec,
        ctx: &StepContext,
        step_output: StepOutput,
        decision_id: Option<String>,
        latency_ms: u64,
        timed_out_before: bool,
    ) -> NodeRun {
        if let Some(breaker) = &self.breaker {
            breaker.record_success();
        }
        self.recorder.add_tokens(step_output.tokens_used);

        // A success that follows a timed-out attempt is only assumed to have
        // taken effect once: the earlier issue may have landed invisibly.
        let mut evidence = if timed_out_before {
            EvidenceGrade::Assumed
        } else {
            EvidenceGrade::Observed
        };
        if node.node_type == crate::types::NodeType::ToolUse {
            let verdict = self
                .guardrail
                .review(&PolicyEvent {
                    execution_id: self.execution_id.clone(),
                    run_id: self.recorder.run_id(),
                    node_id: node.id.clone(),
                    phase: PolicyPhase::After,
                    payload: serde_json::to_value(condition::redact_map(&step_output.output))
                        .unwrap_or(Value::Null),
                })
                .await;
            match verdict {
                PolicyDecision::Allow => evidence = EvidenceGrade::Confirmed,
                PolicyDecision::RequireConfirmation => {
                    if let Some(decision_id) = &decision_id {
                        let _ = self.recorder.record_outcome(
                            decision_id,
                            Outcome::success(
                                serde_json::to_value(&step_output.output)
                                    .unwrap_or(Value::Null),
                                latency_ms,
                            )
                            .with_evidence(EvidenceGrade::Observed),
                        );
                    }
                    return NodeRun::PauseRequired;
                }
                PolicyDecision::Deny { reason, .. } => {
                    // The effect already happened; the denial is recorded as a
                    // failed outcome and the node fails without retry.
                    if let Some(decision_id) = &decision_id {
                        let _ = self.recorder.record_outcome(
                            decision_id,
                            Outcome::failure(format!("guardrail denied result: {reason}"),
                                latency_ms),
                        );
                    }
                    return NodeRun::Failed {
                        kind: ErrorKind::StepExecution,
                        message: format!("guardrail denied result of {}: {reason}", node.id),
                    };
                }
            }
        }

        // Only the declared output keys flow back into shared memory.
        let mut merged = FxHashMap::default();
        for key in &node.output_keys {
            if let Some(value) = step_output.output.get(key) {
                merged.insert(key.clone(), value.clone());
            }
        }
        self.memory.apply(merged).await;

        if let Some(decision_id) = &decision_id {
            let _ = self.recorder.record_outcome(
                decision_id,
                Outcome::success(
                    serde_json::to_value(&step_output.output).unwrap_or(Value::Null),
                    latency_ms,
                )
                .with_evidence(evidence),
            );
        }
        self.emit(
            RuntimeEvent::new(EventType::NodeCompleted)
                .with_node(&node.id)
                .with_data("latency_ms", Value::from(latency_ms))
                .with_data("step", Value::from(ctx.step)),
        )
        .await;

        NodeRun::Success {
            output: step_output.output,
        }
    }

    /// Evaluate outgoing edges in descending priority order and collect the
    /// fired targets with their mapped inputs.
    ///
    /// Several eligible edges to the same target are deduplicated; the
    /// highest-priority one supplies the input mapping.
    async fn select_targets(
        &self,
        node: &NodeSpec,
        success: bool,
        output: &FxHashMap<String, Value>,
    ) -> Result<Vec<(NodeId, FxHashMap<String, Value>)>, SegmentEnd> {
        let memory_snapshot = self.memory.snapshot();
        let scope = ConditionScope::new(output, &memory_snapshot);

        let mut fired: Vec<&EdgeSpec> = Vec::new();
        let mut decide_candidates: Vec<&EdgeSpec> = Vec::new();
        for edge in self.graph.outgoing(&node.id) {
            match edge.condition {
                EdgeCondition::Always => fired.push(edge),
                EdgeCondition::OnSuccess if success => fired.push(edge),
                EdgeCondition::OnFailure if !success => fired.push(edge),
                EdgeCondition::OnSuccess | EdgeCondition::OnFailure => {}
                EdgeCondition::Conditional => {
                    let expr = edge.condition_expr.as_deref().unwrap_or("false");
                    match condition::evaluate(expr, &scope) {
                        Ok(true) => fired.push(edge),
                        Ok(false) => {}
                        Err(err) => {
                            tracing::warn!(
                                source = %edge.source,
                                target = %edge.target,
                                error = %err,
                                memory = ?condition::redact_map(&memory_snapshot),
                                "guard expression failed to evaluate"
                            );
                            return Err(SegmentEnd::Failed {
                                kind: ErrorKind::Validation,
                                message: format!(
                                    "guard expression on edge {} -> {} failed: {err}",
                                    edge.source, edge.target
                                ),
                            });
                        }
                    }
                }
                EdgeCondition::ModelDecide => decide_candidates.push(edge),
            }
        }

        if !decide_candidates.is_empty() {
            let candidates: Vec<NodeId> = decide_candidates
                .iter()
                .map(|e| e.target.clone())
                .collect();
            let executor = self
                .registry
                .resolve(node.node_type)
                .expect("bindings validated at construction");
            let ctx = self.assemble_context(node, output, 1);
            match executor.decide(node, &candidates, &ctx).await {
                Ok(chosen) => {
                    let decision = self.recorder.begin_decision(
                        "route model-decide edge",
                        candidates
                            .iter()
                            .map(|c| DecisionOption::new(c.to_string(), "candidate target"))
                            .collect(),
                        chosen.to_string(),
                        format!("collaborator decision at node {}", node.id),
                    );
                    if let Ok(decision_id) = decision {
                        let _ = self
                            .recorder
                            .record_outcome(&decision_id, Outcome::success(Value::Null, 0));
                    }
                    match decide_candidates.iter().find(|e| e.target == chosen) {
                        Some(edge) => fired.push(edge),
                        None => {
                            return Err(SegmentEnd::Failed {
                                kind: ErrorKind::Validation,
                                message: format!(
                                    "decide() chose {chosen}, not a candidate of node {}",
                                    node.id
                                ),
                            });
                        }
                    }
                }
                Err(err) => {
                    return Err(SegmentEnd::Failed {
                        kind: ErrorKind::of_step_error(&err),
                        message: format!("model-decide at node {} failed: {err}", node.id),
                    });
                }
            }
        }

        let mut routes: Vec<(NodeId, FxHashMap<String, Value>)> = Vec::new();
        for edge in fired {
            if routes.iter().any(|(target, _)| target == &edge.target) {
                continue;
            }
            let mut mapped = FxHashMap::default();
            for (from, to) in &edge.input_mapping {
                if let Some(value) = output.get(from) {
                    mapped.insert(to.clone(), value.clone());
                }
            }
            routes.push((edge.target.clone(), mapped));
        }
        Ok(routes)
    }

    fn assemble_context(
        &self,
        node: &NodeSpec,
        carried: &FxHashMap<String, Value>,
        attempt: u32,
    ) -> StepContext {
        let memory_snapshot = self.memory.snapshot();
        let mut inputs = FxHashMap::default();
        for key in &node.input_keys {
            if let Some(value) = memory_snapshot.get(key) {
                inputs.insert(key.clone(), value.clone());
            }
        }
        // Edge-mapped values override the plain memory resolution.
        for (key, value) in carried {
            inputs.insert(key.clone(), value.clone());
        }
        StepContext {
            node_id: node.id.clone(),
            execution_id: self.execution_id.clone(),
            run_id: self.recorder.run_id(),
            stream_id: self.stream_id.clone(),
            step: self.counters.lock().steps,
            attempt,
            inputs,
        }
    }

    async fn backoff(&self, attempt: u32, rate_limited: bool, cancel: &CancelToken) {
        let base = if rate_limited {
            self.config.base_backoff * 4
        } else {
            self.config.base_backoff
        };
        let exp = base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let capped = exp.min(self.config.max_backoff);
        let jitter = rand::rng().random_range(0.0..0.25);
        let sleep = capped.mul_f64(1.0 + jitter);
        tokio::select! {
            () = tokio::time::sleep(sleep) => {}
            () = cancel.cancelled() => {}
        }
    }

    async fn emit(&self, event: RuntimeEvent) {
        let Some(bus) = &self.bus else { return };
        let mut event = event.with_execution(self.execution_id.clone());
        if let Some(stream) = &self.stream_id {
            event = event.with_stream(stream.clone());
        }
        bus.publish(event).await;
    }
}

enum Continuation {
    Single(NodeId, FxHashMap<String, Value>),
    Segment(SegmentEnd),
}
