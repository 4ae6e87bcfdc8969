mod common;

use async_trait::async_trait;
use common::*;
use rustc_hash::FxHashMap;
use serde_json::json;
use std::sync::Arc;

use skeinrun::executor::{
    ExecutionOutcome, ExecutorError, ExecutorRegistry, GraphExecutor, Guardrail, PolicyDecision,
    PolicyEvent, PolicyPhase, PolicySeverity, StepError,
};
use skeinrun::graph::{EdgeSpec, GraphBuilder};
use skeinrun::types::{NodeId, NodeType, RunStatus};

fn build_executor(
    graph: Arc<skeinrun::graph::GraphSpec>,
    step: Arc<RecordingExecutor>,
) -> (GraphExecutor, skeinrun::run::RunRecorder) {
    let (_state, scope, recorder) = scratch_scope();
    let executor = GraphExecutor::new(graph, registry_with(step), scope, recorder.clone())
        .expect("all node types bound");
    (executor, recorder)
}

fn finished(outcome: ExecutionOutcome) -> skeinrun::executor::ExecutionResult {
    match outcome {
        ExecutionOutcome::Finished(result) => result,
        ExecutionOutcome::Paused(paused) => panic!("unexpected pause at {}", paused.node),
    }
}

#[tokio::test]
async fn linear_graph_runs_to_completion() {
    let step = Arc::new(RecordingExecutor::new());
    let (executor, recorder) = build_executor(linear_graph(), step.clone());

    let result = finished(executor.execute(input(&[("text", json!("hi"))])).await);

    assert!(result.success);
    assert_eq!(step.visits(), vec!["a", "b", "c"]);
    assert_eq!(result.output.get("text"), Some(&json!("hi")));

    let record = recorder.snapshot();
    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.decisions.len(), 3);
    assert!(record.decisions.iter().all(|d| d.outcome.is_some()));
    assert_eq!(record.metrics.steps, 3);
}

#[tokio::test]
async fn diamond_executes_join_node_exactly_once() {
    let step = Arc::new(RecordingExecutor::new());
    let (executor, recorder) = build_executor(diamond_graph(), step.clone());

    let result = finished(executor.execute(FxHashMap::default()).await);

    assert!(result.success);
    assert_eq!(step.visit_count("s"), 1);
    assert_eq!(step.visit_count("a"), 1);
    assert_eq!(step.visit_count("b"), 1);
    assert_eq!(step.visit_count("c"), 1, "join node must run exactly once");
    assert_eq!(recorder.snapshot().status, RunStatus::Completed);
}

#[tokio::test]
async fn retryable_failures_consume_the_retry_budget_then_succeed() {
    let graph = Arc::new(
        GraphBuilder::new("retry", "goal-retry")
            .add_node(node("flaky").with_max_retries(3))
            .entry("flaky")
            .terminal("flaky")
            .build()
            .unwrap(),
    );
    let step = Arc::new(RecordingExecutor::new().failing("flaky", 2));
    let (executor, recorder) = build_executor(graph, step.clone());

    let result = finished(executor.execute(FxHashMap::default()).await);

    assert!(result.success);
    assert_eq!(step.visit_count("flaky"), 3);
    let record = recorder.snapshot();
    assert_eq!(record.metrics.retries, 2);
}

#[tokio::test]
async fn exhausted_retry_budget_fails_the_run_with_its_kind() {
    let graph = Arc::new(
        GraphBuilder::new("exhaust", "goal-exhaust")
            .add_node(node("flaky").with_max_retries(1))
            .entry("flaky")
            .terminal("flaky")
            .build()
            .unwrap(),
    );
    let step = Arc::new(RecordingExecutor::new().failing("flaky", 5));
    let (executor, recorder) = build_executor(graph, step.clone());

    let result = finished(executor.execute(FxHashMap::default()).await);

    assert!(!result.success);
    let record = recorder.snapshot();
    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.error_kind.as_deref(), Some("step_execution"));
    assert!(record.summary.is_some(), "failed runs carry a summary");
}

#[tokio::test]
async fn non_retryable_failure_is_not_retried() {
    let graph = Arc::new(
        GraphBuilder::new("fatal", "goal-fatal")
            .add_node(node("bad").with_max_retries(5))
            .entry("bad")
            .terminal("bad")
            .build()
            .unwrap(),
    );
    let step = Arc::new(
        RecordingExecutor::new()
            .failing("bad", 5)
            .with_fail_kind(|| StepError::InvalidInput("schema violation".to_string())),
    );
    let (executor, recorder) = build_executor(graph, step.clone());

    let result = finished(executor.execute(FxHashMap::default()).await);

    assert!(!result.success);
    assert_eq!(step.visit_count("bad"), 1, "fatal errors skip the budget");
    assert_eq!(
        recorder.snapshot().error_kind.as_deref(),
        Some("validation")
    );
}

#[tokio::test]
async fn conditional_edges_route_on_memory_values() {
    let graph = Arc::new(
        GraphBuilder::new("route", "goal-route")
            .add_node(node("check").with_output_keys(["score"]))
            .add_node(node("high"))
            .add_node(node("low"))
            .add_edge(EdgeSpec::conditional("check", "high", "score >= 10"))
            .add_edge(EdgeSpec::conditional("check", "low", "score < 10"))
            .entry("check")
            .terminal("high")
            .terminal("low")
            .build()
            .unwrap(),
    );
    let step = Arc::new(RecordingExecutor::new().with_output("check", "score", json!(3)));
    let (executor, _recorder) = build_executor(graph, step.clone());

    let result = finished(executor.execute(FxHashMap::default()).await);

    assert!(result.success);
    assert_eq!(step.visit_count("low"), 1);
    assert_eq!(step.visit_count("high"), 0);
}

#[tokio::test]
async fn on_failure_edge_absorbs_a_failed_node() {
    let graph = Arc::new(
        GraphBuilder::new("recover", "goal-recover")
            .add_node(node("risky"))
            .add_node(node("cleanup"))
            .add_node(node("done"))
            .add_edge(EdgeSpec::on_failure("risky", "cleanup"))
            .add_edge(EdgeSpec::on_success("risky", "done"))
            .add_edge(EdgeSpec::always("cleanup", "done"))
            .entry("risky")
            .terminal("done")
            .build()
            .unwrap(),
    );
    // Budget 0: the single failure propagates straight to edge evaluation.
    let step = Arc::new(RecordingExecutor::new().failing("risky", 1));
    let (executor, recorder) = build_executor(graph, step.clone());

    let result = finished(executor.execute(FxHashMap::default()).await);

    assert!(result.success, "on-failure path completes the run");
    assert_eq!(step.visit_count("cleanup"), 1);
    assert_eq!(recorder.snapshot().status, RunStatus::Completed);
}

#[tokio::test]
async fn model_decide_defers_to_the_collaborator() {
    let graph = Arc::new(
        GraphBuilder::new("decide", "goal-decide")
            .add_node(node("router"))
            .add_node(node("alpha"))
            .add_node(node("beta"))
            .add_edge(EdgeSpec::model_decide("router", "alpha"))
            .add_edge(EdgeSpec::model_decide("router", "beta"))
            .entry("router")
            .terminal("alpha")
            .terminal("beta")
            .build()
            .unwrap(),
    );
    let step = Arc::new(RecordingExecutor::new().deciding("beta"));
    let (executor, recorder) = build_executor(graph, step.clone());

    let result = finished(executor.execute(FxHashMap::default()).await);

    assert!(result.success);
    assert_eq!(step.visit_count("beta"), 1);
    assert_eq!(step.visit_count("alpha"), 0);
    let record = recorder.snapshot();
    assert!(
        record
            .decisions
            .iter()
            .any(|d| d.options.len() == 2 && d.chosen_option_id == "beta"),
        "the routing choice is recorded with its candidates"
    );
}

#[tokio::test]
async fn step_ceiling_stops_a_runaway_cycle() {
    let graph = Arc::new(
        GraphBuilder::new("runaway", "goal-runaway")
            .add_node(node("spin"))
            .add_node(node("exit"))
            .add_edge(EdgeSpec::always("spin", "spin"))
            // Conditional exit keeps validation happy but never fires.
            .add_edge(EdgeSpec::conditional("spin", "exit", "false"))
            .entry("spin")
            .terminal("exit")
            .max_steps(10)
            .build()
            .unwrap(),
    );
    let step = Arc::new(RecordingExecutor::new());
    let (executor, recorder) = build_executor(graph, step.clone());

    let result = finished(executor.execute(FxHashMap::default()).await);

    assert!(!result.success);
    assert_eq!(
        recorder.snapshot().error_kind.as_deref(),
        Some("step_limit_exceeded")
    );
    assert_eq!(step.visit_count("spin"), 10);
}

#[tokio::test]
async fn node_visit_ceiling_is_a_secondary_breaker() {
    let graph = Arc::new(
        GraphBuilder::new("visits", "goal-visits")
            .add_node(node("spin").with_max_node_visits(3))
            .add_node(node("exit"))
            .add_edge(EdgeSpec::always("spin", "spin"))
            .add_edge(EdgeSpec::conditional("spin", "exit", "false"))
            .entry("spin")
            .terminal("exit")
            .max_steps(1000)
            .build()
            .unwrap(),
    );
    let step = Arc::new(RecordingExecutor::new());
    let (executor, _recorder) = build_executor(graph, step.clone());

    let result = finished(executor.execute(FxHashMap::default()).await);

    assert!(!result.success);
    assert_eq!(step.visit_count("spin"), 3);
}

#[tokio::test]
async fn pause_node_suspends_and_resume_reenters_once() {
    let graph = Arc::new(
        GraphBuilder::new("pausing", "goal-pausing")
            .add_node(node("gather"))
            .add_node(node("approval"))
            .add_node(node("finish"))
            .add_edge(EdgeSpec::always("gather", "approval"))
            .add_edge(EdgeSpec::always("approval", "finish"))
            .entry("gather")
            .pause("approval")
            .terminal("finish")
            .build()
            .unwrap(),
    );
    let step = Arc::new(RecordingExecutor::new());
    let (executor, recorder) = build_executor(graph, step.clone());

    let paused = match executor.execute(FxHashMap::default()).await {
        ExecutionOutcome::Paused(paused) => paused,
        ExecutionOutcome::Finished(result) => panic!("expected pause, got {result:?}"),
    };
    assert_eq!(paused.node, NodeId::from("approval"));
    assert_eq!(
        recorder.snapshot().paused_node,
        Some(NodeId::from("approval"))
    );
    assert_eq!(step.visit_count("approval"), 0, "pause happens before work");

    let result = finished(executor.resume(paused.node, FxHashMap::default()).await);
    assert!(result.success);
    assert_eq!(step.visit_count("approval"), 1);
    assert_eq!(step.visit_count("finish"), 1);
    assert_eq!(recorder.snapshot().paused_node, None);
}

#[tokio::test]
async fn missing_binding_is_a_fatal_configuration_error() {
    let graph = Arc::new(
        GraphBuilder::new("unbound", "goal-unbound")
            .add_node(skeinrun::graph::NodeSpec::new("call", NodeType::ModelCall))
            .entry("call")
            .terminal("call")
            .build()
            .unwrap(),
    );
    let registry = Arc::new(
        ExecutorRegistry::new().with(NodeType::Function, Arc::new(RecordingExecutor::new())),
    );
    let (_state, scope, recorder) = scratch_scope();

    let err = GraphExecutor::new(graph, registry, scope, recorder).unwrap_err();
    assert!(matches!(err, ExecutorError::Configuration { .. }));
}

/// Policy double: denies tool steps before they run, allows everything else.
struct BlockTools;

#[async_trait]
impl Guardrail for BlockTools {
    async fn review(&self, event: &PolicyEvent) -> PolicyDecision {
        match event.phase {
            PolicyPhase::Before => PolicyDecision::Deny {
                severity: PolicySeverity::Blocking,
                reason: "tool use forbidden".to_string(),
            },
            PolicyPhase::After => PolicyDecision::Allow,
        }
    }
}

/// Policy double: every tool step needs a human in the loop.
struct NeedsApproval;

#[async_trait]
impl Guardrail for NeedsApproval {
    async fn review(&self, _event: &PolicyEvent) -> PolicyDecision {
        PolicyDecision::RequireConfirmation
    }
}

fn tool_graph() -> Arc<skeinrun::graph::GraphSpec> {
    Arc::new(
        GraphBuilder::new("tooling", "goal-tooling")
            .add_node(skeinrun::graph::NodeSpec::new("call", NodeType::ToolUse))
            .entry("call")
            .terminal("call")
            .build()
            .unwrap(),
    )
}

#[tokio::test]
async fn blocking_guardrail_denial_fails_the_node_without_running_it() {
    let step = Arc::new(RecordingExecutor::new());
    let (_state, scope, recorder) = scratch_scope();
    let executor = GraphExecutor::new(tool_graph(), registry_with(step.clone()), scope, recorder)
        .unwrap()
        .with_guardrail(Arc::new(BlockTools));

    let result = finished(executor.execute(FxHashMap::default()).await);

    assert!(!result.success);
    assert_eq!(step.visit_count("call"), 0, "the side effect never issues");
    assert!(result.error.unwrap().contains("tool use forbidden"));
}

#[tokio::test]
async fn require_confirmation_is_an_implicit_pause() {
    let step = Arc::new(RecordingExecutor::new());
    let (_state, scope, recorder) = scratch_scope();
    let executor = GraphExecutor::new(tool_graph(), registry_with(step.clone()), scope, recorder)
        .unwrap()
        .with_guardrail(Arc::new(NeedsApproval));

    match executor.execute(FxHashMap::default()).await {
        ExecutionOutcome::Paused(paused) => assert_eq!(paused.node, NodeId::from("call")),
        ExecutionOutcome::Finished(result) => panic!("expected pause, got {result:?}"),
    }
    assert_eq!(step.visit_count("call"), 0);
}

#[tokio::test]
async fn edge_mapping_renames_outputs_for_the_target() {
    let graph = Arc::new(
        GraphBuilder::new("mapping", "goal-mapping")
            .add_node(node("produce").with_output_keys(["raw"]))
            .add_node(node("consume").with_input_keys(["refined"]).with_output_keys(["refined"]))
            .add_edge(EdgeSpec::always("produce", "consume").with_mapping("raw", "refined"))
            .entry("produce")
            .terminal("consume")
            .build()
            .unwrap(),
    );
    let step = Arc::new(RecordingExecutor::new().with_output("produce", "raw", json!("ore")));
    let (executor, _recorder) = build_executor(graph, step);

    let result = finished(executor.execute(FxHashMap::default()).await);

    assert!(result.success);
    assert_eq!(result.output.get("refined"), Some(&json!("ore")));
}
