//! Graph and runtime fixtures shared across integration tests.

use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;

use skeinrun::executor::{ExecutorRegistry, StepExecutor};
use skeinrun::graph::{EdgeSpec, GraphBuilder, GraphSpec, NodeSpec};
use skeinrun::memory::{ScopeHandle, StateStore};
use skeinrun::run::RunRecorder;
use skeinrun::types::{NodeType, StateScope};

pub fn node(id: &str) -> NodeSpec {
    NodeSpec::new(id, NodeType::Function)
}

/// a -> b -> c, entry a, terminal c; all keys flow through.
pub fn linear_graph() -> Arc<GraphSpec> {
    Arc::new(
        GraphBuilder::new("linear", "goal-linear")
            .add_node(node("a").with_input_keys(["text"]).with_output_keys(["text"]))
            .add_node(node("b").with_input_keys(["text"]).with_output_keys(["text"]))
            .add_node(node("c").with_input_keys(["text"]).with_output_keys(["text"]))
            .add_edge(EdgeSpec::always("a", "b"))
            .add_edge(EdgeSpec::always("b", "c"))
            .entry("a")
            .terminal("c")
            .build()
            .expect("valid linear graph"),
    )
}

/// Diamond s -> {a, b} -> c, entry s, terminal c.
pub fn diamond_graph() -> Arc<GraphSpec> {
    Arc::new(
        GraphBuilder::new("diamond", "goal-diamond")
            .add_node(node("s"))
            .add_node(node("a"))
            .add_node(node("b"))
            .add_node(node("c"))
            .add_edge(EdgeSpec::always("s", "a"))
            .add_edge(EdgeSpec::always("s", "b"))
            .add_edge(EdgeSpec::always("a", "c"))
            .add_edge(EdgeSpec::always("b", "c"))
            .entry("s")
            .terminal("c")
            .build()
            .expect("valid diamond graph"),
    )
}

pub fn registry_with(executor: Arc<dyn StepExecutor>) -> Arc<ExecutorRegistry> {
    Arc::new(ExecutorRegistry::new().with_all(executor))
}

/// Private scope plus recorder for driving a [`GraphExecutor`] directly.
pub fn scratch_scope() -> (Arc<StateStore>, ScopeHandle, RunRecorder) {
    let state = Arc::new(StateStore::new());
    let scope = state.scope(StateScope::Execution("test".to_string()), false);
    let recorder = RunRecorder::new("goal-test");
    (state, scope, recorder)
}

pub fn input(entries: &[(&str, Value)]) -> FxHashMap<String, Value> {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}
