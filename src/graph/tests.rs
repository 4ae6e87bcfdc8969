use super::*;
use crate::types::{NodeId, NodeType};

fn node(id: &str) -> NodeSpec {
    NodeSpec::new(id, NodeType::Function)
}

fn id(s: &str) -> NodeId {
    NodeId::from(s)
}

#[test]
fn unconditional_cycle_without_exit_is_rejected() {
    let err = GraphBuilder::new("loop", "g")
        .add_node(node("a"))
        .add_node(node("b"))
        .add_edge(EdgeSpec::always("a", "b"))
        .add_edge(EdgeSpec::always("b", "a"))
        .entry("a")
        .build()
        .unwrap_err();
    assert!(matches!(err, GraphValidationError::DivergentCycle { .. }));
}

#[test]
fn unconditional_self_loop_is_rejected() {
    let err = GraphBuilder::new("selfloop", "g")
        .add_node(node("a"))
        .add_edge(EdgeSpec::always("a", "a"))
        .entry("a")
        .build()
        .unwrap_err();
    assert!(matches!(err, GraphValidationError::DivergentCycle { .. }));
}

#[test]
fn cycle_with_conditional_exit_is_accepted() {
    let graph = GraphBuilder::new("retry-loop", "g")
        .add_node(node("work"))
        .add_node(node("check"))
        .add_node(node("done"))
        .add_edge(EdgeSpec::always("work", "check"))
        .add_edge(EdgeSpec::always("check", "work"))
        .add_edge(EdgeSpec::conditional("check", "done", "attempts > 3"))
        .entry("work")
        .terminal("done")
        .build()
        .unwrap();
    assert_eq!(graph.nodes.len(), 3);
}

#[test]
fn cycle_with_edge_leaving_it_is_accepted() {
    // The exit edge is unconditional but leaves the cycle, so the component
    // has an alternative exit.
    let graph = GraphBuilder::new("escaping-loop", "g")
        .add_node(node("a"))
        .add_node(node("b"))
        .add_node(node("out"))
        .add_edge(EdgeSpec::always("a", "b"))
        .add_edge(EdgeSpec::always("b", "a"))
        .add_edge(EdgeSpec::always("b", "out"))
        .entry("a")
        .terminal("out")
        .build()
        .unwrap();
    assert_eq!(graph.edges.len(), 3);
}

#[test]
fn on_failure_edge_counts_as_conditional_exit() {
    let graph = GraphBuilder::new("failure-exit", "g")
        .add_node(node("a"))
        .add_node(node("b"))
        .add_node(node("recover"))
        .add_edge(EdgeSpec::always("a", "b"))
        .add_edge(EdgeSpec::always("b", "a"))
        .add_edge(EdgeSpec::on_failure("a", "recover"))
        .entry("a")
        .terminal("recover")
        .build()
        .unwrap();
    assert_eq!(graph.nodes.len(), 3);
}

#[test]
fn unknown_edge_endpoint_is_rejected() {
    let err = GraphBuilder::new("bad-edge", "g")
        .add_node(node("a"))
        .add_edge(EdgeSpec::always("a", "ghost"))
        .entry("a")
        .build()
        .unwrap_err();
    assert!(matches!(
        err,
        GraphValidationError::UnknownEdgeEndpoint { .. }
    ));
}

#[test]
fn duplicate_node_id_is_rejected() {
    let err = GraphBuilder::new("dup", "g")
        .add_node(node("a"))
        .add_node(node("a"))
        .entry("a")
        .build()
        .unwrap_err();
    assert!(matches!(err, GraphValidationError::DuplicateNode { .. }));
}

#[test]
fn missing_entry_is_rejected() {
    let err = GraphBuilder::new("no-entry", "g")
        .add_node(node("a"))
        .build()
        .unwrap_err();
    assert!(matches!(err, GraphValidationError::MissingEntry));
}

#[test]
fn undeclared_entry_is_rejected() {
    let err = GraphBuilder::new("ghost-entry", "g")
        .add_node(node("a"))
        .entry("ghost")
        .build()
        .unwrap_err();
    assert!(matches!(err, GraphValidationError::UndeclaredEntry { .. }));
}

#[test]
fn outgoing_edges_are_ordered_by_descending_priority() {
    let graph = GraphBuilder::new("prio", "g")
        .add_node(node("a"))
        .add_node(node("low"))
        .add_node(node("high"))
        .add_edge(EdgeSpec::always("a", "low").with_priority(1))
        .add_edge(EdgeSpec::always("a", "high").with_priority(10))
        .entry("a")
        .terminal("low")
        .terminal("high")
        .build()
        .unwrap();

    let targets: Vec<&NodeId> = graph.outgoing(&id("a")).map(|e| &e.target).collect();
    assert_eq!(targets, vec![&id("high"), &id("low")]);
}

#[test]
fn convergence_prefers_shallowest_common_descendant() {
    // a -> x -> m -> z, b -> m: both m and z are common descendants, but m is
    // nearer by BFS depth and must win.
    let graph = GraphBuilder::new("conv", "g")
        .add_node(node("a"))
        .add_node(node("b"))
        .add_node(node("x"))
        .add_node(node("m"))
        .add_node(node("z"))
        .add_edge(EdgeSpec::always("a", "x"))
        .add_edge(EdgeSpec::always("x", "m"))
        .add_edge(EdgeSpec::always("m", "z"))
        .add_edge(EdgeSpec::always("b", "m"))
        .entry("a")
        .terminal("z")
        .build()
        .unwrap();

    let found = convergence_node(&graph, &[id("a"), id("b")]);
    assert_eq!(found, Some(id("m")));
}

#[test]
fn convergence_of_diamond_is_the_join_node() {
    let graph = GraphBuilder::new("diamond", "g")
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
        .unwrap();

    assert_eq!(convergence_node(&graph, &[id("a"), id("b")]), Some(id("c")));
}

#[test]
fn convergence_absent_for_disjoint_branches() {
    let graph = GraphBuilder::new("disjoint", "g")
        .add_node(node("a"))
        .add_node(node("a_end"))
        .add_node(node("b"))
        .add_node(node("b_end"))
        .add_edge(EdgeSpec::always("a", "a_end"))
        .add_edge(EdgeSpec::always("b", "b_end"))
        .entry("a")
        .terminal("a_end")
        .terminal("b_end")
        .build()
        .unwrap();

    assert_eq!(convergence_node(&graph, &[id("a"), id("b")]), None);
}

#[test]
fn branch_target_converges_on_another_target() {
    // a flows into b; b is its own descendant at depth zero, so the branches
    // converge at b itself.
    let graph = GraphBuilder::new("nested", "g")
        .add_node(node("a"))
        .add_node(node("b"))
        .add_edge(EdgeSpec::always("a", "b"))
        .entry("a")
        .terminal("b")
        .build()
        .unwrap();

    assert_eq!(convergence_node(&graph, &[id("a"), id("b")]), Some(id("b")));
}
