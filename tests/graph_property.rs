//! Property tests for divergent-cycle validation.

use proptest::prelude::*;

use skeinrun::graph::{EdgeSpec, GraphBuilder, GraphValidationError, NodeSpec};
use skeinrun::types::NodeType;

fn ring_builder(size: usize) -> GraphBuilder {
    let mut builder = GraphBuilder::new("ring", "goal-ring");
    for i in 0..size {
        builder = builder.add_node(NodeSpec::new(format!("n{i}"), NodeType::Function));
    }
    for i in 0..size {
        let next = (i + 1) % size;
        builder = builder.add_edge(EdgeSpec::always(format!("n{i}"), format!("n{next}")));
    }
    builder.entry("n0")
}

proptest! {
    /// Any ring of unconditional edges with no other exit is a divergent
    /// cycle and must be rejected.
    #[test]
    fn unconditional_rings_are_rejected(size in 1usize..8) {
        let err = ring_builder(size).build().unwrap_err();
        let is_divergent_cycle = matches!(err, GraphValidationError::DivergentCycle { .. });
        prop_assert!(is_divergent_cycle);
    }

    /// Adding one conditional exit anywhere on the ring makes it valid.
    #[test]
    fn a_conditional_exit_anywhere_makes_the_ring_valid(
        size in 1usize..8,
        exit_from in 0usize..8,
    ) {
        let exit_from = exit_from % size;
        let graph = ring_builder(size)
            .add_node(NodeSpec::new("out", NodeType::Function))
            .add_edge(EdgeSpec::conditional(
                format!("n{exit_from}"),
                "out",
                "done == true",
            ))
            .terminal("out")
            .build();
        prop_assert!(graph.is_ok());
    }

    /// An unconditional edge leaving the ring is also an exit.
    #[test]
    fn an_escaping_always_edge_makes_the_ring_valid(
        size in 1usize..8,
        exit_from in 0usize..8,
    ) {
        let exit_from = exit_from % size;
        let graph = ring_builder(size)
            .add_node(NodeSpec::new("out", NodeType::Function))
            .add_edge(EdgeSpec::always(format!("n{exit_from}"), "out"))
            .terminal("out")
            .build();
        prop_assert!(graph.is_ok());
    }
}
