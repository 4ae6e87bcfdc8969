//! Structural validation for workflow graphs.
//!
//! The single non-local check is divergent-cycle rejection: a cycle in which
//! every edge is unconditional and no node in the cycle has an alternative
//! exit can never leave the cycle at runtime, so it is rejected at build time.
//! Cycles that keep a conditional exit (or any edge leading out of the cycle)
//! are legitimate loop constructs and pass.

use miette::Diagnostic;
use thiserror::Error;

use super::spec::GraphSpec;
use crate::types::NodeId;

/// Errors produced while validating a graph specification.
///
/// All variants are fatal at graph-load time and never retried.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphValidationError {
    #[error("graph has no nodes")]
    #[diagnostic(
        code(skeinrun::graph::empty),
        help("Add at least one node before building the graph.")
    )]
    EmptyGraph,

    #[error("duplicate node id: {id}")]
    #[diagnostic(
        code(skeinrun::graph::duplicate_node),
        help("Node ids must be unique within one graph.")
    )]
    DuplicateNode { id: NodeId },

    #[error("edge #{edge_index} references undeclared node: {id}")]
    #[diagnostic(
        code(skeinrun::graph::unknown_edge_endpoint),
        help("Every edge source and target must be a declared node id.")
    )]
    UnknownEdgeEndpoint { edge_index: usize, id: NodeId },

    #[error("no entry node declared")]
    #[diagnostic(
        code(skeinrun::graph::missing_entry),
        help("Declare the entry node with GraphBuilder::entry.")
    )]
    MissingEntry,

    #[error("entry node is not declared in the graph: {id}")]
    #[diagnostic(code(skeinrun::graph::undeclared_entry))]
    UndeclaredEntry { id: NodeId },

    #[error("terminal or pause marker references undeclared node: {id}")]
    #[diagnostic(code(skeinrun::graph::undeclared_marker))]
    UndeclaredMarker { id: NodeId },

    #[error("entry point {name:?} references undeclared node: {id}")]
    #[diagnostic(code(skeinrun::graph::unknown_entry_point))]
    UnknownEntryPoint { name: String, id: NodeId },

    #[error("divergent cycle with no conditional exit: {}", format_cycle(.nodes))]
    #[diagnostic(
        code(skeinrun::graph::divergent_cycle),
        help(
            "Every cycle needs at least one conditional edge or an edge \
             leading out of the cycle, otherwise execution can never leave it."
        )
    )]
    DivergentCycle { nodes: Vec<NodeId> },
}

fn format_cycle(nodes: &[NodeId]) -> String {
    let mut ids: Vec<&str> = nodes.iter().map(NodeId::as_str).collect();
    ids.sort_unstable();
    ids.join(" -> ")
}

/// Rejects graphs containing a divergent cycle.
///
/// Strongly connected components are computed over the subgraph of
/// unconditional edges only. A component that contains a cycle is divergent
/// when every outgoing edge of every member node is unconditional *and*
/// targets another member: any conditional edge, or any edge leaving the
/// component, is an alternative exit and makes the cycle acceptable.
pub(super) fn reject_divergent_cycles(graph: &GraphSpec) -> Result<(), GraphValidationError> {
    let components = unconditional_sccs(graph);

    for component in components {
        if !component_has_cycle(graph, &component) {
            continue;
        }
        let member: rustc_hash::FxHashSet<usize> = component.iter().copied().collect();
        let mut has_exit = false;
        'nodes: for &node_ix in &component {
            for &edge_ix in graph.outgoing_by_index(node_ix) {
                let edge = &graph.edges[edge_ix];
                let target_ix = graph.index_of(&edge.target).expect("validated endpoint");
                if !edge.condition.is_unconditional() || !member.contains(&target_ix) {
                    has_exit = true;
                    break 'nodes;
                }
            }
        }
        if !has_exit {
            return Err(GraphValidationError::DivergentCycle {
                nodes: component
                    .into_iter()
                    .map(|ix| graph.nodes[ix].id.clone())
                    .collect(),
            });
        }
    }
    Ok(())
}

/// Whether an SCC over unconditional edges actually contains a cycle:
/// either more than one member, or a single member with an unconditional
/// self-loop.
fn component_has_cycle(graph: &GraphSpec, component: &[usize]) -> bool {
    if component.len() > 1 {
        return true;
    }
    let node_ix = component[0];
    graph.outgoing_by_index(node_ix).iter().any(|&eix| {
        let edge = &graph.edges[eix];
        edge.condition.is_unconditional()
            && graph.index_of(&edge.target) == Some(node_ix)
    })
}

/// Iterative Tarjan over the unconditional-edge subgraph.
///
/// Index-based on purpose: the node arena plus edge-index adjacency keeps the
/// traversal free of ownership cycles.
fn unconditional_sccs(graph: &GraphSpec) -> Vec<Vec<usize>> {
    let n = graph.nodes.len();
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (node_ix, successor_list) in successors.iter_mut().enumerate() {
        for &eix in graph.outgoing_by_index(node_ix) {
            let edge = &graph.edges[eix];
            if edge.condition.is_unconditional() {
                successor_list.push(graph.index_of(&edge.target).expect("validated endpoint"));
            }
        }
    }

    let mut index_counter = 0usize;
    let mut indices: Vec<Option<usize>> = vec![None; n];
    let mut lowlinks: Vec<usize> = vec![0; n];
    let mut on_stack: Vec<bool> = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut components: Vec<Vec<usize>> = Vec::new();

    // Explicit DFS frames: (node, next-successor cursor).
    let mut frames: Vec<(usize, usize)> = Vec::new();

    for start in 0..n {
        if indices[start].is_some() {
            continue;
        }
        frames.push((start, 0));
        indices[start] = Some(index_counter);
        lowlinks[start] = index_counter;
        index_counter += 1;
        stack.push(start);
        on_stack[start] = true;

        while let Some(&mut (v, ref mut cursor)) = frames.last_mut() {
            if *cursor < successors[v].len() {
                let w = successors[v][*cursor];
                *cursor += 1;
                match indices[w] {
                    None => {
                        indices[w] = Some(index_counter);
                        lowlinks[w] = index_counter;
                        index_counter += 1;
                        stack.push(w);
                        on_stack[w] = true;
                        frames.push((w, 0));
                    }
                    Some(w_index) => {
                        if on_stack[w] {
                            lowlinks[v] = lowlinks[v].min(w_index);
                        }
                    }
                }
            } else {
                frames.pop();
                if let Some(&(parent, _)) = frames.last() {
                    lowlinks[parent] = lowlinks[parent].min(lowlinks[v]);
                }
                if lowlinks[v] == indices[v].expect("visited") {
                    let mut component = Vec::new();
                    loop {
                        let w = stack.pop().expect("scc stack underflow");
                        on_stack[w] = false;
                        component.push(w);
                        if w == v {
                            break;
                        }
                    }
                    components.push(component);
                }
            }
        }
    }

    components
}
