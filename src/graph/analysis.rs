//! Structural analysis over graph specs: descendant traversal and
//! convergence-node computation for forked branches.
//!
//! When more than one edge fires from a node, the executor runs the targets
//! as concurrent branches and needs to know where (if anywhere) they meet
//! again. The convergence node is the nearest common descendant of all branch
//! targets, found by breadth-first search over outgoing edges; ties are
//! broken by BFS depth, shallowest first.

use rustc_hash::FxHashMap;

use super::spec::GraphSpec;
use crate::types::NodeId;

/// Nearest common descendant of a set of branch targets.
///
/// Performs one BFS per target over outgoing edges (all conditions count as
/// structural reachability), then intersects the depth maps. Among common
/// descendants the winner is the one with the smallest maximum depth across
/// branches; remaining ties fall back to total depth and then node order,
/// keeping the choice deterministic. A target counts as its own descendant at
/// depth zero, so a branch flowing directly into another branch's target
/// converges there.
///
/// Returns `None` when the branches share no descendant; the caller then runs
/// them independently to their own terminal nodes.
///
/// # Examples
///
/// ```rust
/// use skeinrun::graph::{convergence_node, EdgeSpec, GraphBuilder, NodeSpec};
/// use skeinrun::types::{NodeId, NodeType};
///
/// let graph = GraphBuilder::new("diamond", "g")
///     .add_node(NodeSpec::new("s", NodeType::Function))
///     .add_node(NodeSpec::new("a", NodeType::Function))
///     .add_node(NodeSpec::new("b", NodeType::Function))
///     .add_node(NodeSpec::new("c", NodeType::Function))
///     .add_edge(EdgeSpec::always("s", "a"))
///     .add_edge(EdgeSpec::always("s", "b"))
///     .add_edge(EdgeSpec::always("a", "c"))
///     .add_edge(EdgeSpec::always("b", "c"))
///     .entry("s")
///     .terminal("c")
///     .build()
///     .unwrap();
///
/// let targets = [NodeId::from("a"), NodeId::from("b")];
/// assert_eq!(convergence_node(&graph, &targets), Some(NodeId::from("c")));
/// ```
#[must_use]
pub fn convergence_node(graph: &GraphSpec, targets: &[NodeId]) -> Option<NodeId> {
    if targets.len() < 2 {
        return targets.first().cloned();
    }

    let depth_maps: Vec<FxHashMap<usize, usize>> = targets
        .iter()
        .map(|t| Some(descendant_depths(graph, graph.index_of(t)?)))
        .collect::<Option<Vec<_>>>()?;

    let (first, rest) = depth_maps.split_first().expect("at least two targets");

    let mut best: Option<(usize, usize, usize)> = None; // (max_depth, total_depth, node_ix)
    'candidates: for (&node_ix, &first_depth) in first {
        let mut max_depth = first_depth;
        let mut total_depth = first_depth;
        for map in rest {
            match map.get(&node_ix) {
                Some(&d) => {
                    max_depth = max_depth.max(d);
                    total_depth += d;
                }
                None => continue 'candidates,
            }
        }
        let candidate = (max_depth, total_depth, node_ix);
        if best.is_none_or(|b| candidate < b) {
            best = Some(candidate);
        }
    }

    best.map(|(_, _, node_ix)| graph.nodes[node_ix].id.clone())
}

/// BFS depth of every node reachable from `start` (inclusive, depth 0).
fn descendant_depths(graph: &GraphSpec, start: usize) -> FxHashMap<usize, usize> {
    let mut depths = FxHashMap::default();
    depths.insert(start, 0usize);
    let mut queue = std::collections::VecDeque::from([start]);

    while let Some(node_ix) = queue.pop_front() {
        let depth = depths[&node_ix];
        for &eix in graph.outgoing_by_index(node_ix) {
            let target_ix = graph
                .index_of(&graph.edges[eix].target)
                .expect("validated endpoint");
            if !depths.contains_key(&target_ix) {
                depths.insert(target_ix, depth + 1);
                queue.push_back(target_ix);
            }
        }
    }

    depths
}
