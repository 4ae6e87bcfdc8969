//! Graph specification, validation, and structural analysis.
//!
//! The graph module owns the immutable data model consumed by everything
//! above it: [`GraphSpec`] with its node arena and index-based edge list,
//! the fluent [`GraphBuilder`] that is the only validated construction path,
//! and the pure traversals (divergent-cycle rejection, BFS convergence) that
//! the executor relies on at runtime.

pub mod analysis;
pub mod builder;
pub mod spec;
pub mod validation;

#[cfg(test)]
mod tests;

pub use analysis::convergence_node;
pub use builder::{DEFAULT_MAX_STEPS, GraphBuilder};
pub use spec::{AsyncEntryPoint, EdgeSpec, GraphSpec, NodeSpec};
pub use validation::GraphValidationError;
