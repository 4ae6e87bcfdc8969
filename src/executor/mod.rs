//! Graph execution: the step loop, collaborator contracts, guard-expression
//! evaluation, and failure containment.
//!
//! The executor consumes an immutable [`GraphSpec`](crate::graph::GraphSpec)
//! and drives it against two external collaborators, the step executor
//! (one implementation per node type) and the guardrail policy, while
//! recording every choice point into the run record.

pub mod breaker;
pub mod condition;
pub mod engine;
pub mod guardrail;
pub mod step;

pub use breaker::{BreakerState, CircuitBreaker};
pub use condition::{ConditionError, ConditionScope, evaluate, redact_map};
pub use engine::{
    ErrorKind, ExecutionOutcome, ExecutionPausedAt, ExecutionResult, ExecutorConfig,
    ExecutorError, GraphExecutor,
};
pub use guardrail::{
    AllowAll, Guardrail, PolicyDecision, PolicyEvent, PolicyPhase, PolicySeverity,
};
pub use step::{ExecutorRegistry, StepContext, StepError, StepExecutor, StepOutput};
