//! The guardrail/policy collaborator contract.
//!
//! The runtime consults a [`Guardrail`] before and after tool-like steps and
//! only needs to understand three verdicts: allow, deny, or pause for
//! confirmation. How a policy decides is external.

use async_trait::async_trait;
use serde_json::Value;

use crate::types::NodeId;

/// Which side of the step a review happens on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyPhase {
    /// Before the step is issued; a deny prevents the side effect.
    Before,
    /// After the step returned; confirms the effect for evidence grading.
    After,
}

/// Structured event handed to the guardrail for review.
#[derive(Clone, Debug)]
pub struct PolicyEvent {
    pub execution_id: String,
    pub run_id: String,
    pub node_id: NodeId,
    pub phase: PolicyPhase,
    /// Step inputs (before) or outputs (after) under review.
    pub payload: Value,
}

/// How hard a denial is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicySeverity {
    /// Treated as a retryable node failure.
    Advisory,
    /// Treated as a fatal node failure.
    Blocking,
}

/// Verdict returned by a guardrail review.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny {
        severity: PolicySeverity,
        reason: String,
    },
    /// The step needs a human in the loop; the runtime pauses the run.
    RequireConfirmation,
}

/// Policy collaborator reviewing tool-like steps.
#[async_trait]
pub trait Guardrail: Send + Sync {
    async fn review(&self, event: &PolicyEvent) -> PolicyDecision;
}

/// Default guardrail that allows everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

#[async_trait]
impl Guardrail for AllowAll {
    async fn review(&self, _event: &PolicyEvent) -> PolicyDecision {
        PolicyDecision::Allow
    }
}
