//! Run records: the append-only Decision/Outcome history of one execution.
//!
//! A [`RunRecord`] is created when an execution starts, mutated exclusively
//! through its [`RunRecorder`] while the run is live, and becomes immutable
//! once its status leaves `Running`. Decisions capture choice points; each
//! carries at most one [`Outcome`], attached strictly after the decision
//! exists. The recorder enforces both invariants.
//!
//! Persisted shapes are the serde derives on the record types themselves;
//! timestamps serialize through chrono so records survive process restarts
//! byte-for-byte.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::types::{NodeId, RunStatus};

/// How strongly an external side effect's outcome was confirmed.
///
/// Side effects on external systems may succeed invisibly across a timeout
/// or retry, so "we issued this action" is recorded separately from "we
/// confirmed its effect".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceGrade {
    /// The step returned and its result was observed directly.
    Observed,
    /// A post-step review confirmed the effect landed.
    Confirmed,
    /// The action was re-issued after a timeout; the first attempt may have
    /// landed invisibly.
    Assumed,
    /// Nothing is known about whether the effect landed.
    #[default]
    Unknown,
}

/// Result attached to a decision after execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    #[serde(default)]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub latency_ms: u64,
    #[serde(default)]
    pub evidence: EvidenceGrade,
}

impl Outcome {
    pub fn success(result: Value, latency_ms: u64) -> Self {
        Self {
            success: true,
            result,
            error: None,
            latency_ms,
            evidence: EvidenceGrade::Observed,
        }
    }

    pub fn failure(error: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            success: false,
            result: Value::Null,
            error: Some(error.into()),
            latency_ms,
            evidence: EvidenceGrade::Unknown,
        }
    }

    #[must_use]
    pub fn with_evidence(mut self, evidence: EvidenceGrade) -> Self {
        self.evidence = evidence;
        self
    }
}

/// One candidate considered at a choice point.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DecisionOption {
    pub id: String,
    #[serde(default)]
    pub description: String,
}

impl DecisionOption {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
        }
    }
}

/// One choice point in a run, with its outcome attached after execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub intent: String,
    #[serde(default)]
    pub options: Vec<DecisionOption>,
    pub chosen_option_id: String,
    #[serde(default)]
    pub reasoning: String,
    pub decided_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
}

/// Aggregate metrics accumulated across a run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunMetrics {
    pub steps: u64,
    pub retries: u32,
    pub tokens_used: u64,
}

/// Durable record of one end-to-end graph execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub goal_id: String,
    /// The runtime execution this run belongs to, bound by the owning stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    pub status: RunStatus,
    #[serde(default)]
    pub decisions: Vec<Decision>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metrics: RunMetrics,
    /// Human-readable failure summary; always present on failed runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// The originating error kind of a failed run (see the executor's error
    /// taxonomy).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// Pause node recorded when the run suspended; cleared on resume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_node: Option<NodeId>,
}

impl RunRecord {
    pub fn new(goal_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            goal_id: goal_id.into(),
            execution_id: None,
            status: RunStatus::Running,
            decisions: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
            metrics: RunMetrics::default(),
            summary: None,
            error_kind: None,
            paused_node: None,
        }
    }
}

/// Errors from recorder operations that would violate record invariants.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum RecorderError {
    #[error("unknown decision id: {0}")]
    #[diagnostic(code(skeinrun::run::unknown_decision))]
    UnknownDecision(String),

    #[error("outcome already attached to decision {0}")]
    #[diagnostic(
        code(skeinrun::run::outcome_already_set),
        help("A decision's outcome is set at most once, after the decision exists.")
    )]
    OutcomeAlreadySet(String),

    #[error("run {0} is no longer mutable (status left running)")]
    #[diagnostic(code(skeinrun::run::record_frozen))]
    RecordFrozen(String),
}

/// Mutation handle for a live run record.
///
/// The recorder is the only writer of a [`RunRecord`]: the executor records
/// decisions and outcomes through it, and the owning stream finalizes it.
/// Cloning is cheap; all clones share the same record.
#[derive(Clone)]
pub struct RunRecorder {
    inner: Arc<Mutex<RunRecord>>,
}

impl RunRecorder {
    pub fn new(goal_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RunRecord::new(goal_id))),
        }
    }

    /// Rebuild a recorder over an existing (still running) record, used when
    /// resuming a paused run.
    pub fn resume(record: RunRecord) -> Self {
        Self {
            inner: Arc::new(Mutex::new(record)),
        }
    }

    #[must_use]
    pub fn run_id(&self) -> String {
        self.inner.lock().id.clone()
    }

    /// Bind the record to its runtime execution id.
    pub fn bind_execution(&self, execution_id: impl Into<String>) {
        self.inner.lock().execution_id = Some(execution_id.into());
    }

    /// Append a decision and return its id for later outcome attachment.
    pub fn begin_decision(
        &self,
        intent: impl Into<String>,
        options: Vec<DecisionOption>,
        chosen_option_id: impl Into<String>,
        reasoning: impl Into<String>,
    ) -> Result<String, RecorderError> {
        let mut record = self.inner.lock();
        if record.status != RunStatus::Running {
            return Err(RecorderError::RecordFrozen(record.id.clone()));
        }
        let decision_id = uuid::Uuid::new_v4().to_string();
        record.decisions.push(Decision {
            id: decision_id.clone(),
            intent: intent.into(),
            options,
            chosen_option_id: chosen_option_id.into(),
            reasoning: reasoning.into(),
            decided_at: Utc::now(),
            outcome: None,
        });
        Ok(decision_id)
    }

    /// Attach the outcome of a previously recorded decision.
    ///
    /// # Errors
    ///
    /// Fails if the decision does not exist or already carries an outcome;
    /// an outcome is attached at most once.
    pub fn record_outcome(&self, decision_id: &str, outcome: Outcome) -> Result<(), RecorderError> {
        let mut record = self.inner.lock();
        let decision = record
            .decisions
            .iter_mut()
            .find(|d| d.id == decision_id)
            .ok_or_else(|| RecorderError::UnknownDecision(decision_id.to_string()))?;
        if decision.outcome.is_some() {
            return Err(RecorderError::OutcomeAlreadySet(decision_id.to_string()));
        }
        decision.outcome = Some(outcome);
        Ok(())
    }

    pub fn bump_step(&self) {
        self.inner.lock().metrics.steps += 1;
    }

    pub fn bump_retries(&self) {
        self.inner.lock().metrics.retries += 1;
    }

    pub fn add_tokens(&self, tokens: u64) {
        self.inner.lock().metrics.tokens_used += tokens;
    }

    /// Record the pause node of a suspending run; status stays `Running`.
    pub fn mark_paused(&self, node: NodeId) {
        self.inner.lock().paused_node = Some(node);
    }

    /// Clear the pause marker when a run re-enters execution.
    pub fn clear_paused(&self) {
        self.inner.lock().paused_node = None;
    }

    /// Finalize the record as completed. Idempotent against already-frozen
    /// records so late finalizers cannot clobber an earlier verdict.
    pub fn finalize_completed(&self) {
        let mut record = self.inner.lock();
        if record.status != RunStatus::Running {
            return;
        }
        record.status = RunStatus::Completed;
        record.finished_at = Some(Utc::now());
    }

    /// Finalize the record as failed with its originating error kind and a
    /// human-readable summary.
    pub fn finalize_failed(&self, kind: impl Into<String>, summary: impl Into<String>) {
        let mut record = self.inner.lock();
        if record.status != RunStatus::Running {
            return;
        }
        record.status = RunStatus::Failed;
        record.finished_at = Some(Utc::now());
        record.error_kind = Some(kind.into());
        record.summary = Some(summary.into());
    }

    /// Clone of the current record state.
    #[must_use]
    pub fn snapshot(&self) -> RunRecord {
        self.inner.lock().clone()
    }
}
