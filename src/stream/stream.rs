//! One execution stream: the live executions behind a declared entry point.
//!
//! A stream owns the mapping from its async entry point to zero-or-more
//! running [`GraphExecutor`] invocations, enforces the entry point's
//! `max_concurrent` cap with a semaphore, and resolves each execution's
//! memory scope from the declared isolation level. Triggering returns
//! immediately; the execution itself runs as an independent task.
//!
//! Cancellation always finalizes the run record: a cancelled execution
//! never leaves a dangling `running` record behind.

use miette::Diagnostic;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Semaphore, watch};
use tracing::instrument;

use crate::cancel::CancelToken;
use crate::event_bus::{EventBus, EventType, RuntimeEvent};
use crate::executor::{
    ExecutionOutcome, ExecutionResult, ExecutorConfig, ExecutorError, ExecutorRegistry,
    GraphExecutor,
};
use crate::graph::{AsyncEntryPoint, GraphSpec};
use crate::memory::{ScopeHandle, StateStore};
use crate::run::{RunRecord, RunRecorder};
use crate::storage::{RunStore, StorageError};
use crate::types::{IsolationLevel, NodeId, StateScope};
use crate::wait::{RESUME_SIGNAL, SignalEnvelope, WaitLedger, WaitRequest};

/// Errors from stream operations.
#[derive(Debug, Error, Diagnostic)]
pub enum StreamError {
    #[error("unknown execution: {0}")]
    #[diagnostic(code(skeinrun::stream::unknown_execution))]
    UnknownExecution(String),

    #[error("execution {0} is not paused")]
    #[diagnostic(
        code(skeinrun::stream::not_paused),
        help("Only a paused execution can be resumed, and only once per pause.")
    )]
    NotPaused(String),

    #[error("no run record found for execution {0}")]
    #[diagnostic(code(skeinrun::stream::run_not_found))]
    RunNotFound(String),

    #[error("unknown entry point: {0}")]
    #[diagnostic(code(skeinrun::stream::unknown_entry_point))]
    UnknownEntryPoint(String),

    #[error(transparent)]
    #[diagnostic(code(skeinrun::stream::executor))]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    #[diagnostic(code(skeinrun::stream::storage))]
    Storage(#[from] StorageError),
}

struct ExecutionHandle {
    run_id: String,
    cancel: CancelToken,
    done: watch::Receiver<Option<ExecutionResult>>,
}

/// Live executions of one declared entry point.
pub struct ExecutionStream {
    entry: AsyncEntryPoint,
    graph: Arc<GraphSpec>,
    registry: Arc<ExecutorRegistry>,
    executor_config: ExecutorConfig,
    bus: Arc<EventBus>,
    store: Arc<RunStore>,
    state: Arc<StateStore>,
    waits: Arc<WaitLedger>,
    limiter: Arc<Semaphore>,
    executions: RwLock<FxHashMap<String, ExecutionHandle>>,
}

impl ExecutionStream {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        entry: AsyncEntryPoint,
        graph: Arc<GraphSpec>,
        registry: Arc<ExecutorRegistry>,
        executor_config: ExecutorConfig,
        bus: Arc<EventBus>,
        store: Arc<RunStore>,
        state: Arc<StateStore>,
        waits: Arc<WaitLedger>,
    ) -> Self {
        let limiter = Arc::new(Semaphore::new(entry.max_concurrent));
        Self {
            entry,
            graph,
            registry,
            executor_config,
            bus,
            store,
            state,
            waits,
            limiter,
            executions: RwLock::new(FxHashMap::default()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.entry.name
    }

    #[must_use]
    pub fn isolation(&self) -> IsolationLevel {
        self.entry.isolation
    }

    /// Number of executions currently tracked (running or finished but not
    /// yet pruned).
    #[must_use]
    pub fn tracked_executions(&self) -> usize {
        self.executions.read().len()
    }

    fn resolve_scope(&self, execution_id: &str) -> ScopeHandle {
        match self.entry.isolation {
            IsolationLevel::Isolated => self
                .state
                .scope(StateScope::Execution(execution_id.to_string()), false),
            IsolationLevel::Shared => self
                .state
                .scope(StateScope::Stream(self.entry.name.clone()), false),
            IsolationLevel::Synchronized => self
                .state
                .scope(StateScope::Stream(self.entry.name.clone()), true),
        }
    }

    /// Start a new execution of this stream's entry node and return its id
    /// immediately.
    #[instrument(skip(self, input), fields(stream = %self.entry.name))]
    pub async fn trigger(
        self: &Arc<Self>,
        input: FxHashMap<String, Value>,
    ) -> Result<String, StreamError> {
        let execution_id = uuid::Uuid::new_v4().to_string();
        let recorder = RunRecorder::new(&self.graph.goal_id);
        recorder.bind_execution(&execution_id);

        let cancel = CancelToken::new();
        let executor = self.build_executor(&execution_id, recorder.clone(), cancel.clone())?;
        let (done_tx, done_rx) = watch::channel(None);
        self.executions.write().insert(
            execution_id.clone(),
            ExecutionHandle {
                run_id: recorder.run_id(),
                cancel: cancel.clone(),
                done: done_rx,
            },
        );

        // The running record exists before the first step: a crash between
        // trigger and the first flush still leaves a traceable run.
        self.store.save_run(recorder.snapshot()).await?;

        let stream = self.clone();
        tokio::spawn(async move {
            stream
                .drive(executor, recorder, cancel, done_tx, DriveFrom::Entry, input)
                .await;
        });
        Ok(execution_id)
    }

    /// Block until the execution finishes, or `None` on timeout (or while
    /// the execution is paused).
    pub async fn wait_for_completion(
        &self,
        execution_id: &str,
        timeout: Option<Duration>,
    ) -> Option<ExecutionResult> {
        let mut done = {
            let executions = self.executions.read();
            executions.get(execution_id)?.done.clone()
        };

        let fut = async {
            loop {
                if let Some(result) = done.borrow_and_update().clone() {
                    return Some(result);
                }
                if done.changed().await.is_err() {
                    return done.borrow().clone();
                }
            }
        };
        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, fut).await.unwrap_or(None),
            None => fut.await,
        }
    }

    /// Request cancellation of a running execution.
    ///
    /// Returns `false` for unknown or already-finished executions. The
    /// driver task still closes out run bookkeeping.
    pub fn cancel_execution(&self, execution_id: &str) -> bool {
        let executions = self.executions.read();
        let Some(handle) = executions.get(execution_id) else {
            return false;
        };
        if handle.done.borrow().is_some() {
            return false;
        }
        handle.cancel.cancel();
        true
    }

    /// Re-enter a paused execution at its recorded pause node.
    ///
    /// The durable wait registered at pause time gates this: the first
    /// resume consumes it, any further resume attempt finds nothing pending
    /// and fails with [`StreamError::NotPaused`]. Resumption is exactly-once.
    #[instrument(skip(self, input), fields(stream = %self.entry.name, execution = %execution_id))]
    pub async fn resume(
        self: &Arc<Self>,
        execution_id: &str,
        input: FxHashMap<String, Value>,
    ) -> Result<String, StreamError> {
        let record = self
            .find_run(execution_id)
            .await?
            .ok_or_else(|| StreamError::RunNotFound(execution_id.to_string()))?;
        let Some(pause_node) = record.paused_node.clone() else {
            return Err(StreamError::NotPaused(execution_id.to_string()));
        };

        let resumed = self
            .waits
            .signal(SignalEnvelope::new(&record.id, RESUME_SIGNAL))
            .await
            .ok_or_else(|| StreamError::NotPaused(execution_id.to_string()))?;
        tracing::debug!(wait_id = %resumed.wait_id, "resume wait consumed");

        let recorder = RunRecorder::resume(record);
        let cancel = CancelToken::new();
        let executor = self.build_executor(execution_id, recorder.clone(), cancel.clone())?;
        let (done_tx, done_rx) = watch::channel(None);
        self.executions.write().insert(
            execution_id.to_string(),
            ExecutionHandle {
                run_id: recorder.run_id(),
                cancel: cancel.clone(),
                done: done_rx,
            },
        );

        let stream = self.clone();
        tokio::spawn(async move {
            stream
                .drive(
                    executor,
                    recorder,
                    cancel,
                    done_tx,
                    DriveFrom::Resume(pause_node),
                    input,
                )
                .await;
        });
        Ok(execution_id.to_string())
    }

    fn build_executor(
        &self,
        execution_id: &str,
        recorder: RunRecorder,
        cancel: CancelToken,
    ) -> Result<GraphExecutor, ExecutorError> {
        let scope = self.resolve_scope(execution_id);
        Ok(GraphExecutor::new(
            self.graph.clone(),
            self.registry.clone(),
            scope,
            recorder,
        )?
        .with_config(self.executor_config.clone())
        .with_bus(self.bus.clone())
        .with_cancel(cancel)
        .with_stream(self.entry.name.clone())
        .with_execution_id(execution_id))
    }

    /// Drive one executor invocation to its end state and close out all
    /// bookkeeping, whatever the outcome.
    async fn drive(
        self: Arc<Self>,
        executor: GraphExecutor,
        recorder: RunRecorder,
        cancel: CancelToken,
        done_tx: watch::Sender<Option<ExecutionResult>>,
        from: DriveFrom,
        input: FxHashMap<String, Value>,
    ) {
        let execution_id = executor.execution_id().to_string();

        // The concurrency cap applies to running executions; a trigger burst
        // parks here until a slot frees up. Cancellation while parked still
        // finalizes the record below.
        let permit = tokio::select! {
            () = cancel.cancelled() => None,
            permit = self.limiter.clone().acquire_owned() => permit.ok(),
        };

        let outcome = if permit.is_none() || cancel.is_cancelled() {
            None
        } else {
            self.bus
                .publish(
                    RuntimeEvent::new(EventType::StreamStarted)
                        .with_stream(self.entry.name.clone())
                        .with_execution(execution_id.clone()),
                )
                .await;
            tokio::select! {
                () = cancel.cancelled() => None,
                outcome = async {
                    match from {
                        DriveFrom::Entry => executor.execute(input).await,
                        DriveFrom::Resume(node) => executor.resume(node, input).await,
                    }
                } => Some(outcome),
            }
        };

        let result = match outcome {
            None => {
                // Cancelled: the run record is finalized regardless.
                recorder.finalize_failed("cancelled", "execution cancelled");
                Some(ExecutionResult {
                    success: false,
                    output: FxHashMap::default(),
                    error: Some("execution cancelled".to_string()),
                    run_id: recorder.run_id(),
                })
            }
            Some(ExecutionOutcome::Finished(result)) => Some(result),
            Some(ExecutionOutcome::Paused(paused)) => {
                // Hand the suspension to the durable wait runtime; the
                // registered request is what makes resumption exactly-once.
                self.waits
                    .wait(WaitRequest::new(
                        format!("resume:{execution_id}"),
                        paused.run_id.clone(),
                        RESUME_SIGNAL,
                    ))
                    .await;
                self.bus
                    .publish(
                        RuntimeEvent::custom("execution_paused")
                            .with_stream(self.entry.name.clone())
                            .with_execution(execution_id.clone())
                            .with_data("node", Value::String(paused.node.to_string())),
                    )
                    .await;
                None
            }
        };

        if let Err(err) = self.store.save_run(recorder.snapshot()).await {
            tracing::error!(
                execution = %execution_id,
                error = %err,
                "failed to persist run record at close-out"
            );
        }

        if let Some(result) = result {
            self.bus
                .publish(
                    RuntimeEvent::new(EventType::ExecutionCompleted)
                        .with_stream(self.entry.name.clone())
                        .with_execution(execution_id.clone())
                        .with_data("success", Value::Bool(result.success)),
                )
                .await;
            let _ = done_tx.send(Some(result));
        }
        drop(permit);
    }

    /// Locate the run record for an execution: the in-memory handle first,
    /// then the goal index (so resume works across process restarts).
    async fn find_run(&self, execution_id: &str) -> Result<Option<RunRecord>, StreamError> {
        let run_id = {
            let executions = self.executions.read();
            executions.get(execution_id).map(|h| h.run_id.clone())
        };
        if let Some(run_id) = run_id {
            return Ok(self.store.load_run(&run_id, true).await?);
        }

        for candidate in self.store.get_runs_by_goal(&self.graph.goal_id).await? {
            if let Some(record) = self.store.load_run(&candidate, true).await?
                && record.execution_id.as_deref() == Some(execution_id)
            {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }
}

enum DriveFrom {
    Entry,
    Resume(NodeId),
}
