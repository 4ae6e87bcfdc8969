//! The runtime manager: one object owning the streams, event bus, state
//! store, wait ledger, and storage for a graph.
//!
//! Construction wires the whole runtime together and reloads durable state
//! (the global memory scope and pending waits); [`shutdown`](RuntimeManager::shutdown)
//! flushes both back and drains the storage writer, so nothing acknowledged
//! is lost across a restart.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use super::config::RuntimeConfig;
use super::stream::{ExecutionStream, StreamError};
use crate::event_bus::EventBus;
use crate::executor::{ExecutionResult, ExecutorRegistry};
use crate::graph::{AsyncEntryPoint, GraphSpec};
use crate::memory::StateStore;
use crate::storage::RunStore;
use crate::types::IsolationLevel;
use crate::wait::{PersistedWaitLedger, SignalEnvelope, WaitLedger, WaitResumed};

const GLOBAL_STATE_DOCUMENT: &str = "global_state";
const WAIT_LEDGER_DOCUMENT: &str = "wait_ledger";

/// Name and cap of the implicit stream created for graphs that declare no
/// async entry points.
const DEFAULT_STREAM: &str = "default";
const DEFAULT_STREAM_CAP: usize = 16;

/// Owns every runtime service for one graph.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use rustc_hash::FxHashMap;
/// use skeinrun::stream::{RuntimeConfig, RuntimeManager};
/// # async fn example(
/// #     graph: Arc<skeinrun::graph::GraphSpec>,
/// #     registry: Arc<skeinrun::executor::ExecutorRegistry>,
/// # ) -> Result<(), Box<dyn std::error::Error>> {
/// let manager = RuntimeManager::new(graph, registry, RuntimeConfig::default()).await?;
/// let execution = manager.trigger("default", FxHashMap::default()).await?;
/// let result = manager.wait_for_completion(&execution, None).await;
/// println!("finished: {result:?}");
/// manager.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct RuntimeManager {
    graph: Arc<GraphSpec>,
    bus: Arc<EventBus>,
    store: Arc<RunStore>,
    state: Arc<StateStore>,
    waits: Arc<WaitLedger>,
    streams: FxHashMap<String, Arc<ExecutionStream>>,
}

impl RuntimeManager {
    /// Build the runtime: start storage, reload durable state, and create
    /// one stream per declared async entry point (or the implicit default
    /// stream when none are declared).
    #[instrument(skip_all, fields(graph = %graph.id))]
    pub async fn new(
        graph: Arc<GraphSpec>,
        registry: Arc<ExecutorRegistry>,
        config: RuntimeConfig,
    ) -> Result<Self, StreamError> {
        let store = Arc::new(RunStore::new(config.store_config())?);
        store.start();
        let bus = Arc::new(EventBus::new(config.event_buffer));
        let waits = Arc::new(WaitLedger::with_bus(bus.clone()));
        let state = Arc::new(StateStore::new());

        // Reload durable runtime state from the previous process lifetime.
        if let Some(value) = store.load_document(GLOBAL_STATE_DOCUMENT).await? {
            match serde_json::from_value::<FxHashMap<String, Value>>(value) {
                Ok(global) => state.load_global(global),
                Err(err) => tracing::warn!(error = %err, "ignoring malformed global state"),
            }
        }
        if let Some(value) = store.load_document(WAIT_LEDGER_DOCUMENT).await? {
            match serde_json::from_value::<PersistedWaitLedger>(value) {
                Ok(ledger) => waits.restore(ledger),
                Err(err) => tracing::warn!(error = %err, "ignoring malformed wait ledger"),
            }
        }

        let mut entry_points = graph.async_entry_points.clone();
        if entry_points.is_empty() {
            entry_points.push(AsyncEntryPoint::new(
                DEFAULT_STREAM,
                graph.entry_node.clone(),
                IsolationLevel::Isolated,
                DEFAULT_STREAM_CAP,
            ));
        }

        let mut streams = FxHashMap::default();
        for entry in entry_points {
            let name = entry.name.clone();
            let stream = Arc::new(ExecutionStream::new(
                entry,
                graph.clone(),
                registry.clone(),
                config.executor.clone(),
                bus.clone(),
                store.clone(),
                state.clone(),
                waits.clone(),
            ));
            streams.insert(name, stream);
        }

        Ok(Self {
            graph,
            bus,
            store,
            state,
            waits,
            streams,
        })
    }

    /// The stream behind a declared entry point.
    #[must_use]
    pub fn stream(&self, entry_point: &str) -> Option<Arc<ExecutionStream>> {
        self.streams.get(entry_point).cloned()
    }

    #[must_use]
    pub fn event_bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    #[must_use]
    pub fn store(&self) -> Arc<RunStore> {
        self.store.clone()
    }

    #[must_use]
    pub fn state(&self) -> Arc<StateStore> {
        self.state.clone()
    }

    #[must_use]
    pub fn wait_ledger(&self) -> Arc<WaitLedger> {
        self.waits.clone()
    }

    /// Trigger an execution on a declared entry point.
    pub async fn trigger(
        &self,
        entry_point: &str,
        input: FxHashMap<String, Value>,
    ) -> Result<String, StreamError> {
        let stream = self
            .stream(entry_point)
            .ok_or_else(|| StreamError::UnknownEntryPoint(entry_point.to_string()))?;
        stream.trigger(input).await
    }

    /// Wait for an execution on any stream to complete.
    pub async fn wait_for_completion(
        &self,
        execution_id: &str,
        timeout: Option<Duration>,
    ) -> Option<ExecutionResult> {
        for stream in self.streams.values() {
            if let Some(result) = stream.wait_for_completion(execution_id, timeout).await {
                return Some(result);
            }
        }
        None
    }

    /// Cancel an execution on whichever stream owns it.
    pub fn cancel_execution(&self, execution_id: &str) -> bool {
        self.streams
            .values()
            .any(|stream| stream.cancel_execution(execution_id))
    }

    /// Resume a paused execution through its entry point.
    pub async fn resume(
        &self,
        entry_point: &str,
        execution_id: &str,
        input: FxHashMap<String, Value>,
    ) -> Result<String, StreamError> {
        let stream = self
            .stream(entry_point)
            .ok_or_else(|| StreamError::UnknownEntryPoint(entry_point.to_string()))?;
        stream.resume(execution_id, input).await
    }

    /// Deliver an external signal to the wait ledger.
    pub async fn signal(&self, envelope: SignalEnvelope) -> Option<WaitResumed> {
        self.waits.signal(envelope).await
    }

    /// Sweep expired waits; timers are synthetic signals driven by whoever
    /// calls this (typically on an interval).
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<WaitResumed> {
        self.waits.tick(now).await
    }

    /// Flush durable runtime state and drain storage. No acknowledged write
    /// is lost across shutdown; the global scope and pending waits reload on
    /// the next start.
    #[instrument(skip(self), fields(graph = %self.graph.id))]
    pub async fn shutdown(&self) -> Result<(), StreamError> {
        let global = self.state.global_snapshot();
        self.store
            .save_document(GLOBAL_STATE_DOCUMENT, serde_json::to_value(global).unwrap_or_default())
            .await?;
        self.store
            .save_document(
                WAIT_LEDGER_DOCUMENT,
                serde_json::to_value(self.waits.to_persisted()).unwrap_or_default(),
            )
            .await?;
        self.store.stop().await?;
        Ok(())
    }
}
