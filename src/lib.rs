//! # skeinrun: a runtime for declarative agent workflow graphs
//!
//! skeinrun executes declaratively specified "agent" workflows: directed
//! graphs of steps connected by conditional transitions, driven to
//! completion under concurrency, persistence, and failure-recovery
//! guarantees. Many graph instances run concurrently under different entry
//! points, sharing or isolating state as configured, and an individual
//! execution may pause indefinitely awaiting an external signal or timer
//! before resuming exactly once.
//!
//! ## Core Concepts
//!
//! - **Graph**: immutable specification of nodes, edges, and markers,
//!   validated at build time ([`graph`])
//! - **Executor**: drives one graph instance node by node against external
//!   step-executor and guardrail collaborators ([`executor`])
//! - **Streams**: concurrent executions per declared entry point, with
//!   configurable state isolation ([`stream`])
//! - **Event bus**: typed publish/subscribe with a blocking `wait_for`
//!   primitive ([`event_bus`])
//! - **Durable waits**: suspend/resume across process restarts with
//!   exactly-once resumption ([`wait`])
//! - **Storage**: cached, batched, lockable persistence of run history,
//!   safe across OS processes ([`storage`])
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use rustc_hash::FxHashMap;
//! use skeinrun::executor::{ExecutorRegistry, StepContext, StepError, StepExecutor, StepOutput};
//! use skeinrun::graph::{GraphBuilder, NodeSpec};
//! use skeinrun::stream::{RuntimeConfig, RuntimeManager};
//! use skeinrun::types::NodeType;
//!
//! struct Uppercase;
//!
//! #[async_trait]
//! impl StepExecutor for Uppercase {
//!     async fn execute(
//!         &self,
//!         _node: &skeinrun::graph::NodeSpec,
//!         ctx: StepContext,
//!     ) -> Result<StepOutput, StepError> {
//!         let text = ctx.inputs.get("text").and_then(|v| v.as_str()).unwrap_or("");
//!         Ok(StepOutput::new().with_value("text", text.to_uppercase().into()))
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let graph = Arc::new(
//!     GraphBuilder::new("shout", "goal-shout")
//!         .add_node(NodeSpec::new("shout", NodeType::Function)
//!             .with_input_keys(["text"])
//!             .with_output_keys(["text"]))
//!         .entry("shout")
//!         .terminal("shout")
//!         .build()?,
//! );
//! let registry = Arc::new(ExecutorRegistry::new().with_all(Arc::new(Uppercase)));
//! let manager = RuntimeManager::new(graph, registry, RuntimeConfig::default()).await?;
//!
//! let mut input = FxHashMap::default();
//! input.insert("text".to_string(), "hello".into());
//! let execution = manager.trigger("default", input).await?;
//! let result = manager.wait_for_completion(&execution, None).await.unwrap();
//! assert!(result.success);
//! manager.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod event_bus;
pub mod executor;
pub mod graph;
pub mod memory;
pub mod run;
pub mod storage;
pub mod stream;
pub mod telemetry;
pub mod types;
pub mod wait;

pub use cancel::CancelToken;
pub use event_bus::{EventBus, EventType, RuntimeEvent};
pub use executor::{ExecutionOutcome, ExecutionResult, ExecutorRegistry, GraphExecutor};
pub use graph::{EdgeSpec, GraphBuilder, GraphSpec, NodeSpec};
pub use memory::{ScopeHandle, StateStore};
pub use run::{Decision, Outcome, RunRecord, RunRecorder};
pub use storage::{RunStore, StoreConfig};
pub use stream::{RuntimeConfig, RuntimeManager};
pub use wait::{SignalEnvelope, WaitLedger, WaitRequest};
