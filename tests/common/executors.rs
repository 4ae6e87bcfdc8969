//! Step-executor doubles shared across integration tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use skeinrun::executor::{StepContext, StepError, StepExecutor, StepOutput};
use skeinrun::graph::NodeSpec;
use skeinrun::types::NodeId;

/// Test executor that records visit order, can fail a node a configured
/// number of times, inject per-node outputs, sleep, and steer model-decide
/// routing.
#[derive(Default)]
pub struct RecordingExecutor {
    visits: Mutex<Vec<String>>,
    outputs: FxHashMap<String, FxHashMap<String, Value>>,
    failures: Mutex<FxHashMap<String, u32>>,
    fail_kind: Option<fn() -> StepError>,
    delay: Option<Duration>,
    decide_target: Option<NodeId>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject fixed outputs for a node id.
    pub fn with_output(mut self, node: &str, key: &str, value: Value) -> Self {
        self.outputs
            .entry(node.to_string())
            .or_default()
            .insert(key.to_string(), value);
        self
    }

    /// Fail the node's first `count` attempts with a retryable provider
    /// error (or the configured error kind).
    pub fn failing(self, node: &str, count: u32) -> Self {
        self.failures.lock().insert(node.to_string(), count);
        self
    }

    /// Replace the injected failure with a specific error constructor.
    pub fn with_fail_kind(mut self, make: fn() -> StepError) -> Self {
        self.fail_kind = Some(make);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn deciding(mut self, target: &str) -> Self {
        self.decide_target = Some(NodeId::from(target));
        self
    }

    /// Node ids in execution order.
    pub fn visits(&self) -> Vec<String> {
        self.visits.lock().clone()
    }

    pub fn visit_count(&self, node: &str) -> usize {
        self.visits.lock().iter().filter(|v| *v == node).count()
    }
}

#[async_trait]
impl StepExecutor for RecordingExecutor {
    async fn execute(&self, node: &NodeSpec, ctx: StepContext) -> Result<StepOutput, StepError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.visits.lock().push(node.id.to_string());

        {
            let mut failures = self.failures.lock();
            if let Some(remaining) = failures.get_mut(node.id.as_str())
                && *remaining > 0
            {
                *remaining -= 1;
                return Err(self.fail_kind.map_or_else(
                    || StepError::Provider {
                        provider: "test".to_string(),
                        message: format!("injected failure at {}", node.id),
                        retryable: true,
                    },
                    |make| make(),
                ));
            }
        }

        let mut output = StepOutput::new();
        // Echo inputs, then overlay any injected values.
        for (key, value) in &ctx.inputs {
            output.output.insert(key.clone(), value.clone());
        }
        if let Some(injected) = self.outputs.get(node.id.as_str()) {
            for (key, value) in injected {
                output.output.insert(key.clone(), value.clone());
            }
        }
        Ok(output)
    }

    async fn decide(
        &self,
        node: &NodeSpec,
        candidates: &[NodeId],
        _ctx: &StepContext,
    ) -> Result<NodeId, StepError> {
        if let Some(target) = &self.decide_target {
            return Ok(target.clone());
        }
        candidates.first().cloned().ok_or_else(|| {
            StepError::InvalidInput(format!("no decide candidates at {}", node.id))
        })
    }
}
