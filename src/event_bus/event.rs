//! Structured runtime events.
//!
//! Events are the observation surface of the runtime: streams and executors
//! publish them, external observability collaborators and internal
//! `wait_for` callers consume them. Payloads are free-form maps so the
//! runtime never constrains what a publisher wants to attach.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::types::NodeId;

/// Canonical event types emitted by the runtime.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    StreamStarted,
    NodeStarted,
    NodeCompleted,
    NodeError,
    ExecutionCompleted,
    WaitCreated,
    WaitMatched,
    WaitTimedOut,
    WaitResumed,
    /// Application-defined events published through the same fabric.
    Custom(String),
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::StreamStarted => write!(f, "stream_started"),
            EventType::NodeStarted => write!(f, "node_started"),
            EventType::NodeCompleted => write!(f, "node_completed"),
            EventType::NodeError => write!(f, "node_error"),
            EventType::ExecutionCompleted => write!(f, "execution_completed"),
            EventType::WaitCreated => write!(f, "wait_created"),
            EventType::WaitMatched => write!(f, "wait_matched"),
            EventType::WaitTimedOut => write!(f, "wait_timed_out"),
            EventType::WaitResumed => write!(f, "wait_resumed"),
            EventType::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

/// One structured event on the bus.
///
/// # Examples
///
/// ```rust
/// use skeinrun::event_bus::{EventType, RuntimeEvent};
/// use serde_json::json;
///
/// let event = RuntimeEvent::new(EventType::NodeCompleted)
///     .with_stream("intake")
///     .with_execution("exec-1")
///     .with_data("node", json!("classify"));
/// assert_eq!(event.data["node"], json!("classify"));
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuntimeEvent {
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(default)]
    pub data: FxHashMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl RuntimeEvent {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            stream_id: None,
            execution_id: None,
            data: FxHashMap::default(),
            timestamp: Utc::now(),
        }
    }

    pub fn custom(name: impl Into<String>) -> Self {
        Self::new(EventType::Custom(name.into()))
    }

    #[must_use]
    pub fn with_stream(mut self, stream_id: impl Into<String>) -> Self {
        self.stream_id = Some(stream_id.into());
        self
    }

    #[must_use]
    pub fn with_execution(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_node(self, node: &NodeId) -> Self {
        self.with_data("node", Value::String(node.to_string()))
    }

    /// Whether this event matches a type and optional stream filter.
    #[must_use]
    pub fn matches(&self, event_type: &EventType, stream_id: Option<&str>) -> bool {
        if &self.event_type != event_type {
            return false;
        }
        match stream_id {
            Some(filter) => self.stream_id.as_deref() == Some(filter),
            None => true,
        }
    }

    /// Normalized JSON representation for sinks and logs.
    #[must_use]
    pub fn to_json_value(&self) -> Value {
        serde_json::json!({
            "type": self.event_type.to_string(),
            "stream_id": self.stream_id,
            "execution_id": self.execution_id,
            "data": self.data,
            "timestamp": self.timestamp.to_rfc3339(),
        })
    }
}

impl fmt::Display for RuntimeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.event_type)?;
        if let Some(stream) = &self.stream_id {
            write!(f, " stream={stream}")?;
        }
        if let Some(execution) = &self.execution_id {
            write!(f, " execution={execution}")?;
        }
        if !self.data.is_empty() {
            let data = serde_json::to_string(&self.data).unwrap_or_default();
            write!(f, " {data}")?;
        }
        Ok(())
    }
}
