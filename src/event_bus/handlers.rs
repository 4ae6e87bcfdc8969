//! Handler adapters for common event consumers.
//!
//! Handlers run inside `publish`; a slow handler delays the publisher, so
//! anything expensive should forward into a channel and process elsewhere
//! ([`ChannelHandler`]).

use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use super::event::RuntimeEvent;
use crate::telemetry::{PlainFormatter, TelemetryFormatter};

/// Errors surfaced by event handlers. The bus logs these and keeps going.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("downstream consumer disconnected")]
    Disconnected,
}

/// A consumer of published events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &RuntimeEvent) -> Result<(), HandlerError>;
}

/// In-memory handler for tests and snapshots.
#[derive(Clone, Default)]
pub struct MemoryHandler {
    entries: Arc<Mutex<Vec<RuntimeEvent>>>,
}

impl MemoryHandler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all captured events.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RuntimeEvent> {
        self.entries.lock().clone()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[async_trait]
impl EventHandler for MemoryHandler {
    async fn handle(&self, event: &RuntimeEvent) -> Result<(), HandlerError> {
        self.entries.lock().push(event.clone());
        Ok(())
    }
}

/// Forwards events into a tokio mpsc channel for async consumers
/// (dashboards, SSE endpoints, log shippers).
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<RuntimeEvent>,
}

impl ChannelHandler {
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<RuntimeEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl EventHandler for ChannelHandler {
    async fn handle(&self, event: &RuntimeEvent) -> Result<(), HandlerError> {
        self.tx
            .send(event.clone())
            .map_err(|_| HandlerError::Disconnected)
    }
}

/// Renders events to stdout through a telemetry formatter.
pub struct StdOutHandler<F: TelemetryFormatter = PlainFormatter> {
    formatter: F,
}

impl Default for StdOutHandler {
    fn default() -> Self {
        Self {
            formatter: PlainFormatter::new(),
        }
    }
}

impl<F: TelemetryFormatter> StdOutHandler<F> {
    pub fn with_formatter(formatter: F) -> Self {
        Self { formatter }
    }
}

#[async_trait]
impl<F: TelemetryFormatter> EventHandler for StdOutHandler<F> {
    async fn handle(&self, event: &RuntimeEvent) -> Result<(), HandlerError> {
        let rendered = self.formatter.render_event(event);
        let mut stdout = std::io::stdout();
        stdout.write_all(rendered.as_bytes())?;
        stdout.flush()?;
        Ok(())
    }
}

/// Logs every event through `tracing` at info level.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingHandler;

#[async_trait]
impl EventHandler for TracingHandler {
    async fn handle(&self, event: &RuntimeEvent) -> Result<(), HandlerError> {
        tracing::info!(
            event_type = %event.event_type,
            stream_id = event.stream_id.as_deref(),
            execution_id = event.execution_id.as_deref(),
            "runtime event"
        );
        Ok(())
    }
}
