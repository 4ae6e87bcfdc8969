//! The typed publish/subscribe fabric.
//!
//! Two consumption paths share one bus:
//!
//! - **Handlers** registered through [`EventBus::subscribe`] run inside
//!   [`EventBus::publish`]; publish returns only once every matching handler
//!   has run, so a publisher can rely on ordering for anything it does
//!   immediately after publishing.
//! - **Waiters** blocked in [`EventBus::wait_for`] observe events through an
//!   internal broadcast hub; a timeout is an expected outcome and yields
//!   `None`, never an error.

use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

use super::event::{EventType, RuntimeEvent};
use super::handlers::EventHandler;

/// Default broadcast buffer capacity for `wait_for` subscribers.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

struct Subscription {
    event_types: Vec<EventType>,
    stream_filter: Option<String>,
    handler: Arc<dyn EventHandler>,
}

impl Subscription {
    fn matches(&self, event: &RuntimeEvent) -> bool {
        self.event_types
            .iter()
            .any(|t| event.matches(t, self.stream_filter.as_deref()))
    }
}

/// Typed publish/subscribe bus with a blocking wait primitive.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use skeinrun::event_bus::{EventBus, EventType, MemoryHandler, RuntimeEvent};
///
/// # async fn example() {
/// let bus = EventBus::new(256);
/// let memory = Arc::new(MemoryHandler::new());
/// bus.subscribe(vec![EventType::NodeCompleted], memory.clone(), None);
///
/// bus.publish(RuntimeEvent::new(EventType::NodeCompleted)).await;
/// // publish returned, so the handler has already run:
/// assert_eq!(memory.snapshot().len(), 1);
///
/// let seen = bus
///     .wait_for(&EventType::NodeCompleted, None, Some(Duration::from_millis(100)))
///     .await;
/// assert!(seen.is_none()); // nothing new published; timeout is not an error
/// # }
/// ```
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
    hub: broadcast::Sender<RuntimeEvent>,
    capacity: usize,
    dropped_events: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (hub, _) = broadcast::channel(capacity);
        Self {
            subscriptions: RwLock::new(Vec::new()),
            hub,
            capacity,
            dropped_events: AtomicUsize::new(0),
        }
    }

    /// Register a handler for the given event types, optionally filtered to
    /// one stream. Handlers run inside `publish` in registration order.
    pub fn subscribe(
        &self,
        event_types: Vec<EventType>,
        handler: Arc<dyn EventHandler>,
        filter_stream: Option<String>,
    ) {
        self.subscriptions.write().push(Subscription {
            event_types,
            stream_filter: filter_stream,
            handler,
        });
    }

    /// Publish an event to all matching handlers and broadcast waiters.
    ///
    /// Returns once every matching handler has run. Handler failures are
    /// logged and do not affect other handlers or the publisher.
    pub async fn publish(&self, event: RuntimeEvent) {
        // Waiters first: they are passive and must not miss events published
        // while handlers are still running.
        let _ = self.hub.send(event.clone());

        let handlers: Vec<Arc<dyn EventHandler>> = {
            let subscriptions = self.subscriptions.read();
            subscriptions
                .iter()
                .filter(|s| s.matches(&event))
                .map(|s| s.handler.clone())
                .collect()
        };
        for handler in handlers {
            if let Err(err) = handler.handle(&event).await {
                tracing::warn!(
                    event_type = %event.event_type,
                    error = %err,
                    "event handler failed"
                );
            }
        }
    }

    /// Block until an event of the given type (and stream, when filtered) is
    /// published, or until the timeout elapses.
    ///
    /// `None` on timeout; `timeout: None` waits indefinitely. Only events
    /// published after this call is entered are observed.
    pub async fn wait_for(
        &self,
        event_type: &EventType,
        stream_id: Option<&str>,
        timeout: Option<Duration>,
    ) -> Option<RuntimeEvent> {
        let mut receiver = self.hub.subscribe();
        let recv = async {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if event.matches(event_type, stream_id) {
                            return Some(event);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        self.dropped_events
                            .fetch_add(missed as usize, Ordering::Relaxed);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        };
        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, recv).await.unwrap_or(None),
            None => recv.await,
        }
    }

    /// Broadcast buffer capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events dropped because a `wait_for` subscriber lagged past the buffer.
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped_events.load(Ordering::Relaxed)
    }
}
