//! Event bus: typed publish/subscribe with a blocking wait primitive.
//!
//! The module is organised around [`EventBus`] (handler dispatch plus a
//! broadcast hub for waiters), the [`RuntimeEvent`] record, and handler
//! adapters for common consumers.

pub mod bus;
pub mod event;
pub mod handlers;

pub use bus::{DEFAULT_BUFFER_CAPACITY, EventBus};
pub use event::{EventType, RuntimeEvent};
pub use handlers::{
    ChannelHandler, EventHandler, HandlerError, MemoryHandler, StdOutHandler, TracingHandler,
};
