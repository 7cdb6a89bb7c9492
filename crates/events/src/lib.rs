//! Domain events and the in-process publish/subscribe transport.
//!
//! Stock changes are announced through a bus that callers inject explicitly;
//! there is no process-wide emitter.

pub mod bus;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
