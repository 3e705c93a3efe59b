//! Event plumbing shared by the order and stock streams.
//!
//! - [`Event`]: typed, versioned facts emitted by aggregates
//! - [`EventEnvelope`]: stream metadata wrapped around a payload
//! - [`EventBus`] / [`InMemoryEventBus`]: fan-out after commit
//! - [`execute`]: decide-then-apply helper for inline use and tests

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
