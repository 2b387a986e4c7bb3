//! `navalha-events` — event mechanics for the caixa engine.
//!
//! Events are the unit of durable change: the session store appends them,
//! and the bus fans them out to subscribers (the client's refresh path).

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
