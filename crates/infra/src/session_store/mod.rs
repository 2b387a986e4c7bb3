//! Append-only session event store.

mod in_memory;
mod r#trait;

pub use in_memory::InMemorySessionStore;
pub use r#trait::{SessionStore, StoreError, StoredEvent, UncommittedEvent};
