//! `navalha-infra` — durable side of the caixa engine.
//!
//! The session store owns the append-only event streams and the
//! single-open-session slot; `CaixaService` runs the command pipeline
//! (capability gate → rehydrate → decide → append → publish) and serves the
//! snapshot queries. This is where the device capability check happens, at
//! the durable-write point, where a spoofed client cannot route around it.

pub mod service;
pub mod session_store;

#[cfg(test)]
mod integration_tests;

pub use service::CaixaService;
pub use session_store::{
    InMemorySessionStore, SessionStore, StoreError, StoredEvent, UncommittedEvent,
};
