//! `navalha-client` — device-side coordinator for the caixa engine.
//!
//! **Responsibility:** offline-first command issuance against the durable
//! ledger.
//!
//! Every mutating command is applied to a local snapshot cache immediately
//! (the caller never blocks on the network), written through to the remote
//! store when connectivity allows, and otherwise parked in a SQLite-durable
//! FIFO queue keyed by its idempotency id. One refresh path reconciles the
//! cache from the durable store; a change notification, a fixed-interval
//! poll and manual calls all funnel into it.

pub mod cache;
pub mod coordinator;
pub mod queue;
pub mod remote;
pub mod types;

pub use cache::LocalCache;
pub use coordinator::{BackgroundSync, CaixaClient};
pub use queue::{CommandQueue, QueueError};
pub use remote::{HttpRemote, RemoteError, RemoteLedger};
pub use types::{CaixaCommand, CommandStatus, ConnectivityState, QueuedCommand};
