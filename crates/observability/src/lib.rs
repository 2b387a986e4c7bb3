//! `navalha-observability` — process-wide tracing setup.

pub mod telemetry;

pub use telemetry::{init, init_with_filter};
