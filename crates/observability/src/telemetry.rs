//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

/// Initialize tracing for the process, honoring `RUST_LOG` and defaulting
/// to `info`.
///
/// Safe to call multiple times (subsequent calls are no-ops), so tests and
/// embedding binaries can both call it blindly.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    init_with_filter(filter);
}

/// Initialize tracing with an explicit filter.
///
/// JSON output with timestamps; terminals that want pretty logs can layer
/// their own subscriber before calling anything here.
pub fn init_with_filter(filter: EnvFilter) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}
