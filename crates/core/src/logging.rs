// crates/core/src/logging.rs
//! Tracing initialization for binaries and integration tests.

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber: env-filter driven (`RUST_LOG`), compact
/// output with targets. Safe to call more than once — later calls no-op.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
