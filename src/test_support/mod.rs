//! Test-only fixtures: a mock HTTP server, a fake clock, and tiny synthetic images.
//!
//! Adapted from the reference crate's `test_utils` module. Compiled only under
//! `#[cfg(test)]` (see `src/lib.rs`); it is not part of the public API.

pub mod image;
pub mod server;
pub mod time;

use tracing_subscriber::EnvFilter;

/// Installs a `tracing` subscriber for the current test binary. Safe to call from every
/// test; only the first call wins.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("picvault=trace,warn")))
        .with_test_writer()
        .try_init();
}
