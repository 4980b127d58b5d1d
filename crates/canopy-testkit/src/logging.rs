//! Tracing setup for tests.

use tracing_subscriber::{fmt, EnvFilter};

/// Install a test-friendly subscriber honouring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
