use anyhow::Result;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

/// Install the global fmt subscriber, filtered by `RUST_LOG` (default `info`).
///
/// Fails only if a global subscriber is already installed.
pub fn init_tracing() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))
}

/// Test-friendly variant writing through the libtest capture.
pub fn init_test_tracing(directives: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(directives)
        .with_test_writer()
        .try_init();
}
