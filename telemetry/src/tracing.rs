use std::sync::Once;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

static TEST_TRACING: Once = Once::new();

/// Initializes the global tracing subscriber for a long-running process.
///
/// The filter is taken from `RUST_LOG`, defaulting to `info` for our crates
/// and `warn` for everything else. Call this exactly once, at startup.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,dbsync=info,replicator=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Initializes tracing for tests.
///
/// Safe to call from every test; only the first call installs the subscriber.
/// Output goes through the test writer so it interleaves with test captures.
pub fn init_test_tracing() {
    TEST_TRACING.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dbsync=debug"));

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .init();
    });
}
