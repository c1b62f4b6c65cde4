//! Log output for test binaries.
//!
//! Library code only emits `tracing` events. Test binaries call one of these
//! once (or many times; later calls are no-ops) to see them.

use tracing_subscriber::EnvFilter;

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install a human-readable subscriber.
///
/// `RUST_LOG` wins over `default_filter`. Returns `false` if a global
/// subscriber was already installed.
pub fn init_logging(default_filter: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_filter))
        .with_test_writer()
        .try_init()
        .is_ok()
}

/// Install a JSON-lines subscriber for CI log collection
pub fn init_json_logging(default_filter: &str) -> bool {
    tracing_subscriber::fmt()
        .json()
        .with_current_span(true)
        .with_env_filter(env_filter(default_filter))
        .try_init()
        .is_ok()
}
