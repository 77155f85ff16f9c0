//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::SubscriberBuilder;
use tracing_subscriber::fmt::format::{DefaultFields, Format};

const DEFAULT_FILTER: &str = "info";

/// Subscriber setup shared by every entry point: `RUST_LOG` filter with an
/// `info` fallback, no module targets.
fn builder() -> SubscriberBuilder<DefaultFields, Format, EnvFilter> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
}

/// Install JSON logs for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    let _ = builder().json().try_init();
}

/// Human-readable output captured per test.
pub fn init_for_tests() {
    let _ = builder().with_test_writer().try_init();
}
