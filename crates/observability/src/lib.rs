//! Tracing, logging and log-safe error rendering (shared setup).

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize a subscriber that writes through the test harness.
pub fn init_for_tests() {
    tracing::init_for_tests();
}

/// Secret redaction for anything rendered into logs or surfaced errors.
pub mod redaction;

/// Tracing configuration (filters, layers).
pub mod tracing;

pub use redaction::{Redacted, SecretRedactor};
