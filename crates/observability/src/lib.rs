//! Process-wide tracing setup shared by the ledger binaries.

/// Initialize tracing with settings taken from the environment.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(tracing::TracingSettings::from_env());
}

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use self::tracing::{LogFormat, TracingSettings};
