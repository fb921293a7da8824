//! Diagnostic logging for the lockbroker binary.
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to the process. The CLI writes them to stderr, filtered by `RUST_LOG` when
//! set and by the configured `log_level` otherwise.

use tracing_subscriber::EnvFilter;

/// Install the stderr subscriber.
///
/// Calling this more than once is harmless; later calls keep the first
/// subscriber.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_lowercase()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
