//! Config struct definition and default implementation.

use super::types::*;
use serde::{Deserialize, Serialize};

/// Configuration for the lock broker.
///
/// Unknown fields in the YAML are ignored for forward compatibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // =========================================================================
    // Lock settings
    // =========================================================================
    /// Milliseconds a waiting lock request gives up after, when the caller
    /// does not pass its own timeout.
    #[serde(default = "default_lock_timeout_ms")]
    pub default_lock_timeout_ms: u64,

    /// Whether lock records nobody holds or waits on are dropped from the
    /// registry. Keeping them trades memory for fewer allocations.
    #[serde(default = "default_true")]
    pub reclaim_idle_records: bool,

    // =========================================================================
    // Logging
    // =========================================================================
    /// Default log level when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // =========================================================================
    // Simulation
    // =========================================================================
    /// Workload for `lockbroker simulate`.
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_lock_timeout_ms: default_lock_timeout_ms(),
            reclaim_idle_records: default_true(),
            log_level: default_log_level(),
            simulation: SimulationConfig::default(),
        }
    }
}
