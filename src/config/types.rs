//! Configuration types and defaults for the lock broker.
//!
//! This module defines nested config sections, constants, and default value
//! functions used by the Config struct.

use serde::{Deserialize, Serialize};

/// Accepted values for `log_level`.
pub const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

// Default value functions for serde

/// One hour, the longest a job waits for an object lock.
pub(crate) fn default_lock_timeout_ms() -> u64 {
    60 * 60 * 1000
}
pub(crate) fn default_true() -> bool {
    true
}
pub(crate) fn default_log_level() -> String {
    "warn".to_string()
}
pub(crate) fn default_workers() -> u32 {
    8
}
pub(crate) fn default_objects() -> u32 {
    4
}
pub(crate) fn default_iterations() -> u32 {
    200
}
pub(crate) fn default_write_percent() -> u32 {
    25
}
pub(crate) fn default_hold_micros() -> u64 {
    200
}
pub(crate) fn default_simulation_timeout_ms() -> u64 {
    1000
}

/// Workload driven by `lockbroker simulate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of worker threads.
    #[serde(default = "default_workers")]
    pub workers: u32,

    /// Number of child objects the workers contend on.
    #[serde(default = "default_objects")]
    pub objects: u32,

    /// Lock sets taken by each worker.
    #[serde(default = "default_iterations")]
    pub iterations: u32,

    /// Share of iterations (0-100) that write-lock their child object.
    #[serde(default = "default_write_percent")]
    pub write_percent: u32,

    /// How long a worker holds its locks, in microseconds.
    #[serde(default = "default_hold_micros")]
    pub hold_micros: u64,

    /// Per-lock wait limit in milliseconds (0 waits indefinitely).
    #[serde(default = "default_simulation_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            objects: default_objects(),
            iterations: default_iterations(),
            write_percent: default_write_percent(),
            hold_micros: default_hold_micros(),
            timeout_ms: default_simulation_timeout_ms(),
        }
    }
}
