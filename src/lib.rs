//! Lockbroker: advisory reader/writer locks for orchestration jobs.
//!
//! Background jobs that mutate shared domain objects take shared or
//! exclusive locks on those objects through a [`locks::LockRegistry`] and
//! release them when their unit of work completes.

pub mod config;
pub mod error;
pub mod exit_codes;
pub mod locks;
pub mod logging;
