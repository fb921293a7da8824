//! CLI argument parsing for lockbroker.
//!
//! Uses clap derive macros for declarative argument definitions.
//! This module defines the command structure; actual implementations
//! are in the `commands` module.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Lockbroker: advisory reader/writer locks for orchestration jobs.
///
/// Jobs lock the domain objects they touch (connectors, appliances,
/// security groups) for shared reading or exclusive writing. These commands
/// exercise and inspect the lock registry.
#[derive(Parser, Debug)]
#[command(name = "lockbroker")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to a YAML config file (defaults are used when omitted).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Available commands for lockbroker.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Walk through a reference locking scenario.
    ///
    /// Two readers share a connector, a writer is refused until both leave,
    /// then the writer downgrades and keeps out a second writer.
    Scenario,

    /// Run a multi-threaded contention workload.
    ///
    /// Workers write-lock security groups while read-locking their parent
    /// connector, checking that no two writers (or a writer and a reader)
    /// ever overlap. Prints a summary and the final lock state.
    Simulate(SimulateArgs),

    /// Print the effective configuration as YAML.
    Config,
}

/// Arguments for the `simulate` command. Flags override the config file.
#[derive(Parser, Debug, Default)]
pub struct SimulateArgs {
    /// Number of worker threads.
    #[arg(long)]
    pub workers: Option<u32>,

    /// Number of contended child objects.
    #[arg(long)]
    pub objects: Option<u32>,

    /// Lock sets taken by each worker.
    #[arg(long)]
    pub iterations: Option<u32>,

    /// Share of iterations (0-100) that write-lock their child object.
    #[arg(long)]
    pub write_percent: Option<u32>,

    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,
}
