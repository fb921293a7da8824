//! Command implementations for lockbroker.
//!
//! This module provides the dispatcher that routes CLI commands to their
//! implementations.

mod scenario;
mod simulate;

use crate::cli::Command;
use lockbroker::config::Config;
use lockbroker::error::Result;

/// Dispatch a command to its implementation.
pub fn dispatch(command: Command, config: &Config) -> Result<()> {
    match command {
        Command::Scenario => scenario::cmd_scenario(),
        Command::Simulate(args) => simulate::cmd_simulate(args, config),
        Command::Config => cmd_config(config),
    }
}

fn cmd_config(config: &Config) -> Result<()> {
    print!("{}", config.to_yaml()?);
    Ok(())
}
