//! Command line argument parsing
//!
//! Subcommands:
//! - `run`: Run the configured container
//! - `stop`: Stop a container by name
//! - `rm`: Force-remove a container by name
//! - `exists`: Exit 0 if a container with that name exists, 1 otherwise
//! - `network`: Ensure the configured network exists
//! - `show-config`: Show configuration discovery information

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    Run(RunConfig),
    Stop(String),
    Remove(String),
    Exists(String),
    Network,
    ShowConfig,
}

#[derive(Debug, PartialEq, Eq)]
pub struct RunConfig {
    pub follow_logs: bool,
    pub dry_run: bool,
    /// Stop and remove the container after this long
    pub teardown_after: Option<Duration>,
}

#[derive(Debug, Parser)]
#[command(name = "dockdash")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Provision a network, run a container, follow its logs and tear it down")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,
    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the container described by the configuration
    Run {
        /// Do not stream container output
        #[arg(long = "no-follow")]
        no_follow: bool,
        /// Run against an in-memory runtime and print what would be created
        #[arg(short = 'n', long = "dry-run")]
        dry_run: bool,
        /// Stop and remove the container after SECS seconds
        #[arg(long = "teardown-after", value_name = "SECS")]
        teardown_after: Option<u64>,
    },
    /// Stop a container
    Stop {
        /// Container name or ID
        name: String,
    },
    /// Force-remove a container
    Rm {
        /// Container name or ID
        name: String,
    },
    /// Check whether a container exists (exit code 0 if it does, 1 if not)
    Exists {
        /// Container name
        name: String,
    },
    /// Ensure the configured network exists
    Network,
    /// Show configuration discovery information and the active configuration
    ShowConfig,
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn mode(&self) -> Result<ExecutionMode, String> {
        match &self.command {
            Some(Commands::Run {
                no_follow,
                dry_run,
                teardown_after,
            }) => Ok(ExecutionMode::Run(RunConfig {
                follow_logs: !*no_follow,
                dry_run: *dry_run,
                teardown_after: teardown_after.map(Duration::from_secs),
            })),
            Some(Commands::Stop { name }) => Ok(ExecutionMode::Stop(name.clone())),
            Some(Commands::Rm { name }) => Ok(ExecutionMode::Remove(name.clone())),
            Some(Commands::Exists { name }) => Ok(ExecutionMode::Exists(name.clone())),
            Some(Commands::Network) => Ok(ExecutionMode::Network),
            Some(Commands::ShowConfig) => Ok(ExecutionMode::ShowConfig),
            None => Err(
                "No command specified. Use 'dockdash --help' to see available commands."
                    .to_string(),
            ),
        }
    }
}
