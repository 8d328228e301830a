//! Command-line interface for guardrelay.
//!
//! This module provides the CLI structure for the `guardrelay` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{ConfigCommand, GetCommand, GuardianCommand, ServeCommand, StatusCommand};

/// guardrelay - Alert relay for child-safety devices
///
/// Accepts store writes from devices and pushes a notification to every
/// guardian paired with a device whenever it raises a new alert.
#[derive(Debug, Parser)]
#[command(name = "guardrelay")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the proxy endpoint and alert dispatcher
    Serve(ServeCommand),

    /// Manage the guardian directory
    #[command(subcommand)]
    Guardian(GuardianCommand),

    /// Print the value stored at a path
    Get(GetCommand),

    /// Show store statistics
    Status(StatusCommand),

    /// View or check configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}
