//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Serve command arguments.
#[derive(Debug, Args)]
pub struct ServeCommand {
    /// Override the listen address from the configuration
    #[arg(short, long, value_name = "ADDR")]
    pub bind: Option<String>,
}

/// Guardian directory commands.
#[derive(Debug, Subcommand)]
pub enum GuardianCommand {
    /// Add or replace a guardian
    Add {
        /// Guardian id
        id: String,

        /// Device the guardian is paired with
        #[arg(short, long)]
        device: Option<String>,

        /// Push token of the guardian's app
        #[arg(short, long)]
        token: Option<String>,
    },

    /// List guardians
    List {
        /// Only guardians paired with this device
        #[arg(short, long)]
        device: Option<String>,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Remove a guardian
    Remove {
        /// Guardian id
        id: String,
    },

    /// Clear a guardian's push token
    ClearToken {
        /// Guardian id
        id: String,
    },
}

/// Get command arguments.
#[derive(Debug, Args)]
pub struct GetCommand {
    /// Store path to read (`/` for the whole tree)
    #[arg(default_value = "/")]
    pub path: String,
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}
