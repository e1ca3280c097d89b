//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path (defaults to ./blegate.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the gateway until Ctrl-C
    Run {
        /// Read send requests from stdin
        #[arg(short, long)]
        interactive: bool,
    },
    /// Print an example configuration
    Config,
    /// Load and validate the configuration, then exit
    Check,
}
