//! blegate - single-radio BLE gateway

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use blegate_cli::{cli::Cli, commands::CommandDispatcher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    CommandDispatcher::execute(cli)
        .await
        .context("blegate failed")?;
    Ok(())
}

/// Setup logging based on verbosity level; `RUST_LOG` takes precedence
fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
