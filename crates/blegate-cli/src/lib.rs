//! blegate CLI library
//!
//! Components of the `blegate` binary: argument parsing, layered configuration,
//! the append-only event log and the interactive stdin intake.

pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod event_log;
pub mod interactive;

pub use app::GatewayApp;
pub use cli::{Cli, Commands};
pub use config::AppConfig;
pub use error::{CliError, Result};
pub use event_log::FileEventLog;
