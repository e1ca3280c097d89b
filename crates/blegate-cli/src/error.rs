//! Error handling for the blegate CLI

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] blegate_core::ConfigError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] blegate_core::GatewayError),

    #[error("BLE initialization failed: {0}")]
    Ble(#[from] blegate_ble::BleLinkError),

    #[error("Gateway task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
