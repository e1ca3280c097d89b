//! Command handlers for the blegate CLI

use std::path::Path;

use tracing::info;

use crate::app::GatewayApp;
use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::error::Result;

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(cli: Cli) -> Result<()> {
        let config_path = cli.config.as_deref();
        match cli.command {
            Commands::Run { interactive } => Self::handle_run_command(config_path, interactive).await,
            Commands::Config => Self::handle_config_command(),
            Commands::Check => Self::handle_check_command(config_path),
        }
    }

    async fn handle_run_command(config_path: Option<&Path>, interactive: bool) -> Result<()> {
        let config = AppConfig::load(config_path)?;
        info!(
            "Listening to {} with {} route(s)",
            config.gateway.listener_address()?,
            config.gateway.routes.len()
        );
        GatewayApp::new(config)?.run(interactive).await
    }

    fn handle_config_command() -> Result<()> {
        print!("{}", Self::render_example()?);
        Ok(())
    }

    fn handle_check_command(config_path: Option<&Path>) -> Result<()> {
        let config = AppConfig::load(config_path)?;
        println!("{}", Self::summary(&config)?);
        Ok(())
    }

    pub fn render_example() -> Result<String> {
        Ok(toml::to_string_pretty(&AppConfig::example())?)
    }

    /// Human-readable overview of a validated configuration
    pub fn summary(config: &AppConfig) -> Result<String> {
        let gateway = &config.gateway;
        let mut lines = vec![
            "Configuration OK".to_string(),
            format!("  listener:       {}", gateway.listener_address()?),
            format!("  characteristic: {}", gateway.characteristic),
        ];
        for route in &gateway.routes {
            lines.push(format!(
                "  route:          {} -> {} {:?}",
                route.category, route.target, route.payload
            ));
        }
        lines.push(format!(
            "  queue:          {}",
            gateway
                .queue_capacity
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unbounded".to_string())
        ));
        lines.push(format!("  adapter:        #{}", config.ble.adapter_index));
        Ok(lines.join("\n"))
    }
}
