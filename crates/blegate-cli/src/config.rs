//! blegate configuration loading
//!
//! Configuration is layered with figment, lowest priority first:
//! - built-in defaults
//! - `blegate.toml` in the working directory, or the file given with `--config`
//! - environment variables prefixed `BLEGATE_`, nested with `__`
//!   (e.g. `BLEGATE_GATEWAY__LISTENER=50:F1:4A:4D:DC:E9`)

use std::path::{Path, PathBuf};

use blegate_ble::BleLinkConfig;
use blegate_core::{ConfigError, GatewayConfig, PeripheralAddress, RouteConfig};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Default configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "blegate.toml";

// ----------------------------------------------------------------------------
// Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the blegate binary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Arbitration, routing and timing
    pub gateway: GatewayConfig,
    /// Adapter selection and write type
    pub ble: BleLinkConfig,
    /// Audit trail
    pub log: LogConfig,
}

/// Event log settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Append-only event log; disabled when unset
    pub event_log: Option<PathBuf>,
}

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Load with the standard priority order and validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        if path.is_some() && !file.exists() {
            return Err(ConfigError::Loading(format!(
                "{} does not exist",
                file.display()
            )));
        }

        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed("BLEGATE_").split("__"));

        Self::from_figment(figment)
    }

    /// Extract and validate from an already layered figment
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment
            .extract()
            .map_err(|e| ConfigError::Loading(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.gateway.validate()?;
        if self.ble.scan_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "ble.scan_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// A complete configuration for the two-module bench setup
    pub fn example() -> Self {
        let listener = PeripheralAddress::new([0x50, 0xF1, 0x4A, 0x4D, 0xDC, 0xE9]);
        let target = PeripheralAddress::new([0x5C, 0xF8, 0x21, 0x9E, 0x55, 0x84]);

        Self {
            gateway: GatewayConfig::new()
                .with_listener(listener)
                .with_route(RouteConfig::new("on", target, "|ON@"))
                .with_route(RouteConfig::new("off", target, "|OFF@")),
            ble: BleLinkConfig::default(),
            log: LogConfig {
                event_log: Some(PathBuf::from("log.txt")),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layered(toml: &str) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Toml::string(toml))
    }

    #[test]
    fn test_example_is_valid() {
        assert!(AppConfig::example().validate().is_ok());
    }

    #[test]
    fn test_defaults_require_listener() {
        assert_eq!(
            AppConfig::default().validate(),
            Err(ConfigError::Missing("listener"))
        );
    }

    #[test]
    fn test_file_layer_overrides_defaults() {
        let config = AppConfig::from_figment(layered(
            r#"
            [gateway]
            listener = "50:F1:4A:4D:DC:E9"
            queue_capacity = 8

            [gateway.retry]
            sender_extra_attempts = 2

            [[gateway.routes]]
            category = "on"
            target = "5C:F8:21:9E:55:84"
            payload = "|ON@"

            [ble]
            adapter_index = 1
            "#,
        ))
        .unwrap();

        assert_eq!(config.gateway.queue_capacity, Some(8));
        assert_eq!(config.gateway.retry.sender_extra_attempts, 2);
        assert_eq!(config.gateway.retry.listener_delay_ms, 1_000);
        assert_eq!(config.gateway.routes.len(), 1);
        assert_eq!(config.ble.adapter_index, 1);
        assert_eq!(config.log.event_log, None);
    }

    #[test]
    fn test_unknown_route_category_rejected() {
        let result = AppConfig::from_figment(layered(
            r#"
            [gateway]
            listener = "50:F1:4A:4D:DC:E9"

            [[gateway.routes]]
            category = "toggle"
            target = "5C:F8:21:9E:55:84"
            payload = "|T@"
            "#,
        ));
        assert_eq!(result, Err(ConfigError::UnknownCategory("toggle".to_string())));
    }

    #[test]
    fn test_bad_address_is_a_loading_error() {
        let result = AppConfig::from_figment(layered(
            r#"
            [gateway]
            listener = "not-a-mac"
            "#,
        ));
        assert!(matches!(result, Err(ConfigError::Loading(_))));
    }

    #[test]
    fn test_example_renders_as_toml() {
        let rendered = toml::to_string_pretty(&AppConfig::example()).unwrap();
        assert!(rendered.contains("[gateway]"));
        assert!(rendered.contains("listener = \"50:F1:4A:4D:DC:E9\""));
        assert!(rendered.contains("[[gateway.routes]]"));

        let parsed = AppConfig::from_figment(layered(&rendered)).unwrap();
        assert_eq!(parsed, AppConfig::example());
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = AppConfig::load(Some(Path::new("/nonexistent/blegate.toml")));
        assert!(matches!(result, Err(ConfigError::Loading(_))));
    }
}
