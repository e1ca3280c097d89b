//! Gateway configuration
//!
//! Everything wiring-specific lives here: which peripheral is listened to, which
//! characteristic carries the UART stream, how notifications are classified and
//! where each category is forwarded. Nothing in the state machine hard-codes these.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ConfigError;
use crate::types::PeripheralAddress;

/// UART-over-BLE characteristic exposed by HM-10 style modules
pub const DEFAULT_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000FFE1_0000_1000_8000_00805F9B34FB);

/// Upper bound for extra sender attempts
pub const MAX_SENDER_EXTRA_ATTEMPTS: u32 = 2;

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the arbitration core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Peripheral whose notifications are listened to (required)
    pub listener: Option<PeripheralAddress>,
    /// GATT characteristic used for both notify and write
    pub characteristic: Uuid,
    /// Recognized command tokens, checked in order
    pub commands: Vec<CommandToken>,
    /// Category to target mapping
    pub routes: Vec<RouteConfig>,
    /// Delays and timeouts
    pub timing: TimingConfig,
    /// Retry counts and delays
    pub retry: RetryConfig,
    /// Maximum queued send requests, unbounded when unset
    pub queue_capacity: Option<usize>,
    /// Capacity of the link to decoder notification channel
    pub notification_buffer: usize,
    /// How payloads are pushed to the characteristic
    pub write_mode: WriteMode,
}

/// A token that classifies a decoded frame into a category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandToken {
    pub category: String,
    pub token: String,
    #[serde(default)]
    pub match_mode: MatchMode,
}

/// How a token is compared against a decoded frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Whole trimmed frame must equal the token
    Exact,
    /// Token may appear anywhere in the frame
    #[default]
    Contains,
}

/// Where a classified message is forwarded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub category: String,
    pub target: PeripheralAddress,
    pub payload: String,
}

/// Delays and timeouts, all in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Bound on a single connect (including characteristic discovery)
    pub connect_timeout_ms: u64,
    /// Bound on a single payload write
    pub write_timeout_ms: u64,
    /// Time given to the listener to flush after disconnect
    pub suspend_grace_ms: u64,
    /// Pause between connect and write, and between write and disconnect
    pub inter_op_delay_ms: u64,
    /// Quiet period after a send before re-listening
    pub settle_delay_ms: u64,
}

/// Retry behavior for both roles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Fixed delay between listener connect attempts
    pub listener_delay_ms: u64,
    /// Extra attempts after a failed send
    pub sender_extra_attempts: u32,
    /// Delay between send attempts
    pub sender_delay_ms: u64,
}

/// Write strategy for target modules with small serial buffers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WriteMode {
    /// Whole payload in one characteristic write
    #[default]
    Atomic,
    /// One write per byte with a pause in between
    PerCharacter { delay_ms: u64 },
}

// ----------------------------------------------------------------------------
// Default Implementations
// ----------------------------------------------------------------------------

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listener: None,
            characteristic: DEFAULT_CHARACTERISTIC_UUID,
            commands: vec![
                CommandToken::contains("on", "TEST1@"),
                CommandToken::contains("off", "TEST2@"),
            ],
            routes: Vec::new(),
            timing: TimingConfig::default(),
            retry: RetryConfig::default(),
            queue_capacity: None,
            notification_buffer: 64,
            write_mode: WriteMode::Atomic,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 8_000,
            write_timeout_ms: 5_000,
            suspend_grace_ms: 300,
            inter_op_delay_ms: 50,
            settle_delay_ms: 500,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            listener_delay_ms: 1_000,
            sender_extra_attempts: 1,
            sender_delay_ms: 250,
        }
    }
}

impl CommandToken {
    /// Token matched anywhere in the frame
    pub fn contains(category: &str, token: &str) -> Self {
        Self {
            category: category.to_string(),
            token: token.to_string(),
            match_mode: MatchMode::Contains,
        }
    }

    /// Token matched against the whole frame
    pub fn exact(category: &str, token: &str) -> Self {
        Self {
            category: category.to_string(),
            token: token.to_string(),
            match_mode: MatchMode::Exact,
        }
    }

    /// Check a decoded frame against this token
    pub fn matches(&self, text: &str) -> bool {
        match self.match_mode {
            MatchMode::Exact => text == self.token,
            MatchMode::Contains => text.contains(&self.token),
        }
    }
}

impl RouteConfig {
    pub fn new(category: &str, target: PeripheralAddress, payload: &str) -> Self {
        Self {
            category: category.to_string(),
            target,
            payload: payload.to_string(),
        }
    }
}

impl TimingConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn suspend_grace(&self) -> Duration {
        Duration::from_millis(self.suspend_grace_ms)
    }

    pub fn inter_op_delay(&self) -> Duration {
        Duration::from_millis(self.inter_op_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

// ----------------------------------------------------------------------------
// Builder Setters and Validation
// ----------------------------------------------------------------------------

impl GatewayConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the listener peripheral
    pub fn with_listener(mut self, address: PeripheralAddress) -> Self {
        self.listener = Some(address);
        self
    }

    /// Set the shared characteristic
    pub fn with_characteristic(mut self, characteristic: Uuid) -> Self {
        self.characteristic = characteristic;
        self
    }

    /// Replace the recognized command tokens
    pub fn with_commands(mut self, commands: Vec<CommandToken>) -> Self {
        self.commands = commands;
        self
    }

    /// Add a route for a category
    pub fn with_route(mut self, route: RouteConfig) -> Self {
        self.routes.push(route);
        self
    }

    /// Set timing parameters
    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Set retry parameters
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Bound the send queue
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Set the payload write strategy
    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.write_mode = mode;
        self
    }

    /// Listener address, failing if it was never configured
    pub fn listener_address(&self) -> Result<PeripheralAddress, ConfigError> {
        self.listener.ok_or(ConfigError::Missing("listener"))
    }

    /// Check the configuration before the gateway starts
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listener_address()?;

        if self.characteristic.is_nil() {
            return Err(ConfigError::Missing("characteristic"));
        }

        for command in &self.commands {
            if command.token.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "commands.token",
                    reason: format!("empty token for category '{}'", command.category),
                });
            }
        }

        for route in &self.routes {
            if !self.commands.iter().any(|c| c.category == route.category) {
                return Err(ConfigError::UnknownCategory(route.category.clone()));
            }
            if route.payload.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "routes.payload",
                    reason: format!("empty payload for category '{}'", route.category),
                });
            }
        }

        if self.retry.sender_extra_attempts > MAX_SENDER_EXTRA_ATTEMPTS {
            return Err(ConfigError::InvalidValue {
                field: "retry.sender_extra_attempts",
                reason: format!(
                    "{} exceeds maximum of {}",
                    self.retry.sender_extra_attempts, MAX_SENDER_EXTRA_ATTEMPTS
                ),
            });
        }

        if self.timing.connect_timeout_ms == 0 || self.timing.write_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "timing",
                reason: "timeouts must be non-zero".to_string(),
            });
        }

        if self.queue_capacity == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "queue_capacity",
                reason: "capacity must be at least 1".to_string(),
            });
        }

        if self.notification_buffer == 0 {
            return Err(ConfigError::InvalidValue {
                field: "notification_buffer",
                reason: "buffer must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}
