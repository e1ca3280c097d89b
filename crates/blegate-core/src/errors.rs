//! Error types for the blegate gateway
//!
//! Radio-level failures (`ConnectError`, `WriteError`) are caught by the arbitration
//! state machine and turned into transitions. `DecodeError` never escapes the decoder.
//! `GatewayError` is what intake callers see.

use thiserror::Error;

// ----------------------------------------------------------------------------
// Radio Errors
// ----------------------------------------------------------------------------

/// Failures while opening or preparing a connection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("Connection timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("Radio busy: {holder} holds the adapter")]
    RadioBusy { holder: String },

    #[error("Peripheral unreachable: {0}")]
    Unreachable(String),

    #[error("Characteristic not found: {characteristic}")]
    CharacteristicNotFound { characteristic: String },

    #[error("Failed to subscribe to notifications: {0}")]
    SubscribeFailed(String),

    #[error("BLE adapter not available: {0}")]
    AdapterUnavailable(String),
}

/// Failures while writing a payload to a connected peripheral
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    #[error("Characteristic rejected write: {0}")]
    Rejected(String),

    #[error("Peripheral disconnected mid-write")]
    Disconnected,

    #[error("Write timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
}

/// Malformed notification payloads
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Empty notification payload")]
    Empty,

    #[error("Invalid UTF-8 at byte {valid_up_to}")]
    InvalidUtf8 { valid_up_to: usize },
}

// ----------------------------------------------------------------------------
// Configuration Errors
// ----------------------------------------------------------------------------

/// Invalid or missing configuration, the only fatal error class
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid peripheral address: {0}")]
    InvalidAddress(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Route references unknown category: {0}")]
    UnknownCategory(String),

    #[error("Failed to load configuration: {0}")]
    Loading(String),
}

// ----------------------------------------------------------------------------
// Gateway Errors
// ----------------------------------------------------------------------------

/// Errors reported to submitters of send requests
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("Connect failed after {attempts} attempt(s): {source}")]
    Connect {
        attempts: u32,
        #[source]
        source: ConnectError,
    },

    #[error("Write failed after {attempts} attempt(s): {source}")]
    Write {
        attempts: u32,
        #[source]
        source: WriteError,
    },

    #[error("Send queue full (capacity: {capacity})")]
    QueueFull { capacity: usize },

    #[error("Gateway shut down")]
    Shutdown,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type for gateway operations
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Outcome of a single send attempt inside the state machine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendFailure {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Write(#[from] WriteError),
}

impl SendFailure {
    /// Convert into the caller-facing error once retries are exhausted
    pub fn into_gateway_error(self, attempts: u32) -> GatewayError {
        match self {
            SendFailure::Connect(source) => GatewayError::Connect { attempts, source },
            SendFailure::Write(source) => GatewayError::Write { attempts, source },
        }
    }
}
