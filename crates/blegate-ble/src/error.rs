//! Error types for the BLE link

use blegate_core::{ConnectError, WriteError};
use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors raised by the btleplug link before they are mapped onto gateway errors
#[derive(Error, Debug)]
pub enum BleLinkError {
    #[error("BLE adapter not available")]
    AdapterNotAvailable,

    #[error("Adapter index {index} out of range ({count} adapter(s) found)")]
    AdapterIndexOutOfRange { index: usize, count: usize },

    #[error("Peripheral not found: {address}")]
    PeripheralNotFound { address: String },

    #[error("Failed to connect to peripheral: {0}")]
    ConnectionFailed(String),

    #[error("Failed to discover services: {0}")]
    ServiceDiscoveryFailed(String),

    #[error("Characteristic not found: {characteristic}")]
    CharacteristicNotFound { characteristic: String },

    #[error("Failed to subscribe to notifications: {0}")]
    SubscriptionFailed(String),

    #[error("Failed to get notifications stream: {0}")]
    NotificationStreamFailed(String),

    #[error("Failed to write to characteristic: {0}")]
    WriteFailed(String),

    #[error("Peripheral not connected")]
    NotConnected,

    #[error("Adapter event stream ended")]
    AdapterEventsEnded,

    #[error("BLE error: {0}")]
    Btleplug(#[from] btleplug::Error),
}

/// Result alias for the BLE link
pub type Result<T> = std::result::Result<T, BleLinkError>;

impl From<BleLinkError> for ConnectError {
    fn from(err: BleLinkError) -> Self {
        match err {
            BleLinkError::AdapterNotAvailable | BleLinkError::AdapterIndexOutOfRange { .. } => {
                ConnectError::AdapterUnavailable(err.to_string())
            }
            BleLinkError::CharacteristicNotFound { characteristic } => {
                ConnectError::CharacteristicNotFound { characteristic }
            }
            BleLinkError::SubscriptionFailed(reason)
            | BleLinkError::NotificationStreamFailed(reason) => {
                ConnectError::SubscribeFailed(reason)
            }
            other => ConnectError::Unreachable(other.to_string()),
        }
    }
}

impl From<BleLinkError> for WriteError {
    fn from(err: BleLinkError) -> Self {
        match err {
            BleLinkError::NotConnected => WriteError::Disconnected,
            other => WriteError::Rejected(other.to_string()),
        }
    }
}
