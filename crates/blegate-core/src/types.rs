//! Core types for the blegate gateway
//!
//! Newtypes and small value objects shared by every layer: peripheral addresses,
//! roles, connection bookkeeping, decoded messages and the gateway mode.

use core::fmt;
use core::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::errors::ConfigError;

// ----------------------------------------------------------------------------
// Peripheral Address
// ----------------------------------------------------------------------------

/// 48-bit hardware address of a BLE peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeripheralAddress([u8; 6]);

impl PeripheralAddress {
    /// Create an address from its six bytes, most significant first
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Convert into the raw bytes
    pub fn into_inner(self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for PeripheralAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a, b, c, d, e, g
        )
    }
}

impl FromStr for PeripheralAddress {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parts: Vec<&str> = trimmed.split(|c| c == ':' || c == '-').collect();
        if parts.len() != 6 {
            return Err(ConfigError::InvalidAddress(s.to_string()));
        }

        let mut bytes = [0u8; 6];
        for (slot, part) in bytes.iter_mut().zip(parts) {
            if part.len() != 2 {
                return Err(ConfigError::InvalidAddress(s.to_string()));
            }
            let decoded =
                hex::decode(part).map_err(|_| ConfigError::InvalidAddress(s.to_string()))?;
            *slot = decoded[0];
        }

        Ok(Self(bytes))
    }
}

impl Serialize for PeripheralAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PeripheralAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a new timestamp
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    /// Get the raw milliseconds
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Get duration since another timestamp
    pub fn duration_since(&self, other: Self) -> core::time::Duration {
        core::time::Duration::from_millis(self.0.saturating_sub(other.0))
    }
}

// ----------------------------------------------------------------------------
// Roles and Connection State
// ----------------------------------------------------------------------------

/// Which side of the bridge a connection serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeripheralRole {
    /// Long-lived session receiving notifications
    Listener,
    /// Transient session delivering one command
    Sender,
}

impl fmt::Display for PeripheralRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeripheralRole::Listener => write!(f, "listener"),
            PeripheralRole::Sender => write!(f, "sender"),
        }
    }
}

/// Link-level state of a single connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    /// Whether this state occupies the radio
    pub fn holds_radio(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

/// Identifier assigned by a link to each successful connect
pub type ConnectionId = u64;

/// A live link to one peripheral
///
/// Created by [`PeripheralLink::connect`](crate::link::PeripheralLink::connect) and
/// owned by the arbitration state machine until it is disconnected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    id: ConnectionId,
    address: PeripheralAddress,
    role: PeripheralRole,
    state: ConnectionState,
    characteristic: Uuid,
}

impl Connection {
    /// Create a connection record in the `Connected` state
    pub fn connected(
        id: ConnectionId,
        address: PeripheralAddress,
        role: PeripheralRole,
        characteristic: Uuid,
    ) -> Self {
        Self {
            id,
            address,
            role,
            state: ConnectionState::Connected,
            characteristic,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn address(&self) -> PeripheralAddress {
        self.address
    }

    pub fn role(&self) -> PeripheralRole {
        self.role
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn characteristic(&self) -> Uuid {
        self.characteristic
    }

    /// Check if the connection is usable for I/O
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Mark the connection as being torn down
    pub fn mark_disconnecting(&mut self) {
        self.state = ConnectionState::Disconnecting;
    }

    /// Mark the connection as fully closed
    pub fn mark_disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
    }
}

// ----------------------------------------------------------------------------
// Messages
// ----------------------------------------------------------------------------

/// Decoded application message, produced once and never mutated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    origin: PeripheralAddress,
    raw: Vec<u8>,
    text: String,
    classification: Option<String>,
    timestamp: Timestamp,
}

impl Message {
    pub fn new(
        origin: PeripheralAddress,
        raw: Vec<u8>,
        text: String,
        classification: Option<String>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            origin,
            raw,
            text,
            classification,
            timestamp,
        }
    }

    pub fn origin(&self) -> PeripheralAddress {
        self.origin
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Command category this message matched, if any
    pub fn classification(&self) -> Option<&str> {
        self.classification.as_deref()
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

/// Raw notification as delivered by a link, before decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    pub connection_id: ConnectionId,
    pub origin: PeripheralAddress,
    pub value: Vec<u8>,
}

/// Events a link pushes into the gateway's inbound channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A notification arrived on a subscribed connection
    Notification(RawNotification),
    /// The notification stream of a subscribed connection ended
    Disconnected {
        connection_id: ConnectionId,
        address: PeripheralAddress,
    },
}

// ----------------------------------------------------------------------------
// Gateway Mode
// ----------------------------------------------------------------------------

/// Current mode of the arbitration state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GatewayMode {
    Idle,
    Listening,
    Suspending,
    Sending,
    Resuming,
}

impl GatewayMode {
    /// Check whether `next` is a legal successor of this mode
    pub fn can_transition_to(&self, next: GatewayMode) -> bool {
        use GatewayMode::*;
        matches!(
            (self, next),
            (Idle, Listening)
                | (Idle, Sending)
                | (Listening, Suspending)
                | (Suspending, Sending)
                | (Sending, Resuming)
                | (Resuming, Listening)
                | (_, Idle)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            GatewayMode::Idle => "Idle",
            GatewayMode::Listening => "Listening",
            GatewayMode::Suspending => "Suspending",
            GatewayMode::Sending => "Sending",
            GatewayMode::Resuming => "Resuming",
        }
    }
}

impl fmt::Display for GatewayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parse_and_display() {
        let addr: PeripheralAddress = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        assert_eq!(addr.as_bytes(), &[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        assert_eq!(addr.to_string(), "AA:BB:CC:DD:EE:FF");

        let dashed: PeripheralAddress = "50-F1-4A-4D-DC-E9".parse().unwrap();
        assert_eq!(dashed.to_string(), "50:F1:4A:4D:DC:E9");
    }

    #[test]
    fn test_address_rejects_garbage() {
        assert!("AA:BB:CC".parse::<PeripheralAddress>().is_err());
        assert!("AA:BB:CC:DD:EE:GG".parse::<PeripheralAddress>().is_err());
        assert!("AAA:BB:CC:DD:EE:F".parse::<PeripheralAddress>().is_err());
    }

    #[test]
    fn test_mode_transitions() {
        use GatewayMode::*;
        assert!(Listening.can_transition_to(Suspending));
        assert!(Suspending.can_transition_to(Sending));
        assert!(Sending.can_transition_to(Resuming));
        assert!(Resuming.can_transition_to(Listening));
        assert!(Sending.can_transition_to(Idle));

        assert!(!Listening.can_transition_to(Sending));
        assert!(!Sending.can_transition_to(Listening));
        assert!(!Resuming.can_transition_to(Sending));
    }

    #[test]
    fn test_connection_state_holds_radio() {
        assert!(ConnectionState::Connecting.holds_radio());
        assert!(ConnectionState::Connected.holds_radio());
        assert!(!ConnectionState::Disconnecting.holds_radio());
        assert!(!ConnectionState::Disconnected.holds_radio());
    }
}
