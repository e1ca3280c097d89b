//! Core building blocks of the blegate BLE gateway
//!
//! This crate holds everything that does not touch the radio directly:
//!
//! - [`types`] - addresses, roles, connections, messages and the gateway mode
//! - [`errors`] - connect/write/decode/config errors and the caller-facing `GatewayError`
//! - [`config`] - the wiring and tuning surface, loaded from TOML by the binary
//! - [`decoder`] - notification payload -> classified [`Message`]
//! - [`router`] - classified message -> [`SendRequest`]
//! - [`retry`] - listener and sender retry policies
//! - [`events`] - the audit event model and the [`EventSink`] trait
//! - [`link`] - the [`PeripheralLink`] trait implemented by the BLE crate
//!
//! With the `testing` feature, [`testing`] provides `MockLink` and `RecordingSink`.

pub mod config;
pub mod decoder;
pub mod errors;
pub mod events;
pub mod link;
pub mod request;
pub mod retry;
pub mod router;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{
    CommandToken, GatewayConfig, MatchMode, RetryConfig, RouteConfig, TimingConfig, WriteMode,
    DEFAULT_CHARACTERISTIC_UUID,
};
pub use decoder::NotificationDecoder;
pub use errors::{
    ConfigError, ConnectError, DecodeError, GatewayError, GatewayResult, SendFailure, WriteError,
};
pub use events::{EventSink, GatewayEvent, NullSink};
pub use link::{LinkEventReceiver, LinkEventSender, PeripheralLink};
pub use request::{
    RequestId, RequestIds, RequestOrigin, SendReceipt, SendRequest, SendTicket,
};
pub use retry::RetryPolicy;
pub use router::{CommandRouter, Route};
pub use types::{
    Connection, ConnectionId, ConnectionState, GatewayMode, LinkEvent, Message,
    PeripheralAddress, PeripheralRole, RawNotification, Timestamp,
};
