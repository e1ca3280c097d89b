//! Peripheral link abstraction
//!
//! The arbitration state machine only talks to the radio through this trait, which
//! keeps it testable against [`MockLink`](crate::testing::MockLink) and lets the
//! btleplug implementation live in its own crate.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::{ConnectError, WriteError};
use crate::types::{Connection, LinkEvent, PeripheralAddress, PeripheralRole};

/// Sending half of the bounded inbound notification channel
pub type LinkEventSender = mpsc::Sender<LinkEvent>;

/// Receiving half of the bounded inbound notification channel
pub type LinkEventReceiver = mpsc::Receiver<LinkEvent>;

/// Connect/disconnect/notify/write against one peripheral at a time
///
/// Every method may block on radio I/O. Callers bound them with their own timeouts
/// and follow a timed-out `connect` or `disconnect` with [`abort`](Self::abort), so
/// implementations must be able to find and close a half-open link by address.
#[async_trait]
pub trait PeripheralLink: Send + Sync + 'static {
    /// Open a connection and resolve the configured characteristic
    async fn connect(
        &self,
        address: PeripheralAddress,
        role: PeripheralRole,
    ) -> Result<Connection, ConnectError>;

    /// Close a connection
    ///
    /// Idempotent: closing an already closed connection only logs.
    async fn disconnect(&self, connection: &mut Connection);

    /// Forward every notification of `connection` into `events`, in delivery order
    ///
    /// When the notification stream ends a [`LinkEvent::Disconnected`] is sent.
    async fn subscribe(
        &self,
        connection: &Connection,
        events: LinkEventSender,
    ) -> Result<(), ConnectError>;

    /// Stop notifications, best effort
    async fn unsubscribe(&self, connection: &Connection);

    /// Write bytes to the connection's characteristic
    async fn write(&self, connection: &Connection, payload: &[u8]) -> Result<(), WriteError>;

    /// Force down everything open or still connecting to `address`
    ///
    /// Used after a `connect` or `disconnect` was cancelled mid-flight. Must not fail
    /// when nothing is open.
    async fn abort(&self, address: PeripheralAddress);
}
