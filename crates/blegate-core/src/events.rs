//! Gateway event model and sinks
//!
//! Every transition, connect/disconnect, notification, retry and send outcome is a
//! [`GatewayEvent`]. Events are traced and then handed to any registered
//! [`EventSink`], which turns them into the append-only audit trail.

use core::fmt;

use crate::request::RequestId;
use crate::types::{GatewayMode, PeripheralAddress, PeripheralRole};

// ----------------------------------------------------------------------------
// Events
// ----------------------------------------------------------------------------

/// Something observable happened inside the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    ModeChanged {
        from: GatewayMode,
        to: GatewayMode,
    },
    Connected {
        address: PeripheralAddress,
        role: PeripheralRole,
    },
    Disconnected {
        address: PeripheralAddress,
        role: PeripheralRole,
    },
    ConnectFailed {
        address: PeripheralAddress,
        role: PeripheralRole,
        attempt: u32,
        error: String,
    },
    RetryScheduled {
        address: PeripheralAddress,
        role: PeripheralRole,
        attempt: u32,
        delay_ms: u64,
    },
    ListenerLost {
        address: PeripheralAddress,
    },
    NotificationReceived {
        origin: PeripheralAddress,
        text: String,
        classification: Option<String>,
    },
    SendQueued {
        request_id: RequestId,
        target: PeripheralAddress,
        origin: String,
        queue_len: usize,
    },
    WriteFailed {
        request_id: RequestId,
        target: PeripheralAddress,
        attempt: u32,
        error: String,
    },
    SendCompleted {
        request_id: RequestId,
        target: PeripheralAddress,
        attempts: u32,
    },
    SendFailed {
        request_id: RequestId,
        target: PeripheralAddress,
        attempts: u32,
        error: String,
    },
}

/// Severity used when tracing an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl GatewayEvent {
    pub fn level(&self) -> EventLevel {
        match self {
            GatewayEvent::SendQueued { .. } => EventLevel::Debug,
            GatewayEvent::ConnectFailed { .. }
            | GatewayEvent::RetryScheduled { .. }
            | GatewayEvent::ListenerLost { .. }
            | GatewayEvent::WriteFailed { .. } => EventLevel::Warn,
            GatewayEvent::SendFailed { .. } => EventLevel::Error,
            _ => EventLevel::Info,
        }
    }

    /// Emit the event through `tracing`
    pub fn trace(&self) {
        match self.level() {
            EventLevel::Debug => tracing::debug!("{}", self),
            EventLevel::Info => tracing::info!("{}", self),
            EventLevel::Warn => tracing::warn!("{}", self),
            EventLevel::Error => tracing::error!("{}", self),
        }
    }
}

impl fmt::Display for GatewayEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayEvent::ModeChanged { from, to } => write!(f, "MODE {} -> {}", from, to),
            GatewayEvent::Connected { address, role } => {
                write!(f, "CONNECTED {} {}", role, address)
            }
            GatewayEvent::Disconnected { address, role } => {
                write!(f, "DISCONNECTED {} {}", role, address)
            }
            GatewayEvent::ConnectFailed {
                address,
                role,
                attempt,
                error,
            } => write!(
                f,
                "CONNECT FAILED {} {} attempt {}: {}",
                role, address, attempt, error
            ),
            GatewayEvent::RetryScheduled {
                address,
                role,
                attempt,
                delay_ms,
            } => write!(
                f,
                "RETRY {} {} after attempt {} in {}ms",
                role, address, attempt, delay_ms
            ),
            GatewayEvent::ListenerLost { address } => write!(f, "LISTENER LOST {}", address),
            GatewayEvent::NotificationReceived {
                origin,
                text,
                classification,
            } => match classification {
                Some(category) => write!(f, "RX {} {:?} [{}]", origin, text, category),
                None => write!(f, "RX {} {:?} [unclassified]", origin, text),
            },
            GatewayEvent::SendQueued {
                request_id,
                target,
                origin,
                queue_len,
            } => write!(
                f,
                "QUEUED #{} -> {} ({}), {} pending",
                request_id, target, origin, queue_len
            ),
            GatewayEvent::WriteFailed {
                request_id,
                target,
                attempt,
                error,
            } => write!(
                f,
                "WRITE FAILED #{} -> {} attempt {}: {}",
                request_id, target, attempt, error
            ),
            GatewayEvent::SendCompleted {
                request_id,
                target,
                attempts,
            } => write!(
                f,
                "SEND #{} -> {} ok after {} attempt(s)",
                request_id, target, attempts
            ),
            GatewayEvent::SendFailed {
                request_id,
                target,
                attempts,
                error,
            } => write!(
                f,
                "SEND #{} -> {} failed after {} attempt(s): {}",
                request_id, target, attempts, error
            ),
        }
    }
}

// ----------------------------------------------------------------------------
// Sinks
// ----------------------------------------------------------------------------

/// Consumer of gateway events
///
/// Called on the state machine task, so implementations must not block for long.
pub trait EventSink: Send + Sync {
    fn record(&self, event: &GatewayEvent);
}

/// Sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn record(&self, _event: &GatewayEvent) {}
}
