//! Scriptable link and recording sink for tests
//!
//! `MockLink` behaves like a single-radio adapter: it counts connections that are
//! connecting or connected, remembers the highest count it ever saw, and records
//! every operation in order. Failures and hangs can be scripted per address.
//!
//! A hung connect that gets cancelled keeps its slot, the way a real adapter keeps
//! a half-open link, until [`PeripheralLink::abort`] is called for that address.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::config::DEFAULT_CHARACTERISTIC_UUID;
use crate::errors::{ConnectError, WriteError};
use crate::events::{EventSink, GatewayEvent};
use crate::link::{LinkEventSender, PeripheralLink};
use crate::types::{
    Connection, ConnectionId, ConnectionState, GatewayMode, LinkEvent, PeripheralAddress,
    PeripheralRole, RawNotification,
};

// ----------------------------------------------------------------------------
// Mock Link
// ----------------------------------------------------------------------------

/// One recorded link operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOp {
    Connect {
        address: PeripheralAddress,
        role: PeripheralRole,
    },
    ConnectFailed {
        address: PeripheralAddress,
        role: PeripheralRole,
    },
    Subscribe {
        address: PeripheralAddress,
    },
    Unsubscribe {
        address: PeripheralAddress,
    },
    Write {
        address: PeripheralAddress,
        payload: Vec<u8>,
    },
    Disconnect {
        address: PeripheralAddress,
    },
    Abort {
        address: PeripheralAddress,
    },
}

struct Subscriber {
    address: PeripheralAddress,
    events: LinkEventSender,
    active: bool,
}

#[derive(Default)]
struct MockState {
    ops: Vec<LinkOp>,
    connect_failures: HashMap<PeripheralAddress, u32>,
    write_failures: HashMap<PeripheralAddress, u32>,
    hanging_writes: HashSet<PeripheralAddress>,
    hanging_connects: HashMap<PeripheralAddress, u32>,
    half_open: HashMap<PeripheralAddress, usize>,
    subscribers: HashMap<ConnectionId, Subscriber>,
    open: HashMap<ConnectionId, PeripheralAddress>,
    dropped: HashSet<ConnectionId>,
    active: usize,
    max_active: usize,
    next_id: ConnectionId,
}

impl MockState {
    fn claim(&mut self) {
        self.active += 1;
        self.max_active = self.max_active.max(self.active);
    }

    fn release(&mut self) {
        self.active = self.active.saturating_sub(1);
    }
}

/// Releases a connecting slot if a connect future is dropped mid-flight
struct ConnectingSlot {
    state: Arc<Mutex<MockState>>,
    armed: bool,
}

impl Drop for ConnectingSlot {
    fn drop(&mut self) {
        if self.armed {
            if let Ok(mut state) = self.state.lock() {
                state.release();
            }
        }
    }
}

/// In-memory [`PeripheralLink`] for deterministic tests
#[derive(Clone)]
pub struct MockLink {
    state: Arc<Mutex<MockState>>,
    connect_delay: Duration,
    characteristic: Uuid,
}

impl Default for MockLink {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLink {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            connect_delay: Duration::ZERO,
            characteristic: DEFAULT_CHARACTERISTIC_UUID,
        }
    }

    /// Make every connect take `delay` before resolving
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // A panic in another test thread must not hide this test's assertions
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fail the next `count` connects to `address`
    pub fn fail_next_connects(&self, address: PeripheralAddress, count: u32) {
        self.state().connect_failures.insert(address, count);
    }

    /// Fail the next `count` writes to `address`
    pub fn fail_next_writes(&self, address: PeripheralAddress, count: u32) {
        self.state().write_failures.insert(address, count);
    }

    /// Make every write to `address` hang forever
    pub fn hang_writes(&self, address: PeripheralAddress) {
        self.state().hanging_writes.insert(address);
    }

    /// Make the next `count` connects to `address` hang forever
    pub fn hang_next_connects(&self, address: PeripheralAddress, count: u32) {
        self.state().hanging_connects.insert(address, count);
    }

    /// Deliver a notification to the active subscriber of `address`
    ///
    /// Returns false when nobody is subscribed.
    pub async fn notify(&self, address: PeripheralAddress, value: &[u8]) -> bool {
        let target = {
            let state = self.state();
            state
                .subscribers
                .iter()
                .find(|(_, s)| s.active && s.address == address)
                .map(|(id, s)| (*id, s.events.clone()))
        };

        match target {
            Some((connection_id, events)) => events
                .send(LinkEvent::Notification(RawNotification {
                    connection_id,
                    origin: address,
                    value: value.to_vec(),
                }))
                .await
                .is_ok(),
            None => false,
        }
    }

    /// Simulate the peripheral at `address` dropping the link on its own
    ///
    /// The connection stays registered until it is disconnected or aborted.
    pub async fn drop_peripheral(&self, address: PeripheralAddress) -> bool {
        let dropped = {
            let mut state = self.state();
            let id = state
                .open
                .iter()
                .find(|(id, a)| **a == address && !state.dropped.contains(*id))
                .map(|(id, _)| *id);
            match id {
                Some(id) => {
                    state.dropped.insert(id);
                    state.subscribers.remove(&id).map(|s| (id, s.events))
                }
                None => None,
            }
        };

        match dropped {
            Some((connection_id, events)) => events
                .send(LinkEvent::Disconnected {
                    connection_id,
                    address,
                })
                .await
                .is_ok(),
            None => false,
        }
    }

    /// Every recorded operation, in order
    pub fn ops(&self) -> Vec<LinkOp> {
        self.state().ops.clone()
    }

    /// Payloads written to `address`, in order
    pub fn writes_to(&self, address: PeripheralAddress) -> Vec<Vec<u8>> {
        self.state()
            .ops
            .iter()
            .filter_map(|op| match op {
                LinkOp::Write { address: a, payload } if *a == address => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    /// Successful connects to `address`
    pub fn connect_count(&self, address: PeripheralAddress) -> usize {
        self.state()
            .ops
            .iter()
            .filter(|op| matches!(op, LinkOp::Connect { address: a, .. } if *a == address))
            .count()
    }

    /// Connections registered and not yet disconnected, dropped ones included
    pub fn open_connections(&self) -> usize {
        self.state().open.len()
    }

    /// Connections currently connecting or connected
    pub fn active(&self) -> usize {
        self.state().active
    }

    /// Highest number of simultaneous connecting/connected links ever observed
    pub fn max_active(&self) -> usize {
        self.state().max_active
    }

    /// Whether an active notification subscription exists for `address`
    pub fn is_subscribed(&self, address: PeripheralAddress) -> bool {
        self.state()
            .subscribers
            .values()
            .any(|s| s.active && s.address == address)
    }
}

#[async_trait]
impl PeripheralLink for MockLink {
    async fn connect(
        &self,
        address: PeripheralAddress,
        role: PeripheralRole,
    ) -> Result<Connection, ConnectError> {
        self.state().claim();
        let mut slot = ConnectingSlot {
            state: self.state.clone(),
            armed: true,
        };

        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }

        let hang = {
            let mut state = self.state();
            let remaining = state.hanging_connects.get(&address).copied().unwrap_or(0);
            if remaining > 0 {
                state.hanging_connects.insert(address, remaining - 1);
                *state.half_open.entry(address).or_default() += 1;
                slot.armed = false;
            }
            remaining > 0
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let mut state = self.state();
        let remaining = state.connect_failures.get(&address).copied().unwrap_or(0);
        if remaining > 0 {
            state.connect_failures.insert(address, remaining - 1);
            state.ops.push(LinkOp::ConnectFailed { address, role });
            // Slot guard releases the claim
            return Err(ConnectError::Unreachable(address.to_string()));
        }

        slot.armed = false;
        state.next_id += 1;
        let id = state.next_id;
        state.open.insert(id, address);
        state.ops.push(LinkOp::Connect { address, role });
        Ok(Connection::connected(id, address, role, self.characteristic))
    }

    async fn disconnect(&self, connection: &mut Connection) {
        if connection.state() == ConnectionState::Disconnected {
            debug!("Mock disconnect of {} already closed", connection.address());
            return;
        }
        connection.mark_disconnecting();

        let notify = {
            let mut state = self.state();
            if state.open.remove(&connection.id()).is_some() {
                state.release();
            }
            state.dropped.remove(&connection.id());
            state.ops.push(LinkOp::Disconnect {
                address: connection.address(),
            });
            state.subscribers.remove(&connection.id()).map(|s| s.events)
        };

        if let Some(events) = notify {
            let _ = events.try_send(LinkEvent::Disconnected {
                connection_id: connection.id(),
                address: connection.address(),
            });
        }
        connection.mark_disconnected();
    }

    async fn subscribe(
        &self,
        connection: &Connection,
        events: LinkEventSender,
    ) -> Result<(), ConnectError> {
        let mut state = self.state();
        if !state.open.contains_key(&connection.id()) {
            return Err(ConnectError::SubscribeFailed("not connected".to_string()));
        }
        state.subscribers.insert(
            connection.id(),
            Subscriber {
                address: connection.address(),
                events,
                active: true,
            },
        );
        state.ops.push(LinkOp::Subscribe {
            address: connection.address(),
        });
        Ok(())
    }

    async fn unsubscribe(&self, connection: &Connection) {
        let mut state = self.state();
        if let Some(subscriber) = state.subscribers.get_mut(&connection.id()) {
            subscriber.active = false;
        }
        state.ops.push(LinkOp::Unsubscribe {
            address: connection.address(),
        });
    }

    async fn write(&self, connection: &Connection, payload: &[u8]) -> Result<(), WriteError> {
        let address = connection.address();
        let hang = {
            let mut state = self.state();
            if !state.open.contains_key(&connection.id()) || state.dropped.contains(&connection.id()) {
                return Err(WriteError::Disconnected);
            }
            let remaining = state.write_failures.get(&address).copied().unwrap_or(0);
            if remaining > 0 {
                state.write_failures.insert(address, remaining - 1);
                return Err(WriteError::Rejected("scripted failure".to_string()));
            }
            let hang = state.hanging_writes.contains(&address);
            if !hang {
                state.ops.push(LinkOp::Write {
                    address,
                    payload: payload.to_vec(),
                });
            }
            hang
        };

        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn abort(&self, address: PeripheralAddress) {
        let mut state = self.state();
        let half_open = state.half_open.remove(&address).unwrap_or(0);
        for _ in 0..half_open {
            state.release();
        }

        let ids: Vec<ConnectionId> = state
            .open
            .iter()
            .filter(|(_, a)| **a == address)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            state.open.remove(&id);
            state.dropped.remove(&id);
            state.subscribers.remove(&id);
            state.release();
        }
        state.ops.push(LinkOp::Abort { address });
    }
}

// ----------------------------------------------------------------------------
// Recording Sink
// ----------------------------------------------------------------------------

/// Event sink that keeps everything in memory
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<GatewayEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<GatewayEvent> {
        self.events
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    /// Mode transitions in the order they happened
    pub fn mode_changes(&self) -> Vec<(GatewayMode, GatewayMode)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                GatewayEvent::ModeChanged { from, to } => Some((from, to)),
                _ => None,
            })
            .collect()
    }

    /// Rendered log lines
    pub fn lines(&self) -> Vec<String> {
        self.events().iter().map(ToString::to_string).collect()
    }
}

impl EventSink for RecordingSink {
    fn record(&self, event: &GatewayEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn addr(last: u8) -> PeripheralAddress {
        PeripheralAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, last])
    }

    #[tokio::test]
    async fn test_mock_counts_active_connections() {
        let link = MockLink::new();
        let mut a = link.connect(addr(1), PeripheralRole::Listener).await.unwrap();
        let mut b = link.connect(addr(2), PeripheralRole::Sender).await.unwrap();
        assert_eq!(link.active(), 2);
        assert_eq!(link.max_active(), 2);

        link.disconnect(&mut a).await;
        link.disconnect(&mut b).await;
        assert_eq!(link.active(), 0);
        assert_eq!(link.max_active(), 2);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let link = MockLink::new();
        let mut conn = link.connect(addr(1), PeripheralRole::Sender).await.unwrap();
        link.disconnect(&mut conn).await;
        link.disconnect(&mut conn).await;

        let disconnects = link
            .ops()
            .into_iter()
            .filter(|op| matches!(op, LinkOp::Disconnect { .. }))
            .count();
        assert_eq!(disconnects, 1);
        assert_eq!(link.active(), 0);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_scripted_connect_failures() {
        let link = MockLink::new();
        link.fail_next_connects(addr(1), 2);
        assert!(link.connect(addr(1), PeripheralRole::Listener).await.is_err());
        assert!(link.connect(addr(1), PeripheralRole::Listener).await.is_err());
        assert!(link.connect(addr(1), PeripheralRole::Listener).await.is_ok());
        assert_eq!(link.active(), 1);
        assert_eq!(link.connect_count(addr(1)), 1);
    }

    #[tokio::test]
    async fn test_notifications_reach_subscriber() {
        let link = MockLink::new();
        let (tx, mut rx) = mpsc::channel(4);
        let conn = link.connect(addr(1), PeripheralRole::Listener).await.unwrap();
        link.subscribe(&conn, tx).await.unwrap();

        assert!(link.notify(addr(1), b"TEST1@\n").await);
        match rx.recv().await {
            Some(LinkEvent::Notification(n)) => assert_eq!(n.value, b"TEST1@\n"),
            other => panic!("unexpected event: {:?}", other),
        }

        link.unsubscribe(&conn).await;
        assert!(!link.notify(addr(1), b"late").await);
    }

    #[tokio::test]
    async fn test_cancelled_hung_connect_holds_slot_until_abort() {
        let link = MockLink::new();
        link.hang_next_connects(addr(1), 1);

        let attempt = tokio::time::timeout(
            Duration::from_millis(10),
            link.connect(addr(1), PeripheralRole::Sender),
        )
        .await;
        assert!(attempt.is_err());
        assert_eq!(link.active(), 1);

        link.abort(addr(1)).await;
        assert_eq!(link.active(), 0);
        assert!(link.connect(addr(1), PeripheralRole::Sender).await.is_ok());
        assert_eq!(link.max_active(), 1);
    }

    #[tokio::test]
    async fn test_dropped_connection_stays_open_until_disconnected() {
        let link = MockLink::new();
        let (tx, mut rx) = mpsc::channel(4);
        let mut conn = link.connect(addr(1), PeripheralRole::Listener).await.unwrap();
        link.subscribe(&conn, tx).await.unwrap();

        assert!(link.drop_peripheral(addr(1)).await);
        assert!(matches!(rx.recv().await, Some(LinkEvent::Disconnected { .. })));
        assert_eq!(link.open_connections(), 1);
        assert_eq!(link.write(&conn, b"x").await, Err(WriteError::Disconnected));

        link.disconnect(&mut conn).await;
        assert_eq!(link.open_connections(), 0);
        assert_eq!(link.active(), 0);
    }
}
