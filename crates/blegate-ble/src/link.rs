//! btleplug implementation of [`PeripheralLink`]

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use blegate_core::{
    ConnectError, Connection, ConnectionId, ConnectionState, LinkEvent, LinkEventSender,
    PeripheralAddress, PeripheralLink, PeripheralRole, RawNotification, WriteError,
};
use btleplug::api::{Characteristic, Peripheral as _, ValueNotification, WriteType};
use btleplug::platform::Peripheral;
use futures::stream::{Stream, StreamExt};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::BleLinkConfig;
use crate::discovery::BleAdapter;
use crate::error::{BleLinkError, Result};

// ----------------------------------------------------------------------------
// Open Links
// ----------------------------------------------------------------------------

type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

struct OpenLink {
    address: PeripheralAddress,
    peripheral: Peripheral,
    characteristic: Characteristic,
    forwarder: Option<JoinHandle<()>>,
}

impl OpenLink {
    fn stop_forwarding(&mut self) {
        if let Some(task) = self.forwarder.take() {
            task.abort();
        }
    }
}

// ----------------------------------------------------------------------------
// BLE Link
// ----------------------------------------------------------------------------

/// Peripheral link over the host's BLE adapter
pub struct BleLink {
    adapter: BleAdapter,
    config: BleLinkConfig,
    characteristic: Uuid,
    links: RwLock<HashMap<ConnectionId, OpenLink>>,
    /// Peripherals between `find_peripheral` and registration in `links`
    connecting: RwLock<HashMap<PeripheralAddress, Peripheral>>,
    next_id: AtomicU64,
}

impl BleLink {
    /// Open the configured adapter; `characteristic` is used for every peripheral
    pub async fn open(config: BleLinkConfig, characteristic: Uuid) -> Result<Self> {
        let adapter = BleAdapter::initialize(&config).await?;
        Ok(Self::with_adapter(adapter, config, characteristic))
    }

    pub fn with_adapter(adapter: BleAdapter, config: BleLinkConfig, characteristic: Uuid) -> Self {
        Self {
            adapter,
            config,
            characteristic,
            links: RwLock::new(HashMap::new()),
            connecting: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn write_type(&self) -> WriteType {
        if self.config.write_with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        }
    }

    async fn open_peripheral(&self, peripheral: &Peripheral, address: PeripheralAddress) -> Result<Characteristic> {
        if !peripheral.is_connected().await.unwrap_or(false) {
            peripheral
                .connect()
                .await
                .map_err(|e| BleLinkError::ConnectionFailed(e.to_string()))?;
        }

        if let Err(e) = peripheral.discover_services().await {
            Self::close_quietly(peripheral, address).await;
            return Err(BleLinkError::ServiceDiscoveryFailed(e.to_string()));
        }

        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == self.characteristic);

        match characteristic {
            Some(characteristic) => Ok(characteristic),
            None => {
                Self::close_quietly(peripheral, address).await;
                Err(BleLinkError::CharacteristicNotFound {
                    characteristic: self.characteristic.to_string(),
                })
            }
        }
    }

    async fn close_quietly(peripheral: &Peripheral, address: PeripheralAddress) {
        if let Err(e) = peripheral.disconnect().await {
            warn!("Failed to disconnect from {}: {}", address, e);
        }
    }

    fn spawn_forwarder(
        &self,
        connection_id: ConnectionId,
        address: PeripheralAddress,
        peripheral: &Peripheral,
        notifications: NotificationStream,
        events: LinkEventSender,
    ) -> JoinHandle<()> {
        let adapter = self.adapter.clone();
        let peripheral_id = peripheral.id();
        let characteristic = self.characteristic;

        tokio::spawn(async move {
            let watch_disconnect = async move { adapter.disconnected(peripheral_id).await };
            forward_notifications(
                connection_id,
                address,
                characteristic,
                notifications,
                watch_disconnect,
                events,
            )
            .await;
        })
    }
}

/// Forward notifications until the stream ends or the adapter reports the link gone
///
/// A failing disconnect watch is logged and ignored; only the notification stream
/// ending or a confirmed disconnect ends the link.
async fn forward_notifications<S, W>(
    connection_id: ConnectionId,
    address: PeripheralAddress,
    characteristic: Uuid,
    mut notifications: S,
    watch_disconnect: W,
    events: LinkEventSender,
) where
    S: Stream<Item = ValueNotification> + Unpin,
    W: Future<Output = Result<()>>,
{
    tokio::pin!(watch_disconnect);
    let mut watching = true;

    loop {
        tokio::select! {
            notification = notifications.next() => match notification {
                Some(data) if data.uuid == characteristic => {
                    let event = LinkEvent::Notification(RawNotification {
                        connection_id,
                        origin: address,
                        value: data.value,
                    });
                    if events.send(event).await.is_err() {
                        debug!("Notification receiver for {} closed", address);
                        return;
                    }
                }
                Some(_) => {}
                None => break,
            },
            watched = &mut watch_disconnect, if watching => match watched {
                Ok(()) => break,
                Err(e) => {
                    warn!("Cannot watch {} for disconnects: {}", address, e);
                    watching = false;
                }
            },
        }
    }

    info!("Link to {} dropped", address);
    let _ = events
        .send(LinkEvent::Disconnected {
            connection_id,
            address,
        })
        .await;
}

#[async_trait]
impl PeripheralLink for BleLink {
    async fn connect(
        &self,
        address: PeripheralAddress,
        role: PeripheralRole,
    ) -> std::result::Result<Connection, ConnectError> {
        let peripheral = self.adapter.find_peripheral(address).await?;

        // Visible to `abort` while the connect is in flight
        self.connecting
            .write()
            .await
            .insert(address, peripheral.clone());
        let characteristic = match self.open_peripheral(&peripheral, address).await {
            Ok(characteristic) => characteristic,
            Err(e) => {
                self.connecting.write().await.remove(&address);
                return Err(e.into());
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.links.write().await.insert(
            id,
            OpenLink {
                address,
                peripheral,
                characteristic,
                forwarder: None,
            },
        );
        self.connecting.write().await.remove(&address);

        info!("Connected to {} as {}", address, role);
        Ok(Connection::connected(id, address, role, self.characteristic))
    }

    async fn disconnect(&self, connection: &mut Connection) {
        if connection.state() == ConnectionState::Disconnected {
            debug!("Disconnect of {} skipped, already closed", connection.address());
            return;
        }
        connection.mark_disconnecting();

        let link = self.links.write().await.remove(&connection.id());
        if let Some(mut link) = link {
            link.stop_forwarding();
            if let Err(e) = link.peripheral.disconnect().await {
                error!("Failed to disconnect from {}: {}", connection.address(), e);
            }
        }

        connection.mark_disconnected();
        info!("Disconnected from {}", connection.address());
    }

    async fn subscribe(
        &self,
        connection: &Connection,
        events: LinkEventSender,
    ) -> std::result::Result<(), ConnectError> {
        let mut links = self.links.write().await;
        let link = links
            .get_mut(&connection.id())
            .ok_or_else(|| ConnectError::SubscribeFailed(BleLinkError::NotConnected.to_string()))?;

        let notifications = link
            .peripheral
            .notifications()
            .await
            .map_err(|e| BleLinkError::NotificationStreamFailed(e.to_string()))?;
        link.peripheral
            .subscribe(&link.characteristic)
            .await
            .map_err(|e| BleLinkError::SubscriptionFailed(e.to_string()))?;

        link.stop_forwarding();
        link.forwarder = Some(self.spawn_forwarder(
            connection.id(),
            connection.address(),
            &link.peripheral,
            notifications,
            events,
        ));

        debug!("Subscribed to notifications from {}", connection.address());
        Ok(())
    }

    async fn unsubscribe(&self, connection: &Connection) {
        let mut links = self.links.write().await;
        if let Some(link) = links.get_mut(&connection.id()) {
            link.stop_forwarding();
            if let Err(e) = link.peripheral.unsubscribe(&link.characteristic).await {
                warn!("Failed to unsubscribe from {}: {}", connection.address(), e);
            }
        }
    }

    async fn write(&self, connection: &Connection, payload: &[u8]) -> std::result::Result<(), WriteError> {
        let links = self.links.read().await;
        let link = links
            .get(&connection.id())
            .ok_or(WriteError::Disconnected)?;

        link.peripheral
            .write(&link.characteristic, payload, self.write_type())
            .await
            .map_err(|e| BleLinkError::WriteFailed(e.to_string()))?;

        debug!("Wrote {} bytes to {}", payload.len(), connection.address());
        Ok(())
    }

    async fn abort(&self, address: PeripheralAddress) {
        let pending = self.connecting.write().await.remove(&address);
        let open: Vec<OpenLink> = {
            let mut links = self.links.write().await;
            let ids: Vec<ConnectionId> = links
                .iter()
                .filter(|(_, link)| link.address == address)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter().filter_map(|id| links.remove(&id)).collect()
        };

        if pending.is_none() && open.is_empty() {
            debug!("Nothing to abort for {}", address);
            return;
        }

        warn!("Aborting link to {}", address);
        if let Some(peripheral) = pending {
            Self::close_quietly(&peripheral, address).await;
        }
        for mut link in open {
            link.stop_forwarding();
            Self::close_quietly(&link.peripheral, address).await;
        }
    }
}
