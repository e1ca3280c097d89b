//! Adapter selection and peripheral lookup by address
//!
//! The gateway addresses peripherals by hardware address, never by advertised name.
//! A peripheral already known to the adapter is returned directly; otherwise the
//! adapter scans until the address shows up or the scan timeout runs out.

use std::time::Duration;

use blegate_core::PeripheralAddress;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::address::{from_bdaddr, to_bdaddr};
use crate::config::BleLinkConfig;
use crate::error::{BleLinkError, Result};

// ----------------------------------------------------------------------------
// Adapter
// ----------------------------------------------------------------------------

/// The host adapter the gateway drives
#[derive(Clone)]
pub struct BleAdapter {
    adapter: Adapter,
    scan_timeout: Duration,
}

impl BleAdapter {
    /// Initialize the configured BLE adapter
    pub async fn initialize(config: &BleLinkConfig) -> Result<Self> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;

        if adapters.is_empty() {
            return Err(BleLinkError::AdapterNotAvailable);
        }

        let count = adapters.len();
        let adapter = adapters
            .into_iter()
            .nth(config.adapter_index)
            .ok_or(BleLinkError::AdapterIndexOutOfRange {
                index: config.adapter_index,
                count,
            })?;

        match adapter.adapter_info().await {
            Ok(name) => info!("BLE adapter initialized: {}", name),
            Err(_) => info!("BLE adapter {} initialized", config.adapter_index),
        }

        Ok(Self {
            adapter,
            scan_timeout: config.scan_timeout(),
        })
    }

    /// Raw adapter handle
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Locate a peripheral by address, scanning if the adapter has not seen it yet
    pub async fn find_peripheral(&self, address: PeripheralAddress) -> Result<Peripheral> {
        if let Some(peripheral) = self.known_peripheral(address).await? {
            return Ok(peripheral);
        }

        debug!("Peripheral {} not cached, scanning", address);
        let mut events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;

        let wanted = to_bdaddr(address);
        let search = async {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) = event
                {
                    if let Some(peripheral) = self.peripheral_if_matches(&id, wanted).await {
                        return Some(peripheral);
                    }
                }
            }
            None
        };
        let found = timeout(self.scan_timeout, search).await;

        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop BLE scan: {}", e);
        }

        match found {
            Ok(Some(peripheral)) => {
                info!("Discovered peripheral {}", address);
                Ok(peripheral)
            }
            // The event stream can miss devices found before it was opened
            _ => self
                .known_peripheral(address)
                .await?
                .ok_or_else(|| BleLinkError::PeripheralNotFound {
                    address: address.to_string(),
                }),
        }
    }

    async fn known_peripheral(&self, address: PeripheralAddress) -> Result<Option<Peripheral>> {
        let wanted = to_bdaddr(address);
        let peripherals = self.adapter.peripherals().await?;
        Ok(peripherals.into_iter().find(|p| p.address() == wanted))
    }

    async fn peripheral_if_matches(
        &self,
        id: &PeripheralId,
        wanted: btleplug::api::BDAddr,
    ) -> Option<Peripheral> {
        let peripheral = self.adapter.peripheral(id).await.ok()?;
        if peripheral.address() == wanted {
            debug!("Scan matched {}", from_bdaddr(wanted));
            Some(peripheral)
        } else {
            None
        }
    }

    /// Watch for the adapter reporting `id` as disconnected
    ///
    /// Resolves to an error when the adapter's event stream cannot be opened or ends,
    /// which says nothing about the peripheral itself.
    pub async fn disconnected(&self, id: PeripheralId) -> Result<()> {
        let mut events = self.adapter.events().await?;
        while let Some(event) = events.next().await {
            if let CentralEvent::DeviceDisconnected(gone) = event {
                if gone == id {
                    return Ok(());
                }
            }
        }
        Err(BleLinkError::AdapterEventsEnded)
    }
}
