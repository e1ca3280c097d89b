//! Bluetooth Low Energy link for the blegate gateway
//!
//! This crate provides [`BleLink`], the btleplug implementation of the
//! `PeripheralLink` trait from `blegate-core`.
//!
//! ## Architecture
//!
//! - [`config`] - adapter selection, scan timeout and write type
//! - [`error`] - BLE errors and their mapping onto gateway connect/write errors
//! - [`discovery`] - adapter initialization and peripheral lookup by hardware address
//! - [`link`] - connect, subscribe, write and disconnect against one peripheral
//!
//! ## Usage
//!
//! ```rust,no_run
//! use blegate_ble::{BleLink, BleLinkConfig};
//! use blegate_core::DEFAULT_CHARACTERISTIC_UUID;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BleLinkConfig::new().with_adapter_index(0);
//! let link = BleLink::open(config, DEFAULT_CHARACTERISTIC_UUID).await?;
//! # let _ = link;
//! # Ok(())
//! # }
//! ```
//!
//! The link never owns more than what the caller asks for. Serializing access to the
//! single radio is the runtime's job.

mod address;
pub mod config;
pub mod discovery;
pub mod error;
pub mod link;

pub use address::{from_bdaddr, to_bdaddr};
pub use config::BleLinkConfig;
pub use discovery::BleAdapter;
pub use error::{BleLinkError, Result};
pub use link::BleLink;
