//! Conversions between gateway addresses and btleplug addresses

use blegate_core::PeripheralAddress;
use btleplug::api::BDAddr;

pub fn to_bdaddr(address: PeripheralAddress) -> BDAddr {
    BDAddr::from(address.into_inner())
}

pub fn from_bdaddr(address: BDAddr) -> PeripheralAddress {
    PeripheralAddress::new(address.into_inner())
}
