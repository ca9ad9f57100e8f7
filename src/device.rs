//! Device: an inverter discovered on the bus.

use crate::channel::Catalogue;

/// An inverter discovered via `CMD_GET_NET_START`. Created on discovery,
/// mutated only to attach its channel catalogue, retained for the lifetime
/// of the poller unless re-discovery is forced.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub src_addr: u16,
    pub serial: u32,
    pub device_type: [u8; 8],
    pub catalogue: Option<Catalogue>,
}

impl Device {
    pub fn new(src_addr: u16, serial: u32, device_type: [u8; 8]) -> Device {
        Device { src_addr, serial, device_type, catalogue: None }
    }

    pub fn attach_catalogue(&mut self, catalogue: Catalogue) {
        self.catalogue = Some(catalogue);
    }
}
