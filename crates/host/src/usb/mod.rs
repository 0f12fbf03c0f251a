//! libusb access to bridge devices
//!
//! Bridges are told apart only by enumeration order: logical channel N is
//! the Nth attached device carrying the bridge VID/PID, counted from the
//! configured first index.

mod device;
mod discovery;

pub use device::{RusbTransport, map_rusb_error};
pub use discovery::{BridgeInfo, find_bridge, list_bridges};

use crate::config::UsbSettings;
use crate::error::{HostError, Result};
use crate::manager::Connector;
use common::UsbTransport;
use protocol::usb::MAX_USB_DEVICES;
use rusb::Context;
use std::sync::Arc;

/// Opens bridges through libusb
pub struct RusbConnector {
    context: Context,
    vendor_id: u16,
    product_id: u16,
    first_index: u8,
}

impl RusbConnector {
    pub fn new(vendor_id: u16, product_id: u16) -> Result<Self> {
        Ok(Self {
            context: Context::new()?,
            vendor_id,
            product_id,
            first_index: 0,
        })
    }

    /// Connector for the bridges selected by `[usb]` settings
    pub fn from_settings(settings: &UsbSettings) -> Result<Self> {
        let mut connector = Self::new(settings.vendor_id, settings.product_id)?;
        connector.first_index = settings.device_index;
        Ok(connector)
    }

    pub fn context(&self) -> &Context {
        &self.context
    }
}

impl Connector for RusbConnector {
    fn connect(&self, channel: u8) -> Result<Arc<dyn UsbTransport>> {
        if channel as usize >= MAX_USB_DEVICES {
            return Err(HostError::InvalidChannel(channel));
        }
        let index = self
            .first_index
            .checked_add(channel)
            .filter(|i| (*i as usize) < MAX_USB_DEVICES)
            .ok_or(HostError::InvalidChannel(channel))?;
        let device = find_bridge(&self.context, self.vendor_id, self.product_id, index)?;
        Ok(Arc::new(RusbTransport::open(device, index)?))
    }
}
