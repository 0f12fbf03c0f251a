//! Open bridge device

use crate::error::{HostError, Result};
use common::{TransportError, UsbTransport};
use protocol::Interface;
use protocol::usb::CLAIMED_INTERFACES;
use rusb::{Context, Device, DeviceHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// A claimed bridge device
///
/// Both CDC interface pairs are claimed on open and released on drop.
pub struct RusbTransport {
    handle: DeviceHandle<Context>,
    index: u8,
    claimed: Vec<u8>,
}

impl RusbTransport {
    /// Open `device` and claim the Data and Event interfaces
    pub fn open(device: Device<Context>, index: u8) -> Result<Self> {
        let handle = device.open().map_err(|e| {
            warn!("Failed to open bridge {}: {}", index, e);
            match e {
                rusb::Error::NoDevice | rusb::Error::NotFound => {
                    HostError::DeviceNotFound { index }
                }
                other => HostError::Usb(other),
            }
        })?;

        // Not supported on every platform; claiming reports the real failure
        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            debug!("Kernel driver auto-detach unavailable: {}", e);
        }

        let mut transport = Self {
            handle,
            index,
            claimed: Vec::with_capacity(CLAIMED_INTERFACES.len()),
        };
        for iface in CLAIMED_INTERFACES {
            transport.handle.claim_interface(iface).map_err(|e| {
                warn!("Failed to claim interface {} on bridge {}: {}", iface, index, e);
                HostError::Usb(e)
            })?;
            debug!("Claimed interface {} on bridge {}", iface, index);
            transport.claimed.push(iface);
        }

        Ok(transport)
    }

    pub fn index(&self) -> u8 {
        self.index
    }
}

impl Drop for RusbTransport {
    fn drop(&mut self) {
        for iface in self.claimed.drain(..) {
            if let Err(e) = self.handle.release_interface(iface) {
                debug!("Failed to release interface {}: {}", iface, e);
            }
        }
        debug!("Closed bridge {}", self.index);
    }
}

impl UsbTransport for RusbTransport {
    fn write(
        &self,
        iface: Interface,
        data: &[u8],
        timeout: Duration,
    ) -> std::result::Result<usize, TransportError> {
        self.handle
            .write_bulk(iface.out_endpoint(), data, timeout)
            .map_err(map_rusb_error)
    }

    fn read(
        &self,
        iface: Interface,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> std::result::Result<usize, TransportError> {
        // libusb treats a zero timeout as unlimited
        self.handle
            .read_bulk(iface.in_endpoint(), buf, timeout.unwrap_or(Duration::ZERO))
            .map_err(map_rusb_error)
    }

    fn clear_halt(&self, endpoint: u8) -> std::result::Result<(), TransportError> {
        self.handle.clear_halt(endpoint).map_err(map_rusb_error)
    }
}

/// Map rusb errors onto the transport error kinds the retry logic knows
pub fn map_rusb_error(err: rusb::Error) -> TransportError {
    match err {
        rusb::Error::Timeout => TransportError::Timeout,
        rusb::Error::Pipe => TransportError::Pipe,
        rusb::Error::NoDevice => TransportError::NoDevice,
        rusb::Error::Overflow => TransportError::Overflow,
        other => TransportError::Io(other.to_string()),
    }
}
