//! Bridge enumeration

use crate::error::{HostError, Result};
use rusb::{Context, Device, UsbContext};
use tracing::debug;

/// An attached bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeInfo {
    /// Ordinal among attached bridges, the logical channel
    pub index: u8,
    pub bus_number: u8,
    pub address: u8,
    pub serial_number: Option<String>,
}

fn matching_devices(
    context: &Context,
    vendor_id: u16,
    product_id: u16,
) -> Result<Vec<Device<Context>>> {
    let mut found = Vec::new();
    for device in context.devices()?.iter() {
        let Ok(descriptor) = device.device_descriptor() else {
            debug!(
                "Skipping device {}:{} without descriptor",
                device.bus_number(),
                device.address()
            );
            continue;
        };
        if descriptor.vendor_id() == vendor_id && descriptor.product_id() == product_id {
            found.push(device);
        }
    }
    Ok(found)
}

/// List attached bridges in enumeration order
pub fn list_bridges(context: &Context, vendor_id: u16, product_id: u16) -> Result<Vec<BridgeInfo>> {
    let devices = matching_devices(context, vendor_id, product_id)?;
    Ok(devices
        .iter()
        .enumerate()
        .map(|(index, device)| {
            let serial_number = device.open().ok().and_then(|handle| {
                let descriptor = device.device_descriptor().ok()?;
                let idx = descriptor.serial_number_string_index()?;
                handle.read_string_descriptor_ascii(idx).ok()
            });
            BridgeInfo {
                index: index as u8,
                bus_number: device.bus_number(),
                address: device.address(),
                serial_number,
            }
        })
        .collect())
}

/// The `index`th attached bridge
pub fn find_bridge(
    context: &Context,
    vendor_id: u16,
    product_id: u16,
    index: u8,
) -> Result<Device<Context>> {
    matching_devices(context, vendor_id, product_id)?
        .into_iter()
        .nth(index as usize)
        .ok_or(HostError::DeviceNotFound { index })
}
