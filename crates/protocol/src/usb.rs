//! USB identity of the bridge device
//!
//! The device exposes two CDC-style interface pairs. The Data pair carries
//! command/response traffic, the Event pair carries unsolicited frames.

/// Vendor ID shared by all bridge devices
pub const VENDOR_ID: u16 = 0xcafe;

/// Product ID shared by all bridge devices
pub const PRODUCT_ID: u16 = 0x4002;

/// Maximum number of bridge devices addressed by one host
pub const MAX_USB_DEVICES: usize = 8;

/// USB interface numbers claimed by the host, in order
pub const CLAIMED_INTERFACES: [u8; 4] = [0, 1, 2, 3];

/// Logical interface of a bridge device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interface {
    /// Synchronous command/response traffic
    Data,
    /// Device-to-host event frames
    Event,
}

impl Interface {
    /// CDC interface index as seen by the device stack
    pub const fn cdc_index(self) -> u8 {
        match self {
            Interface::Data => 0,
            Interface::Event => 1,
        }
    }

    /// Notification (interrupt IN) endpoint
    pub const fn notification_endpoint(self) -> u8 {
        match self {
            Interface::Data => 0x81,
            Interface::Event => 0x83,
        }
    }

    /// Bulk OUT endpoint
    pub const fn out_endpoint(self) -> u8 {
        match self {
            Interface::Data => 0x02,
            Interface::Event => 0x04,
        }
    }

    /// Bulk IN endpoint
    pub const fn in_endpoint(self) -> u8 {
        match self {
            Interface::Data => 0x82,
            Interface::Event => 0x84,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Interface::Data => "data",
            Interface::Event => "event",
        }
    }
}

impl std::fmt::Display for Interface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_directions() {
        for iface in [Interface::Data, Interface::Event] {
            assert_eq!(iface.in_endpoint() & 0x80, 0x80);
            assert_eq!(iface.notification_endpoint() & 0x80, 0x80);
            assert_eq!(iface.out_endpoint() & 0x80, 0);
            assert_eq!(iface.in_endpoint() & 0x7f, iface.out_endpoint());
        }
    }
}
