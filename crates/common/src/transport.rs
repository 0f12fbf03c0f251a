//! USB transport seams
//!
//! [`UsbTransport`] is the host view of one bridge device: bulk transfers on
//! the Data and Event interfaces. [`CdcPort`] is the device view of the same
//! link as exposed by its USB device stack. Real hardware sits behind these
//! traits on each side; [`crate::loopback`] connects the two in memory.

use crate::error::TransportError;
use protocol::Interface;
use std::time::Duration;

/// Host side of a bridge link
pub trait UsbTransport: Send + Sync {
    /// Bulk write to the interface's OUT endpoint
    fn write(&self, iface: Interface, data: &[u8], timeout: Duration)
    -> Result<usize, TransportError>;

    /// Bulk read from the interface's IN endpoint
    ///
    /// `None` waits without a deadline.
    fn read(
        &self,
        iface: Interface,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, TransportError>;

    /// Clear a halt condition on one endpoint
    fn clear_halt(&self, endpoint: u8) -> Result<(), TransportError>;
}

/// Bus state changes reported by the device stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    Mounted,
    Unmounted,
    Suspended,
    Resumed,
}

/// Device side of a bridge link
pub trait CdcPort: Send + Sync {
    /// Service the device stack, returning the next bus event if one arrives
    /// within `timeout`
    fn poll_event(&self, timeout: Duration) -> Option<BusEvent>;

    /// Receive one frame from the host on the interface's OUT endpoint
    fn read(&self, iface: Interface, buf: &mut [u8], timeout: Duration)
    -> Result<usize, TransportError>;

    /// Queue bytes for the host; may accept fewer bytes than offered
    fn write(&self, iface: Interface, data: &[u8]) -> Result<usize, TransportError>;

    /// Push queued bytes to the host
    fn write_flush(&self, iface: Interface) -> Result<(), TransportError>;

    /// Drop any unread host data
    fn read_flush(&self, iface: Interface);
}
