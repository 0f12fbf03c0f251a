//! Lazy-init plumbing shared by the peripheral wrappers
//!
//! A peripheral object talks to whichever bridge channel it is attached to.
//! The first request on a channel sends the peripheral's `*_INIT` command;
//! later requests on that channel skip it.

pub mod analog;
pub mod gpio;
pub mod i2c;
pub mod serial;
pub mod spi;
pub mod system;

pub use analog::{AnalogIn, AnalogOut};
pub use gpio::Gpio;
pub use i2c::I2c;
pub use serial::{Serial, SerialFormat};
pub use spi::{Spi, SpiFormat, SpiPins};
pub use system::System;

use crate::error::{HostError, Result};
use crate::manager::TransportManager;
use common::lock;
use protocol::usb::MAX_USB_DEVICES;
use protocol::params::TARGET_PINS_COUNT;
use protocol::{Packet, PacketType};
use std::sync::Mutex;
use tracing::warn;

#[derive(Debug, Default)]
struct BindingState {
    channel: u8,
    /// One bit per channel that has seen the init command
    initialized: u8,
}

/// Channel a peripheral is attached to and the channels it has initialized
#[derive(Debug, Default)]
pub struct ChannelBinding {
    state: Mutex<BindingState>,
}

impl ChannelBinding {
    /// Binding attached to channel 0
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, channel: u8) -> Result<()> {
        if channel as usize >= MAX_USB_DEVICES {
            return Err(HostError::InvalidChannel(channel));
        }
        lock(&self.state).channel = channel;
        Ok(())
    }

    pub fn channel(&self) -> u8 {
        lock(&self.state).channel
    }

    pub fn is_initialized(&self, channel: u8) -> bool {
        channel < 8 && lock(&self.state).initialized & (1 << channel) != 0
    }

    pub fn mark_initialized(&self, channel: u8) {
        if channel < 8 {
            lock(&self.state).initialized |= 1 << channel;
        }
    }

    /// Forget the init on `channel`, after a deinit
    pub fn clear(&self, channel: u8) {
        if channel < 8 {
            lock(&self.state).initialized &= !(1 << channel);
        }
    }
}

/// A device-side peripheral driven through a [`TransportManager`]
pub trait Peripheral {
    fn manager(&self) -> &TransportManager;

    fn binding(&self) -> &ChannelBinding;

    /// Send this peripheral's init command on `channel`
    fn initialize(&self, channel: u8) -> Result<()>;

    /// Direct later requests to `channel`
    fn attach(&self, channel: u8) -> Result<()> {
        self.binding().attach(channel)
    }

    fn channel(&self) -> u8 {
        self.binding().channel()
    }

    /// Initialize on the attached channel unless already done; returns the channel
    fn ensure_initialized(&self) -> Result<u8> {
        let binding = self.binding();
        let channel = binding.channel();
        if !binding.is_initialized(channel) {
            self.initialize(channel)?;
            binding.mark_initialized(channel);
        }
        Ok(channel)
    }

    /// Send `request` on the attached channel after making sure it is initialized
    fn request(&self, request: Packet) -> Result<Packet> {
        let channel = self.ensure_initialized()?;
        self.manager().request(channel, request)
    }
}

/// Byte-oriented view of a bus, for code that should not care which one
pub trait ByteStream {
    /// Bring the bus up
    fn begin(&self) -> Result<()>;

    fn write(&self, data: &[u8]) -> Result<usize>;

    fn read(&self, buf: &mut [u8]) -> Result<usize>;

    fn flush(&self) -> Result<()>;
}

pub(crate) fn check_pin(pin: u8) -> Result<u8> {
    if pin >= TARGET_PINS_COUNT {
        return Err(HostError::invalid("pin", pin));
    }
    Ok(pin)
}

pub(crate) fn check_instance(instance: u8, count: u8) -> Result<u8> {
    if instance >= count {
        return Err(HostError::invalid("instance", instance));
    }
    Ok(instance)
}

/// Build a command packet from `payload`
pub(crate) fn command(packet_type: PacketType, payload: &[u8]) -> Result<Packet> {
    let mut pkt = Packet::command(packet_type);
    pkt.append_bytes(payload)?;
    Ok(pkt)
}

/// Log when an init response does not echo what was sent
pub(crate) fn check_echo(what: &str, sent: &[u8], response: &Packet) {
    let received = response.payload();
    let n = sent.len().min(received.len());
    if received.len() < sent.len() || sent[..n] != received[..n] {
        warn!(
            "Unexpected {} response: sent {:02x?}, received {:02x?}",
            what, sent, received
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_bits_per_channel() {
        let binding = ChannelBinding::new();
        assert_eq!(binding.channel(), 0);
        assert!(!binding.is_initialized(0));

        binding.mark_initialized(0);
        binding.attach(3).unwrap();
        assert_eq!(binding.channel(), 3);
        assert!(binding.is_initialized(0));
        assert!(!binding.is_initialized(3));

        binding.clear(0);
        assert!(!binding.is_initialized(0));
    }

    #[test]
    fn test_attach_rejects_out_of_range_channel() {
        let binding = ChannelBinding::new();
        assert!(matches!(
            binding.attach(8),
            Err(HostError::InvalidChannel(8))
        ));
        assert_eq!(binding.channel(), 0);
    }

    #[test]
    fn test_argument_checks() {
        assert_eq!(check_pin(29).unwrap(), 29);
        assert!(check_pin(30).is_err());
        assert!(check_instance(1, 2).is_ok());
        assert!(check_instance(2, 2).is_err());
    }
}
