//! Peripheral tasks
//!
//! One task per peripheral family. Each decodes the request payload, drives
//! its hardware through [`crate::hal`] and appends results to the response.

mod analog;
mod gpio;
mod i2c;
mod serial;
mod spi;

pub use analog::AnalogTask;
pub use gpio::GpioTask;
pub use i2c::I2cTask;
pub use serial::SerialTask;
pub use spi::SpiTask;

use crate::error::HandlerError;
use protocol::Packet;
use protocol::params::TARGET_PINS_COUNT;

/// Read a hardware instance number and check it against `count`
fn read_instance(
    request: &Packet,
    offset: usize,
    count: u8,
    what: &'static str,
) -> Result<u8, HandlerError> {
    let instance = request.read_u8(offset)?;
    if instance >= count {
        return Err(HandlerError::invalid(what, instance));
    }
    Ok(instance)
}

/// Read a GPIO number and check it exists on the target
fn read_pin(request: &Packet, offset: usize) -> Result<u8, HandlerError> {
    let pin = request.read_u8(offset)?;
    if pin >= TARGET_PINS_COUNT {
        return Err(HandlerError::invalid("pin", pin));
    }
    Ok(pin)
}

/// Read a `len`-prefixed data block: the length byte at `offset`, data after it
fn read_block(request: &Packet, offset: usize) -> Result<&[u8], HandlerError> {
    let len = request.read_u8(offset)? as usize;
    Ok(request.read_bytes(offset + 1, len)?)
}
