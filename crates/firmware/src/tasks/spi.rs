//! SPI task

use super::{read_block, read_instance, read_pin};
use crate::error::HandlerError;
use crate::hal::{SpiDriver, SpiFormat, SpiPins};
use crate::task::{StateCell, Task};
use protocol::params::SPI_INSTANCES;
use protocol::{BitOrder, Packet, PacketType, Status};
use std::sync::Arc;

pub struct SpiTask {
    state: Arc<StateCell>,
    driver: Box<dyn SpiDriver>,
}

impl SpiTask {
    pub fn new(driver: Box<dyn SpiDriver>) -> Self {
        Self {
            state: StateCell::new(),
            driver,
        }
    }
}

fn instance(request: &Packet) -> Result<u8, HandlerError> {
    read_instance(request, 0, SPI_INSTANCES, "spi instance")
}

impl Task for SpiTask {
    fn name(&self) -> &'static str {
        "spi"
    }

    fn state(&self) -> &StateCell {
        &self.state
    }

    fn handle(&mut self, request: &Packet, response: &mut Packet) -> Result<(), HandlerError> {
        let Ok(packet_type) = request.packet_type() else {
            return Ok(());
        };

        match packet_type {
            PacketType::SpiInit => {
                let inst = instance(request)?;
                let pins = SpiPins {
                    sck: read_pin(request, 1)?,
                    tx: read_pin(request, 2)?,
                    rx: read_pin(request, 3)?,
                    cs: read_pin(request, 4)?,
                };
                let freq_hz = request.read_u32(5)?;
                let actual = self.driver.init(inst, pins, freq_hz);
                response.append_bytes(&[inst, pins.sck, pins.tx, pins.rx, pins.cs])?;
                response.append_u32(actual)?;
            }
            PacketType::SpiDeinit => {
                let inst = instance(request)?;
                self.driver.deinit(inst);
            }
            PacketType::SpiSetFreq => {
                let inst = instance(request)?;
                let freq_hz = request.read_u32(1)?;
                self.driver.set_frequency(inst, freq_hz);
            }
            PacketType::SpiWrite => {
                let inst = instance(request)?;
                let data = read_block(request, 1)?;
                if self.driver.write(inst, data) != data.len() {
                    response.set_status(Status::SpiLenMismatch);
                }
            }
            PacketType::SpiRead => {
                let inst = instance(request)?;
                let len = request.read_u8(1)? as usize;
                let fill = request.read_u8(2)?;
                if len > response.free_payload_slots() {
                    response.set_status(Status::SpiLenMismatch);
                    return Ok(());
                }
                let n = self
                    .driver
                    .read(inst, fill, &mut response.spare_payload_mut()[..len]);
                response.grow_payload(n)?;
                if n != len {
                    response.set_status(Status::SpiLenMismatch);
                }
            }
            PacketType::SpiTransfer => {
                let inst = instance(request)?;
                let data = read_block(request, 1)?;
                if data.len() > response.free_payload_slots() {
                    response.set_status(Status::Err);
                    return Ok(());
                }
                let n = self.driver.transfer(
                    inst,
                    data,
                    &mut response.spare_payload_mut()[..data.len()],
                );
                response.grow_payload(n)?;
                if n != data.len() {
                    response.set_status(Status::Err);
                }
            }
            PacketType::SpiSetFormat => {
                let inst = instance(request)?;
                let format = SpiFormat {
                    bits: request.read_u8(1)?,
                    cpol: request.read_u8(2)? != 0,
                    cpha: request.read_u8(3)? != 0,
                    order: BitOrder::try_from(request.read_u8(4)?)?,
                };
                if !(4..=16).contains(&format.bits) {
                    return Err(HandlerError::invalid("spi data bits", format.bits));
                }
                self.driver.set_format(inst, format);
            }
            _ => {}
        }
        Ok(())
    }
}
