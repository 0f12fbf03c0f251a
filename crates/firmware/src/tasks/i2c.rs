//! I2C task

use super::{read_instance, read_pin};
use crate::error::HandlerError;
use crate::hal::{I2cDriver, I2cError};
use crate::task::{StateCell, Task, TaskState};
use protocol::params::I2C_INSTANCES;
use protocol::{Packet, PacketType, Status};
use std::sync::Arc;
use std::time::Duration;

pub struct I2cTask {
    state: Arc<StateCell>,
    driver: Box<dyn I2cDriver>,
    timeout_us: u32,
    default_timeout_us: u32,
}

impl I2cTask {
    pub fn new(driver: Box<dyn I2cDriver>, timeout_us: u32) -> Self {
        Self {
            state: StateCell::new(),
            driver,
            timeout_us,
            default_timeout_us: timeout_us,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_micros(self.timeout_us as u64)
    }
}

fn instance(request: &Packet) -> Result<u8, HandlerError> {
    read_instance(request, 0, I2C_INSTANCES, "i2c instance")
}

fn failure_status(err: I2cError) -> Status {
    match err {
        I2cError::Nack => Status::I2cNack,
        I2cError::Timeout => Status::I2cTimeout,
    }
}

impl Task for I2cTask {
    fn name(&self) -> &'static str {
        "i2c"
    }

    fn state(&self) -> &StateCell {
        &self.state
    }

    fn init(&mut self) {
        self.timeout_us = self.default_timeout_us;
        self.state.set(TaskState::Running);
    }

    fn handle(&mut self, request: &Packet, response: &mut Packet) -> Result<(), HandlerError> {
        let Ok(packet_type) = request.packet_type() else {
            return Ok(());
        };

        match packet_type {
            PacketType::I2cInit => {
                let inst = instance(request)?;
                let sda = read_pin(request, 1)?;
                let scl = read_pin(request, 2)?;
                let freq_hz = request.read_u32(3)?;
                self.driver.init(inst, sda, scl, freq_hz);
                response.append_bytes(&[inst, sda, scl])?;
                response.append_u32(freq_hz)?;
            }
            PacketType::I2cDeinit => {
                let inst = instance(request)?;
                let sda = read_pin(request, 1)?;
                let scl = read_pin(request, 2)?;
                self.driver.deinit(inst, sda, scl);
                response.append_bytes(&[inst, sda, scl])?;
            }
            PacketType::I2cSetFreq => {
                let inst = instance(request)?;
                let freq_hz = request.read_u32(1)?;
                self.driver.set_frequency(inst, freq_hz);
                response.append_u8(inst)?;
                response.append_u32(freq_hz)?;
            }
            PacketType::I2cSetTimeout => {
                self.timeout_us = request.read_u32(0)?;
                response.append_u32(self.timeout_us)?;
            }
            PacketType::I2cWrite => {
                let inst = instance(request)?;
                let addr = request.read_u8(1)?;
                let nostop = request.read_u8(3)? != 0;
                let len = request.read_u8(2)? as usize;
                let data = request.read_bytes(4, len)?;
                let timeout = self.timeout();
                if let Err(e) = self.driver.write(inst, addr, data, nostop, timeout) {
                    response.set_status(failure_status(e));
                }
            }
            PacketType::I2cRead => {
                let inst = instance(request)?;
                let addr = request.read_u8(1)?;
                let len = request.read_u8(2)? as usize;
                let nostop = request.read_u8(3)? != 0;
                if len > response.free_payload_slots() {
                    response.set_status(Status::I2cBufOverflow);
                    return Ok(());
                }
                let timeout = self.timeout();
                match self.driver.read(
                    inst,
                    addr,
                    &mut response.spare_payload_mut()[..len],
                    nostop,
                    timeout,
                ) {
                    Ok(n) => response.grow_payload(n)?,
                    Err(e) => response.set_status(failure_status(e)),
                }
            }
            _ => {}
        }
        Ok(())
    }
}
