//! I2C master
//!
//! Bus failures come back as [`HostError::Peripheral`] carrying the device
//! status; [`HostError::return_code`] maps them to the classic `-1` (NACK)
//! and `-2` (timeout) codes.

use super::{ChannelBinding, Peripheral, check_echo, check_instance, check_pin, command};
use crate::error::{HostError, Result};
use crate::manager::TransportManager;
use common::lock;
use protocol::params::I2C_INSTANCES;
use protocol::{MAX_PAYLOAD_SIZE, PacketType};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const DEFAULT_FREQUENCY_HZ: u32 = 100_000;

/// Largest write after the `[inst, addr, len, nostop]` header
pub const MAX_WRITE: usize = MAX_PAYLOAD_SIZE - 4;

pub const MAX_READ: usize = MAX_PAYLOAD_SIZE;

/// One I2C controller on the bridge
pub struct I2c {
    manager: Arc<TransportManager>,
    binding: ChannelBinding,
    instance: u8,
    sda: u8,
    scl: u8,
    frequency_hz: Mutex<u32>,
}

impl I2c {
    pub fn new(manager: Arc<TransportManager>, instance: u8, sda: u8, scl: u8) -> Result<Self> {
        Ok(Self {
            manager,
            binding: ChannelBinding::new(),
            instance: check_instance(instance, I2C_INSTANCES)?,
            sda: check_pin(sda)?,
            scl: check_pin(scl)?,
            frequency_hz: Mutex::new(DEFAULT_FREQUENCY_HZ),
        })
    }

    pub fn frequency(&self, hz: u32) -> Result<()> {
        if hz == 0 {
            return Err(HostError::invalid("i2c frequency", 0u32));
        }
        let mut request = command(PacketType::I2cSetFreq, &[self.instance])?;
        request.append_u32(hz)?;
        let response = self.request(request.clone())?;
        check_echo("I2C_SET_FREQ", request.payload(), &response);
        *lock(&self.frequency_hz) = hz;
        Ok(())
    }

    /// Bus timeout for every controller on the device
    pub fn timeout(&self, timeout: Duration) -> Result<()> {
        let micros = u32::try_from(timeout.as_micros())
            .map_err(|_| HostError::invalid("i2c timeout", timeout.as_micros() as i64))?;
        let mut request = command(PacketType::I2cSetTimeout, &[])?;
        request.append_u32(micros)?;
        self.request(request)?;
        Ok(())
    }

    /// Write `data` to the slave at `address`; `nostop` holds the bus for a
    /// repeated start
    pub fn write(&self, address: u8, data: &[u8], nostop: bool) -> Result<()> {
        if data.len() > MAX_WRITE {
            return Err(HostError::invalid("i2c write length", data.len() as i64));
        }
        let mut request = command(
            PacketType::I2cWrite,
            &[self.instance, address, data.len() as u8, nostop as u8],
        )?;
        request.append_bytes(data)?;
        self.request(request)?;
        Ok(())
    }

    /// Read into `buf` from the slave at `address`; returns the bytes received
    pub fn read(&self, address: u8, buf: &mut [u8], nostop: bool) -> Result<usize> {
        if buf.len() > MAX_READ {
            return Err(HostError::invalid("i2c read length", buf.len() as i64));
        }
        let request = command(
            PacketType::I2cRead,
            &[self.instance, address, buf.len() as u8, nostop as u8],
        )?;
        let response = self.request(request)?;
        let data = response.payload();
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    /// Release the controller on the device
    pub fn deinit(&self) -> Result<()> {
        let channel = self.channel();
        let request = command(PacketType::I2cDeinit, &[self.instance, self.sda, self.scl])?;
        self.manager.request(channel, request)?;
        self.binding.clear(channel);
        Ok(())
    }
}

impl Peripheral for I2c {
    fn manager(&self) -> &TransportManager {
        &self.manager
    }

    fn binding(&self) -> &ChannelBinding {
        &self.binding
    }

    fn initialize(&self, channel: u8) -> Result<()> {
        let mut request = command(PacketType::I2cInit, &[self.instance, self.sda, self.scl])?;
        request.append_u32(*lock(&self.frequency_hz))?;
        let response = self.manager.request(channel, request.clone())?;
        check_echo("I2C_INIT", request.payload(), &response);
        Ok(())
    }
}
