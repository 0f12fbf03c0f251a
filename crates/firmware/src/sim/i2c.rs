use crate::hal::{I2cDriver, I2cError};
use common::lock;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Register space of a simulated slave
const SLAVE_MEMORY: usize = 256;

#[derive(Debug)]
struct Slave {
    memory: Vec<u8>,
    pointer: usize,
}

#[derive(Debug, Default)]
struct Bus {
    slaves: HashMap<u8, Slave>,
    stalled: HashSet<u8>,
    frequencies: HashMap<u8, u32>,
    last_timeout: Option<Duration>,
}

/// I2C bus shared by both controller instances
///
/// Slaves behave like small EEPROMs: the first byte written sets the register
/// pointer, further bytes are stored from there and reads continue from it.
#[derive(Clone, Default)]
pub struct SimI2c {
    bus: Arc<Mutex<Bus>>,
}

impl SimI2c {
    pub fn add_device(&self, addr: u8) {
        lock(&self.bus).slaves.insert(
            addr,
            Slave {
                memory: vec![0; SLAVE_MEMORY],
                pointer: 0,
            },
        );
    }

    /// Make transfers to `addr` hold the bus until they time out
    pub fn stall(&self, addr: u8) {
        lock(&self.bus).stalled.insert(addr);
    }

    pub fn memory(&self, addr: u8) -> Option<Vec<u8>> {
        lock(&self.bus).slaves.get(&addr).map(|s| s.memory.clone())
    }

    pub fn frequency(&self, instance: u8) -> Option<u32> {
        lock(&self.bus).frequencies.get(&instance).copied()
    }

    /// Timeout passed with the most recent transfer
    pub fn last_timeout(&self) -> Option<Duration> {
        lock(&self.bus).last_timeout
    }

    fn slave<'a>(bus: &'a mut Bus, addr: u8, timeout: Duration) -> Result<&'a mut Slave, I2cError> {
        bus.last_timeout = Some(timeout);
        if bus.stalled.contains(&addr) {
            return Err(I2cError::Timeout);
        }
        bus.slaves.get_mut(&addr).ok_or(I2cError::Nack)
    }
}

impl I2cDriver for SimI2c {
    fn init(&mut self, instance: u8, _sda: u8, _scl: u8, freq_hz: u32) {
        lock(&self.bus).frequencies.insert(instance, freq_hz);
    }

    fn deinit(&mut self, instance: u8, _sda: u8, _scl: u8) {
        lock(&self.bus).frequencies.remove(&instance);
    }

    fn set_frequency(&mut self, instance: u8, freq_hz: u32) -> u32 {
        lock(&self.bus).frequencies.insert(instance, freq_hz);
        freq_hz
    }

    fn write(
        &mut self,
        _instance: u8,
        addr: u8,
        data: &[u8],
        _nostop: bool,
        timeout: Duration,
    ) -> Result<usize, I2cError> {
        let mut bus = lock(&self.bus);
        let slave = Self::slave(&mut bus, addr, timeout)?;
        if let Some((&reg, rest)) = data.split_first() {
            slave.pointer = reg as usize;
            for byte in rest {
                slave.memory[slave.pointer] = *byte;
                slave.pointer = (slave.pointer + 1) % SLAVE_MEMORY;
            }
        }
        Ok(data.len())
    }

    fn read(
        &mut self,
        _instance: u8,
        addr: u8,
        buf: &mut [u8],
        _nostop: bool,
        timeout: Duration,
    ) -> Result<usize, I2cError> {
        let mut bus = lock(&self.bus);
        let slave = Self::slave(&mut bus, addr, timeout)?;
        for byte in buf.iter_mut() {
            *byte = slave.memory[slave.pointer];
            slave.pointer = (slave.pointer + 1) % SLAVE_MEMORY;
        }
        Ok(buf.len())
    }
}
