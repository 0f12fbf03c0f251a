use crate::hal::{SpiDriver, SpiFormat, SpiPins};
use common::lock;
use protocol::params::SPI_INSTANCES;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Fastest SPI clock the board can generate
const MAX_FREQ_HZ: u32 = 62_500_000;

#[derive(Debug, Default)]
struct Bus {
    pins: Option<SpiPins>,
    freq_hz: u32,
    format: Option<SpiFormat>,
    /// MOSI wired back to MISO
    loopback: bool,
    written: Vec<u8>,
    miso: VecDeque<u8>,
    write_limit: Option<usize>,
}

impl Bus {
    fn clock_in(&mut self, out: u8) -> u8 {
        if self.loopback {
            out
        } else {
            self.miso.pop_front().unwrap_or(0xff)
        }
    }
}

#[derive(Clone)]
pub struct SimSpi {
    buses: Arc<Mutex<Vec<Bus>>>,
}

impl Default for SimSpi {
    fn default() -> Self {
        let buses = (0..SPI_INSTANCES).map(|_| Bus::default()).collect();
        Self {
            buses: Arc::new(Mutex::new(buses)),
        }
    }
}

impl SimSpi {
    pub fn set_loopback(&self, instance: u8, on: bool) {
        lock(&self.buses)[instance as usize].loopback = on;
    }

    /// Bytes the slave will return on the following transfers
    pub fn queue_miso(&self, instance: u8, data: &[u8]) {
        lock(&self.buses)[instance as usize].miso.extend(data);
    }

    /// Everything clocked out on `instance` so far
    pub fn written(&self, instance: u8) -> Vec<u8> {
        lock(&self.buses)[instance as usize].written.clone()
    }

    /// Cap how many bytes one write accepts
    pub fn limit_writes(&self, instance: u8, limit: Option<usize>) {
        lock(&self.buses)[instance as usize].write_limit = limit;
    }

    pub fn is_initialized(&self, instance: u8) -> bool {
        lock(&self.buses)[instance as usize].pins.is_some()
    }

    pub fn frequency(&self, instance: u8) -> u32 {
        lock(&self.buses)[instance as usize].freq_hz
    }

    pub fn format(&self, instance: u8) -> Option<SpiFormat> {
        lock(&self.buses)[instance as usize].format
    }
}

impl SpiDriver for SimSpi {
    fn init(&mut self, instance: u8, pins: SpiPins, freq_hz: u32) -> u32 {
        let mut buses = lock(&self.buses);
        let bus = &mut buses[instance as usize];
        bus.pins = Some(pins);
        bus.freq_hz = freq_hz.min(MAX_FREQ_HZ);
        bus.freq_hz
    }

    fn deinit(&mut self, instance: u8) {
        let mut buses = lock(&self.buses);
        let bus = &mut buses[instance as usize];
        bus.pins = None;
        bus.format = None;
    }

    fn set_frequency(&mut self, instance: u8, freq_hz: u32) -> u32 {
        let mut buses = lock(&self.buses);
        let bus = &mut buses[instance as usize];
        bus.freq_hz = freq_hz.min(MAX_FREQ_HZ);
        bus.freq_hz
    }

    fn set_format(&mut self, instance: u8, format: SpiFormat) {
        lock(&self.buses)[instance as usize].format = Some(format);
    }

    fn write(&mut self, instance: u8, data: &[u8]) -> usize {
        let mut buses = lock(&self.buses);
        let bus = &mut buses[instance as usize];
        let n = bus.write_limit.map_or(data.len(), |limit| limit.min(data.len()));
        bus.written.extend_from_slice(&data[..n]);
        n
    }

    fn read(&mut self, instance: u8, fill: u8, buf: &mut [u8]) -> usize {
        let mut buses = lock(&self.buses);
        let bus = &mut buses[instance as usize];
        for byte in buf.iter_mut() {
            bus.written.push(fill);
            *byte = bus.clock_in(fill);
        }
        buf.len()
    }

    fn transfer(&mut self, instance: u8, tx: &[u8], rx: &mut [u8]) -> usize {
        let mut buses = lock(&self.buses);
        let bus = &mut buses[instance as usize];
        let n = tx.len().min(rx.len());
        for (out, slot) in tx.iter().zip(rx.iter_mut()) {
            bus.written.push(*out);
            *slot = bus.clock_in(*out);
        }
        n
    }
}
