//! SPI master

use super::{
    ByteStream, ChannelBinding, Peripheral, check_echo, check_instance, check_pin, command,
};
use crate::error::{HostError, Result};
use crate::manager::TransportManager;
use common::lock;
use protocol::params::SPI_INSTANCES;
use protocol::{BitOrder, MAX_PAYLOAD_SIZE, PacketType};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Largest data block one request carries after `[inst, len]`
const MAX_BLOCK: usize = MAX_PAYLOAD_SIZE - 2;

pub const DEFAULT_FREQUENCY_HZ: u32 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiPins {
    pub sck: u8,
    pub mosi: u8,
    pub miso: u8,
    pub cs: u8,
}

/// Word size, clock mode (0..=3) and bit order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiFormat {
    pub bits: u8,
    pub mode: u8,
    pub order: BitOrder,
}

impl Default for SpiFormat {
    fn default() -> Self {
        Self {
            bits: 8,
            mode: 0,
            order: BitOrder::MsbFirst,
        }
    }
}

impl SpiFormat {
    fn validate(&self) -> Result<()> {
        if !(4..=16).contains(&self.bits) {
            return Err(HostError::invalid("spi data bits", self.bits));
        }
        if self.mode > 3 {
            return Err(HostError::invalid("spi mode", self.mode));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct SpiSettings {
    frequency_hz: u32,
    actual_hz: Option<u32>,
    format: SpiFormat,
}

/// One SPI controller on the bridge
pub struct Spi {
    manager: Arc<TransportManager>,
    binding: ChannelBinding,
    instance: u8,
    pins: SpiPins,
    settings: Mutex<SpiSettings>,
}

impl Spi {
    pub fn new(manager: Arc<TransportManager>, instance: u8, pins: SpiPins) -> Result<Self> {
        for pin in [pins.sck, pins.mosi, pins.miso, pins.cs] {
            check_pin(pin)?;
        }
        Ok(Self {
            manager,
            binding: ChannelBinding::new(),
            instance: check_instance(instance, SPI_INSTANCES)?,
            pins,
            settings: Mutex::new(SpiSettings {
                frequency_hz: DEFAULT_FREQUENCY_HZ,
                actual_hz: None,
                format: SpiFormat::default(),
            }),
        })
    }

    pub fn instance(&self) -> u8 {
        self.instance
    }

    /// Clock rate the device reported at init, once known
    pub fn actual_frequency(&self) -> Option<u32> {
        lock(&self.settings).actual_hz
    }

    pub fn format(&self, format: SpiFormat) -> Result<()> {
        format.validate()?;
        self.ensure_initialized()?;
        self.send_format(self.channel(), format)?;
        lock(&self.settings).format = format;
        Ok(())
    }

    pub fn frequency(&self, hz: u32) -> Result<()> {
        if hz == 0 {
            return Err(HostError::invalid("spi frequency", 0u32));
        }
        let mut request = command(PacketType::SpiSetFreq, &[self.instance])?;
        request.append_u32(hz)?;
        self.request(request)?;
        lock(&self.settings).frequency_hz = hz;
        Ok(())
    }

    /// Clock `data` out, discarding what comes back
    pub fn write(&self, data: &[u8]) -> Result<()> {
        for chunk in data.chunks(MAX_BLOCK) {
            let mut request = command(PacketType::SpiWrite, &[self.instance, chunk.len() as u8])?;
            request.append_bytes(chunk)?;
            self.request(request)?;
        }
        Ok(())
    }

    pub fn write_byte(&self, byte: u8) -> Result<()> {
        self.write(&[byte])
    }

    /// Fill `buf`, clocking out `fill` for every byte
    pub fn read(&self, buf: &mut [u8], fill: u8) -> Result<()> {
        for chunk in buf.chunks_mut(MAX_PAYLOAD_SIZE) {
            let request = command(PacketType::SpiRead, &[self.instance, chunk.len() as u8, fill])?;
            let response = self.request(request)?;
            copy_exact(response.payload(), chunk)?;
        }
        Ok(())
    }

    /// Full-duplex transfer; `tx` and `rx` must be the same length
    pub fn transfer(&self, tx: &[u8], rx: &mut [u8]) -> Result<()> {
        if tx.len() != rx.len() {
            return Err(HostError::invalid("spi rx length", rx.len() as i64));
        }
        for (out, into) in tx.chunks(MAX_BLOCK).zip(rx.chunks_mut(MAX_BLOCK)) {
            let mut request = command(PacketType::SpiTransfer, &[self.instance, out.len() as u8])?;
            request.append_bytes(out)?;
            let response = self.request(request)?;
            copy_exact(response.payload(), into)?;
        }
        Ok(())
    }

    /// Transfer with `byte` sent in every position
    pub fn transfer_repeated(&self, byte: u8, rx: &mut [u8]) -> Result<()> {
        for into in rx.chunks_mut(MAX_BLOCK) {
            let mut request = command(PacketType::SpiTransfer, &[self.instance, into.len() as u8])?;
            request.append_repeated(byte, into.len())?;
            let response = self.request(request)?;
            copy_exact(response.payload(), into)?;
        }
        Ok(())
    }

    /// Release the controller on the device
    pub fn deinit(&self) -> Result<()> {
        let channel = self.channel();
        self.manager
            .request(channel, command(PacketType::SpiDeinit, &[self.instance])?)?;
        self.binding.clear(channel);
        Ok(())
    }

    fn send_format(&self, channel: u8, format: SpiFormat) -> Result<()> {
        let cpol = (format.mode >> 1) & 1;
        let cpha = format.mode & 1;
        let request = command(
            PacketType::SpiSetFormat,
            &[self.instance, format.bits, cpol, cpha, format.order.into()],
        )?;
        self.manager.request(channel, request)?;
        Ok(())
    }
}

fn copy_exact(payload: &[u8], into: &mut [u8]) -> Result<()> {
    if payload.len() != into.len() {
        return Err(HostError::invalid("spi response length", payload.len() as i64));
    }
    into.copy_from_slice(payload);
    Ok(())
}

impl Peripheral for Spi {
    fn manager(&self) -> &TransportManager {
        &self.manager
    }

    fn binding(&self) -> &ChannelBinding {
        &self.binding
    }

    fn initialize(&self, channel: u8) -> Result<()> {
        let (frequency_hz, format) = {
            let settings = lock(&self.settings);
            (settings.frequency_hz, settings.format)
        };
        let sent = [
            self.instance,
            self.pins.sck,
            self.pins.mosi,
            self.pins.miso,
            self.pins.cs,
        ];
        let mut request = command(PacketType::SpiInit, &sent)?;
        request.append_u32(frequency_hz)?;

        let response = self.manager.request(channel, request)?;
        check_echo("SPI_INIT", &sent, &response);
        let actual = response.read_u32(sent.len()).ok();
        debug!(
            "SPI{} on channel {}: requested {} Hz, running at {:?} Hz",
            self.instance, channel, frequency_hz, actual
        );
        lock(&self.settings).actual_hz = actual;

        if format != SpiFormat::default() {
            self.send_format(channel, format)?;
        }
        Ok(())
    }
}

impl ByteStream for Spi {
    fn begin(&self) -> Result<()> {
        self.ensure_initialized().map(|_| ())
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        Spi::write(self, data)?;
        Ok(data.len())
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        Spi::read(self, buf, 0)?;
        Ok(buf.len())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
