//! UART

use super::{
    ByteStream, ChannelBinding, Peripheral, check_echo, check_instance, check_pin, command,
};
use crate::error::{HostError, Result};
use crate::manager::{ListenerId, TransportManager};
use common::lock;
use protocol::params::UART_INSTANCES;
use protocol::{FlowControl, MAX_PAYLOAD_SIZE, Packet, PacketType, Parity, SerialIrq, Status};
use std::io;
use std::sync::{Arc, Mutex};
use tracing::debug;

pub const DEFAULT_BAUD: u32 = 115_200;
pub const MIN_BAUD: u32 = 300;
pub const MAX_BAUD: u32 = 4_000_000;

/// Largest write after the `[inst, len]` header
const MAX_BLOCK: usize = MAX_PAYLOAD_SIZE - 2;

fn check_baud(baud: u32) -> Result<u32> {
    if !(MIN_BAUD..=MAX_BAUD).contains(&baud) {
        return Err(HostError::invalid("baud rate", baud));
    }
    Ok(baud)
}

/// Character framing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialFormat {
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
}

impl Default for SerialFormat {
    fn default() -> Self {
        Self {
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
        }
    }
}

/// One UART on the bridge
pub struct Serial {
    manager: Arc<TransportManager>,
    binding: ChannelBinding,
    instance: u8,
    tx: u8,
    rx: u8,
    baud: Mutex<u32>,
    listener: Mutex<Option<(u8, ListenerId)>>,
}

impl Serial {
    pub fn new(
        manager: Arc<TransportManager>,
        instance: u8,
        tx: u8,
        rx: u8,
        baud: u32,
    ) -> Result<Self> {
        Ok(Self {
            manager,
            binding: ChannelBinding::new(),
            instance: check_instance(instance, UART_INSTANCES)?,
            tx: check_pin(tx)?,
            rx: check_pin(rx)?,
            baud: Mutex::new(check_baud(baud)?),
            listener: Mutex::new(None),
        })
    }

    pub fn instance(&self) -> u8 {
        self.instance
    }

    pub fn baud(&self, baud: u32) -> Result<()> {
        let mut request = command(PacketType::SerialSetBaud, &[self.instance])?;
        request.append_u32(check_baud(baud)?)?;
        let response = self.request(request.clone())?;
        check_echo("SERIAL_SET_BAUD", request.payload(), &response);
        *lock(&self.baud) = baud;
        Ok(())
    }

    pub fn set_format(&self, format: SerialFormat) -> Result<()> {
        if !(5..=8).contains(&format.data_bits) {
            return Err(HostError::invalid("data bits", format.data_bits));
        }
        if !(1..=2).contains(&format.stop_bits) {
            return Err(HostError::invalid("stop bits", format.stop_bits));
        }
        let sent = [
            self.instance,
            format.parity.into(),
            format.data_bits,
            format.stop_bits,
        ];
        let response = self.request(command(PacketType::SerialSetFormat, &sent)?)?;
        check_echo("SERIAL_SET_FORMAT", &sent, &response);
        Ok(())
    }

    /// Hardware flow control; unused pins may be `None`
    pub fn set_flow_control(
        &self,
        flow: FlowControl,
        rts: Option<u8>,
        cts: Option<u8>,
    ) -> Result<()> {
        let rts = rts.map(check_pin).transpose()?.unwrap_or(0);
        let cts = cts.map(check_pin).transpose()?.unwrap_or(0);
        let sent = [self.instance, rts, cts, flow.into()];
        let response = self.request(command(PacketType::SerialSetFlowControl, &sent)?)?;
        check_echo("SERIAL_SET_FLOW_CONTROL", &sent, &response);
        Ok(())
    }

    pub fn set_break(&self, on: bool) -> Result<()> {
        self.request(command(PacketType::SerialSetBreak, &[self.instance, on as u8])?)?;
        Ok(())
    }

    pub fn readable(&self) -> Result<bool> {
        let response = self.request(command(PacketType::SerialReadable, &[self.instance])?)?;
        Ok(response.read_u8(0)? != 0)
    }

    pub fn writable(&self) -> Result<bool> {
        let response = self.request(command(PacketType::SerialWritable, &[self.instance])?)?;
        Ok(response.read_u8(0)? != 0)
    }

    /// Next received byte, if any
    pub fn getc(&self) -> Result<Option<u8>> {
        match self.request(command(PacketType::SerialGetc, &[self.instance])?) {
            Ok(response) => Ok(Some(response.read_u8(0)?)),
            Err(e) if e.status() == Some(Status::SerialNotReadable) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn putc(&self, byte: u8) -> Result<()> {
        self.request(command(PacketType::SerialPutc, &[self.instance, byte])?)?;
        Ok(())
    }

    pub fn write(&self, data: &[u8]) -> Result<usize> {
        for chunk in data.chunks(MAX_BLOCK) {
            let mut request = command(PacketType::SerialWrite, &[self.instance, chunk.len() as u8])?;
            request.append_bytes(chunk)?;
            self.request(request)?;
        }
        Ok(data.len())
    }

    /// Read what is available, up to `buf.len()` bytes
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let len = buf.len().min(MAX_PAYLOAD_SIZE);
        let request = command(PacketType::SerialRead, &[self.instance, len as u8])?;
        match self.request(request) {
            Ok(response) => {
                let data = response.payload();
                let n = data.len().min(len);
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            Err(e) if e.status() == Some(Status::SerialNotReadable) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Call `callback` with every byte this UART receives
    ///
    /// Replaces any callback installed earlier.
    pub fn set_rx_callback<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(u8) + Send + Sync + 'static,
    {
        let channel = self.ensure_initialized()?;
        self.remove_listener();

        let instance = self.instance;
        let listener = move |event: &Packet| {
            for (inst, byte) in decode_rx_events(event) {
                if inst == instance {
                    callback(byte);
                }
            }
        };
        let id = self.manager.add_listener(channel, Arc::new(listener))?;
        *lock(&self.listener) = Some((channel, id));

        let sent = [self.instance, 1, SerialIrq::Rx.into()];
        let response = self.request(command(PacketType::SerialSetIrq, &sent)?)?;
        check_echo("SERIAL_SET_IRQ", &sent, &response);
        debug!("Rx callback set on uart{}", self.instance);
        Ok(())
    }

    pub fn clear_rx_callback(&self) -> Result<()> {
        let sent = [self.instance, 0, SerialIrq::Rx.into()];
        self.request(command(PacketType::SerialSetIrq, &sent)?)?;
        self.remove_listener();
        Ok(())
    }

    /// Release the UART on the device
    pub fn deinit(&self) -> Result<()> {
        let channel = self.channel();
        self.remove_listener();
        self.manager
            .request(channel, command(PacketType::SerialDeinit, &[self.instance])?)?;
        self.binding.clear(channel);
        Ok(())
    }

    fn remove_listener(&self) {
        if let Some((channel, id)) = lock(&self.listener).take() {
            self.manager.remove_listener(channel, id);
        }
    }
}

/// `(instance, byte)` pairs of a `SERIAL_EVENT` frame
pub fn decode_rx_events(event: &Packet) -> Vec<(u8, u8)> {
    if !matches!(event.packet_type(), Ok(PacketType::SerialEvent)) {
        return Vec::new();
    }
    event
        .payload()
        .chunks_exact(2)
        .map(|pair| (pair[0], pair[1]))
        .collect()
}

impl Peripheral for Serial {
    fn manager(&self) -> &TransportManager {
        &self.manager
    }

    fn binding(&self) -> &ChannelBinding {
        &self.binding
    }

    fn initialize(&self, channel: u8) -> Result<()> {
        let mut request = command(PacketType::SerialInit, &[self.instance, self.tx, self.rx])?;
        request.append_u32(*lock(&self.baud))?;
        let response = self.manager.request(channel, request.clone())?;
        check_echo("SERIAL_INIT", request.payload(), &response);
        Ok(())
    }
}

impl Drop for Serial {
    fn drop(&mut self) {
        self.remove_listener();
    }
}

impl io::Read for &Serial {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Serial::read(*self, buf).map_err(io::Error::other)
    }
}

impl io::Write for &Serial {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Serial::write(*self, buf).map_err(io::Error::other)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Read for Serial {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut &*self, buf)
    }
}

impl io::Write for Serial {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut &*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ByteStream for Serial {
    fn begin(&self) -> Result<()> {
        self.ensure_initialized().map(|_| ())
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        Serial::write(self, data)
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        Serial::read(self, buf)
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baud_range() {
        assert!(check_baud(299).is_err());
        assert!(check_baud(300).is_ok());
        assert!(check_baud(4_000_000).is_ok());
        assert!(check_baud(4_000_001).is_err());
    }

    #[test]
    fn test_decode_rx_events() {
        let mut pkt = Packet::command(PacketType::SerialEvent);
        pkt.append_bytes(&[0, b'a', 1, b'b', 0, b'c']).unwrap();
        assert_eq!(
            decode_rx_events(&pkt),
            vec![(0, b'a'), (1, b'b'), (0, b'c')]
        );

        let other = Packet::command(PacketType::GpioEvent);
        assert!(decode_rx_events(&other).is_empty());
    }
}
