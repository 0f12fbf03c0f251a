use crate::hal::{UartDriver, UartFormat, UartRxHandler};
use common::lock;
use protocol::params::UART_INSTANCES;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Port {
    enabled: bool,
    baud: u32,
    format: Option<UartFormat>,
    flow: (bool, bool),
    break_on: bool,
    blocked: bool,
    loopback: bool,
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    handler: Option<UartRxHandler>,
}

#[derive(Clone)]
pub struct SimUart {
    ports: Arc<Mutex<Vec<Port>>>,
}

impl Default for SimUart {
    fn default() -> Self {
        let ports = (0..UART_INSTANCES).map(|_| Port::default()).collect();
        Self {
            ports: Arc::new(Mutex::new(ports)),
        }
    }
}

impl SimUart {
    /// Deliver bytes on the receive line
    ///
    /// With the receive interrupt enabled each byte goes to the callback,
    /// otherwise it waits in the receive FIFO.
    pub fn inject(&self, instance: u8, data: &[u8]) {
        for &byte in data {
            let handler = {
                let mut ports = lock(&self.ports);
                let port = &mut ports[instance as usize];
                match &port.handler {
                    Some(handler) => Some(Arc::clone(handler)),
                    None => {
                        port.rx.push_back(byte);
                        None
                    }
                }
            };
            if let Some(handler) = handler {
                handler(byte);
            }
        }
    }

    /// Wire TX back to RX
    pub fn set_loopback(&self, instance: u8, on: bool) {
        lock(&self.ports)[instance as usize].loopback = on;
    }

    /// Simulate a full transmit FIFO
    pub fn block_tx(&self, instance: u8, blocked: bool) {
        lock(&self.ports)[instance as usize].blocked = blocked;
    }

    /// Everything transmitted on `instance` so far
    pub fn transmitted(&self, instance: u8) -> Vec<u8> {
        lock(&self.ports)[instance as usize].tx.clone()
    }

    pub fn baud(&self, instance: u8) -> u32 {
        lock(&self.ports)[instance as usize].baud
    }

    pub fn format(&self, instance: u8) -> Option<UartFormat> {
        lock(&self.ports)[instance as usize].format
    }

    /// `(rts, cts)` flow control enables
    pub fn flow_control(&self, instance: u8) -> (bool, bool) {
        lock(&self.ports)[instance as usize].flow
    }

    pub fn is_break(&self, instance: u8) -> bool {
        lock(&self.ports)[instance as usize].break_on
    }

    pub fn has_rx_irq(&self, instance: u8) -> bool {
        lock(&self.ports)[instance as usize].handler.is_some()
    }

    fn transmit(&self, instance: u8, data: &[u8]) {
        let echo = {
            let mut ports = lock(&self.ports);
            let port = &mut ports[instance as usize];
            port.tx.extend_from_slice(data);
            port.loopback
        };
        if echo {
            self.inject(instance, data);
        }
    }
}

impl UartDriver for SimUart {
    fn is_enabled(&self, instance: u8) -> bool {
        lock(&self.ports)[instance as usize].enabled
    }

    fn init(&mut self, instance: u8, _tx: u8, _rx: u8, baud: u32) -> u32 {
        let mut ports = lock(&self.ports);
        let port = &mut ports[instance as usize];
        port.enabled = true;
        port.baud = baud;
        baud
    }

    fn deinit(&mut self, instance: u8) {
        let mut ports = lock(&self.ports);
        let port = &mut ports[instance as usize];
        port.enabled = false;
        port.rx.clear();
        port.handler = None;
    }

    fn set_baud(&mut self, instance: u8, baud: u32) -> u32 {
        lock(&self.ports)[instance as usize].baud = baud;
        baud
    }

    fn set_format(&mut self, instance: u8, format: UartFormat) {
        lock(&self.ports)[instance as usize].format = Some(format);
    }

    fn set_flow_control(&mut self, instance: u8, rts: bool, cts: bool) {
        lock(&self.ports)[instance as usize].flow = (rts, cts);
    }

    fn set_break(&mut self, instance: u8, on: bool) {
        lock(&self.ports)[instance as usize].break_on = on;
    }

    fn is_readable(&self, instance: u8) -> bool {
        !lock(&self.ports)[instance as usize].rx.is_empty()
    }

    fn is_writable(&self, instance: u8) -> bool {
        let ports = lock(&self.ports);
        let port = &ports[instance as usize];
        port.enabled && !port.blocked
    }

    fn getc(&mut self, instance: u8) -> Option<u8> {
        lock(&self.ports)[instance as usize].rx.pop_front()
    }

    fn putc(&mut self, instance: u8, byte: u8) {
        self.transmit(instance, &[byte]);
    }

    fn write(&mut self, instance: u8, data: &[u8]) -> usize {
        self.transmit(instance, data);
        data.len()
    }

    fn read(&mut self, instance: u8, buf: &mut [u8]) -> usize {
        let mut ports = lock(&self.ports);
        let rx = &mut ports[instance as usize].rx;
        let n = buf.len().min(rx.len());
        for (slot, byte) in buf.iter_mut().zip(rx.drain(..n)) {
            *slot = byte;
        }
        n
    }

    fn set_rx_irq(&mut self, instance: u8, handler: Option<UartRxHandler>) {
        lock(&self.ports)[instance as usize].handler = handler;
    }
}
