//! UART task
//!
//! With the receive interrupt enabled, incoming bytes are queued per UART and
//! reported through `SERIAL_EVENT` frames as `[instance, byte]` pairs.

use super::{read_block, read_instance, read_pin};
use crate::error::HandlerError;
use crate::hal::{UartDriver, UartFormat, UartRxHandler};
use crate::task::{StateCell, Task};
use common::BoundedEventQueue;
use protocol::params::UART_INSTANCES;
use protocol::{FlowControl, Packet, PacketType, Parity, SerialIrq, Status};
use std::sync::Arc;
use tracing::debug;

const MIN_BAUD: u32 = 300;
const MAX_BAUD: u32 = 4_000_000;

pub struct SerialTask {
    state: Arc<StateCell>,
    driver: Box<dyn UartDriver>,
    rx_queues: Vec<Arc<BoundedEventQueue<u8>>>,
}

impl SerialTask {
    pub fn new(driver: Box<dyn UartDriver>, rx_queue: usize) -> Self {
        let rx_queues = ["uart0-rx", "uart1-rx"]
            .into_iter()
            .map(|name| Arc::new(BoundedEventQueue::new(name, rx_queue)))
            .collect();
        Self {
            state: StateCell::new(),
            driver,
            rx_queues,
        }
    }

    fn rx_handler(&self, instance: u8) -> UartRxHandler {
        let state = Arc::clone(&self.state);
        let queue = Arc::clone(&self.rx_queues[instance as usize]);
        Arc::new(move |byte| {
            if state.is_stopped() {
                return;
            }
            queue.push(byte);
        })
    }

    fn drain_events(&self, response: &mut Packet) -> Result<(), HandlerError> {
        for (instance, queue) in self.rx_queues.iter().enumerate() {
            while response.free_payload_slots() >= 2 {
                let Some(byte) = queue.try_pop() else {
                    break;
                };
                response.append_bytes(&[instance as u8, byte])?;
            }
        }
        Ok(())
    }
}

fn instance(request: &Packet) -> Result<u8, HandlerError> {
    read_instance(request, 0, UART_INSTANCES, "uart instance")
}

fn read_baud(request: &Packet, offset: usize) -> Result<u32, HandlerError> {
    let baud = request.read_u32(offset)?;
    if !(MIN_BAUD..=MAX_BAUD).contains(&baud) {
        return Err(HandlerError::invalid("baud rate", baud));
    }
    Ok(baud)
}

impl Task for SerialTask {
    fn name(&self) -> &'static str {
        "serial"
    }

    fn state(&self) -> &StateCell {
        &self.state
    }

    fn clear(&mut self) {
        for queue in &self.rx_queues {
            queue.clear();
        }
    }

    fn handle(&mut self, request: &Packet, response: &mut Packet) -> Result<(), HandlerError> {
        let Ok(packet_type) = request.packet_type() else {
            return Ok(());
        };

        match packet_type {
            PacketType::SerialInit => {
                let inst = instance(request)?;
                let tx = read_pin(request, 1)?;
                let rx = read_pin(request, 2)?;
                let baud = read_baud(request, 3)?;
                if !self.driver.is_enabled(inst) {
                    self.driver.init(inst, tx, rx, baud);
                }
                response.append_bytes(&[inst, tx, rx])?;
                response.append_u32(baud)?;
            }
            PacketType::SerialDeinit => {
                let inst = instance(request)?;
                self.driver.set_rx_irq(inst, None);
                self.driver.deinit(inst);
                self.rx_queues[inst as usize].clear();
                response.append_u8(inst)?;
            }
            PacketType::SerialSetBaud => {
                let inst = instance(request)?;
                let baud = read_baud(request, 1)?;
                self.driver.set_baud(inst, baud);
                response.append_u8(inst)?;
                response.append_u32(baud)?;
            }
            PacketType::SerialSetFormat => {
                let inst = instance(request)?;
                let parity = Parity::try_from(request.read_u8(1)?)?;
                let data_bits = request.read_u8(2)?;
                let stop_bits = request.read_u8(3)?;
                if !(5..=8).contains(&data_bits) {
                    return Err(HandlerError::invalid("data bits", data_bits));
                }
                if !(1..=2).contains(&stop_bits) {
                    return Err(HandlerError::invalid("stop bits", stop_bits));
                }
                self.driver.set_format(
                    inst,
                    UartFormat {
                        data_bits,
                        stop_bits,
                        parity,
                    },
                );
                response.append_bytes(&[inst, parity.into(), data_bits, stop_bits])?;
            }
            PacketType::SerialSetIrq => {
                let inst = instance(request)?;
                let enable = request.read_u8(1)?;
                let irq = SerialIrq::try_from(request.read_u8(2)?)?;
                let handler = (enable != 0 && irq == SerialIrq::Rx).then(|| self.rx_handler(inst));
                debug!(
                    "uart{} rx irq {}",
                    inst,
                    if handler.is_some() { "enabled" } else { "disabled" }
                );
                self.driver.set_rx_irq(inst, handler);
                response.append_bytes(&[inst, enable, irq.into()])?;
            }
            PacketType::SerialSetFlowControl => {
                let inst = instance(request)?;
                let rts_pin = read_pin(request, 1)?;
                let cts_pin = read_pin(request, 2)?;
                let flow = FlowControl::try_from(request.read_u8(3)?)?;
                let (rts, cts) = match flow {
                    FlowControl::None => (false, false),
                    FlowControl::Rts => (true, false),
                    FlowControl::Cts => (false, true),
                    FlowControl::RtsCts => (true, true),
                };
                self.driver.set_flow_control(inst, rts, cts);
                response.append_bytes(&[inst, rts_pin, cts_pin, flow.into()])?;
            }
            PacketType::SerialReadable => {
                let inst = instance(request)?;
                response.append_u8(self.driver.is_readable(inst) as u8)?;
            }
            PacketType::SerialWritable => {
                let inst = instance(request)?;
                response.append_u8(self.driver.is_writable(inst) as u8)?;
            }
            PacketType::SerialSetBreak => {
                let inst = instance(request)?;
                let on = request.read_u8(1)? != 0;
                self.driver.set_break(inst, on);
            }
            PacketType::SerialGetc => {
                let inst = instance(request)?;
                match self.driver.getc(inst) {
                    Some(byte) => response.append_u8(byte)?,
                    None => response.set_status(Status::SerialNotReadable),
                }
            }
            PacketType::SerialPutc => {
                let inst = instance(request)?;
                let byte = request.read_u8(1)?;
                if self.driver.is_writable(inst) {
                    self.driver.putc(inst, byte);
                    response.append_u8(byte)?;
                } else {
                    response.set_status(Status::SerialNotWritable);
                }
            }
            PacketType::SerialWrite => {
                let inst = instance(request)?;
                let data = read_block(request, 1)?;
                if !self.driver.is_writable(inst) || self.driver.write(inst, data) != data.len() {
                    response.set_status(Status::SerialNotWritable);
                }
            }
            PacketType::SerialRead => {
                let inst = instance(request)?;
                let len = (request.read_u8(1)? as usize).min(response.free_payload_slots());
                if !self.driver.is_readable(inst) {
                    response.set_status(Status::SerialNotReadable);
                    return Ok(());
                }
                let n = self
                    .driver
                    .read(inst, &mut response.spare_payload_mut()[..len]);
                response.grow_payload(n)?;
            }
            PacketType::SerialEvent => self.drain_events(response)?,
            _ => {}
        }
        Ok(())
    }
}
