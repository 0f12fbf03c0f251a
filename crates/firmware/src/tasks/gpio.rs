//! GPIO task
//!
//! Besides the pin commands this task owns the GPIO interrupt queue. The
//! interrupt callback packs `(pin, events)` items into a drop-oldest queue and
//! `GPIO_EVENT` polls drain up to seven of them per frame:
//!
//! ```text
//! [count, item0 (u32), item1 (u32), ...]   item = (pin << 16) | events
//! ```

use super::read_pin;
use crate::error::HandlerError;
use crate::hal::{GpioDriver, GpioIrqHandler};
use crate::task::{StateCell, Task};
use common::BoundedEventQueue;
use protocol::params::GPIO_EVENTS_PER_FRAME;
use protocol::{GpioEvent, GpioEvents, Packet, PacketType, PinDirection, PinMode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

pub struct GpioTask {
    state: Arc<StateCell>,
    driver: Box<dyn GpioDriver>,
    events: Arc<BoundedEventQueue<GpioEvent>>,
}

impl GpioTask {
    pub fn new(driver: Box<dyn GpioDriver>, event_queue: usize) -> Self {
        Self {
            state: StateCell::new(),
            driver,
            events: Arc::new(BoundedEventQueue::new("gpio-irq", event_queue)),
        }
    }

    /// Queue of pending interrupt events
    pub fn events(&self) -> Arc<BoundedEventQueue<GpioEvent>> {
        Arc::clone(&self.events)
    }

    fn irq_handler(&self) -> GpioIrqHandler {
        let state = Arc::clone(&self.state);
        let events = Arc::clone(&self.events);
        Arc::new(move |pin, triggered| {
            if state.is_stopped() {
                return;
            }
            events.push(GpioEvent::new(pin, triggered));
        })
    }

    fn drain_events(&self, response: &mut Packet) -> Result<(), HandlerError> {
        let Some(first) = self.events.try_pop() else {
            return Ok(());
        };
        response.append_u8(0)?;
        response.append_u32(first.to_wire())?;
        let more = self
            .events
            .drain_into(response, GPIO_EVENTS_PER_FRAME - 1)?;
        response.set_u8(0, (1 + more) as u8)?;
        Ok(())
    }

    /// Width of the next `level` pulse on `pin`, or `None` on timeout
    fn measure_pulse(&self, pin: u8, level: bool, timeout: Duration) -> Option<Duration> {
        let start = Instant::now();
        let wait_while = |want: bool| -> bool {
            while self.driver.read(pin) == want {
                if start.elapsed() > timeout {
                    return false;
                }
                std::hint::spin_loop();
            }
            true
        };

        // Let any pulse already in progress finish, then wait for the next one
        if !wait_while(level) || !wait_while(!level) {
            return None;
        }
        let pulse_start = Instant::now();
        if !wait_while(level) {
            return None;
        }
        Some(pulse_start.elapsed())
    }
}

impl Task for GpioTask {
    fn name(&self) -> &'static str {
        "gpio"
    }

    fn state(&self) -> &StateCell {
        &self.state
    }

    fn clear(&mut self) {
        self.events.clear();
    }

    fn handle(&mut self, request: &Packet, response: &mut Packet) -> Result<(), HandlerError> {
        let Ok(packet_type) = request.packet_type() else {
            return Ok(());
        };

        match packet_type {
            PacketType::GpioInit => {
                let pin = read_pin(request, 0)?;
                let mode = PinMode::try_from(request.read_u8(1)?)?;
                let dir = PinDirection::try_from(request.read_u8(2)?)?;
                self.driver.init(pin, dir);
                self.driver.set_pulls(pin, mode);
                response.append_bytes(&[pin, mode.into(), dir.into()])?;
            }
            PacketType::GpioDeinit => {
                let pin = read_pin(request, 0)?;
                self.driver.set_irq(pin, GpioEvents::ALL, None);
                self.driver.deinit(pin);
                response.append_u8(pin)?;
            }
            PacketType::GpioEvent => self.drain_events(response)?,
            PacketType::GpioSetMode => {
                let pin = read_pin(request, 0)?;
                let mode = PinMode::try_from(request.read_u8(1)?)?;
                self.driver.set_pulls(pin, mode);
                response.append_bytes(&[pin, mode.into()])?;
            }
            PacketType::GpioSetValue => {
                let pin = read_pin(request, 0)?;
                let value = request.read_u8(1)?;
                self.driver.write(pin, value != 0);
                response.append_bytes(&[pin, value])?;
            }
            PacketType::GpioGetValue => {
                let pin = read_pin(request, 0)?;
                response.append_u8(self.driver.read(pin) as u8)?;
            }
            PacketType::GpioSetIrq => {
                let pin = read_pin(request, 0)?;
                let enable = request.read_u8(1)?;
                let events = GpioEvents::from_bits_truncate(request.read_u32(2)?);
                let handler = (enable >= 1).then(|| self.irq_handler());
                debug!(
                    "gpio irq pin={} events={:#x} enabled={}",
                    pin,
                    events.bits(),
                    handler.is_some()
                );
                self.driver.set_irq(pin, events, handler);
                response.append_bytes(&[pin, enable])?;
                response.append_u32(events.bits())?;
            }
            PacketType::GpioSetDir => {
                let pin = read_pin(request, 0)?;
                let dir = PinDirection::try_from(request.read_u8(1)?)?;
                self.driver.set_direction(pin, dir);
                response.append_bytes(&[pin, dir.into()])?;
            }
            PacketType::GpioPulseIn => {
                let pin = read_pin(request, 0)?;
                let level = request.read_u8(1)? != 0;
                let timeout = Duration::from_micros(request.read_u64(2)?);
                if let Some(width) = self.measure_pulse(pin, level, timeout) {
                    response.append_u64(width.as_micros() as u64)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}
