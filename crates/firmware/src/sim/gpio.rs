use crate::hal::{GpioDriver, GpioIrqHandler};
use common::lock;
use protocol::params::TARGET_PINS_COUNT;
use protocol::{GpioEvents, PinDirection, PinMode};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Delay before a scheduled pulse starts
const PULSE_LEAD: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, Default)]
struct Pin {
    initialized: bool,
    direction: PinDirection,
    mode: PinMode,
    high: bool,
    irq: GpioEvents,
}

#[derive(Debug, Clone, Copy)]
struct Pulse {
    pin: u8,
    level: bool,
    start: Instant,
    width: Duration,
}

#[derive(Default)]
struct State {
    pins: [Pin; TARGET_PINS_COUNT as usize],
    handler: Option<GpioIrqHandler>,
    pulse: Option<Pulse>,
}

#[derive(Clone, Default)]
pub struct SimGpio {
    state: Arc<Mutex<State>>,
}

impl SimGpio {
    pub fn level(&self, pin: u8) -> bool {
        lock(&self.state).pins[pin as usize].high
    }

    pub fn is_initialized(&self, pin: u8) -> bool {
        lock(&self.state).pins[pin as usize].initialized
    }

    pub fn direction(&self, pin: u8) -> PinDirection {
        lock(&self.state).pins[pin as usize].direction
    }

    pub fn mode(&self, pin: u8) -> PinMode {
        lock(&self.state).pins[pin as usize].mode
    }

    /// Events currently enabled on `pin`
    pub fn irq_mask(&self, pin: u8) -> GpioEvents {
        lock(&self.state).pins[pin as usize].irq
    }

    /// Drive `pin` from outside, raising any enabled edge/level interrupts
    pub fn set_input(&self, pin: u8, high: bool) {
        self.drive(pin, high);
    }

    /// Fire the interrupt callback directly
    pub fn trigger(&self, pin: u8, events: GpioEvents) {
        let handler = lock(&self.state).handler.clone();
        if let Some(handler) = handler {
            handler(pin, events);
        }
    }

    /// Make `pin` read `level` for `width`, starting shortly after this call
    pub fn schedule_pulse(&self, pin: u8, level: bool, width: Duration) {
        lock(&self.state).pulse = Some(Pulse {
            pin,
            level,
            start: Instant::now() + PULSE_LEAD,
            width,
        });
    }

    fn drive(&self, pin: u8, high: bool) {
        let fired = {
            let mut state = lock(&self.state);
            let slot = &mut state.pins[pin as usize];
            let was_high = slot.high;
            slot.high = high;

            let mut seen = if high {
                GpioEvents::LEVEL_HIGH
            } else {
                GpioEvents::LEVEL_LOW
            };
            if high && !was_high {
                seen |= GpioEvents::RISE_EDGE;
            } else if !high && was_high {
                seen |= GpioEvents::FALL_EDGE;
            }
            let fired = seen & slot.irq;
            if fired.is_empty() {
                None
            } else {
                state.handler.clone().map(|h| (h, fired))
            }
        };
        if let Some((handler, events)) = fired {
            handler(pin, events);
        }
    }
}

impl GpioDriver for SimGpio {
    fn init(&mut self, pin: u8, direction: PinDirection) {
        let mut state = lock(&self.state);
        let slot = &mut state.pins[pin as usize];
        slot.initialized = true;
        slot.direction = direction;
        slot.high = false;
    }

    fn deinit(&mut self, pin: u8) {
        lock(&self.state).pins[pin as usize] = Pin::default();
    }

    fn set_pulls(&mut self, pin: u8, mode: PinMode) {
        let mut state = lock(&self.state);
        let slot = &mut state.pins[pin as usize];
        slot.mode = mode;
        if slot.direction == PinDirection::Input {
            slot.high = mode == PinMode::PullUp || mode == PinMode::OpenDrainPullUp;
        }
    }

    fn set_direction(&mut self, pin: u8, direction: PinDirection) {
        lock(&self.state).pins[pin as usize].direction = direction;
    }

    fn write(&mut self, pin: u8, high: bool) {
        self.drive(pin, high);
    }

    fn read(&self, pin: u8) -> bool {
        let state = lock(&self.state);
        if let Some(pulse) = state.pulse.filter(|p| p.pin == pin) {
            let now = Instant::now();
            let active = now >= pulse.start && now < pulse.start + pulse.width;
            return if active { pulse.level } else { !pulse.level };
        }
        state.pins[pin as usize].high
    }

    fn set_irq(&mut self, pin: u8, events: GpioEvents, handler: Option<GpioIrqHandler>) {
        let mut state = lock(&self.state);
        let slot = &mut state.pins[pin as usize];
        match handler {
            Some(handler) => {
                slot.irq |= events;
                state.handler = Some(handler);
            }
            None => {
                slot.irq = GpioEvents::from_bits_truncate(slot.irq.bits() & !events.bits());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_rising_edge_fires_enabled_irq() {
        let mut gpio = SimGpio::default();
        let seen = Arc::new(AtomicU32::new(0));
        let sink = Arc::clone(&seen);
        gpio.set_irq(
            3,
            GpioEvents::RISE_EDGE,
            Some(Arc::new(move |_, ev: GpioEvents| {
                sink.fetch_or(ev.bits(), Ordering::SeqCst);
            })),
        );

        gpio.set_input(3, false);
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        gpio.set_input(3, true);
        assert_eq!(seen.load(Ordering::SeqCst), GpioEvents::RISE_EDGE.bits());
    }

    #[test]
    fn test_disabled_irq_is_silent() {
        let mut gpio = SimGpio::default();
        let seen = Arc::new(AtomicU32::new(0));
        let sink = Arc::clone(&seen);
        gpio.set_irq(
            4,
            GpioEvents::ALL,
            Some(Arc::new(move |_, _| {
                sink.fetch_add(1, Ordering::SeqCst);
            })),
        );
        gpio.set_irq(4, GpioEvents::ALL, None);
        gpio.set_input(4, true);
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }
}
