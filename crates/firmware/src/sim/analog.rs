use crate::hal::AnalogDriver;
use common::lock;
use protocol::params::ADC_TEMP_CHANNEL;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const SYS_CLOCK_HZ: u32 = 125_000_000;

const PWM_SLICES: usize = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PwmSlice {
    pub enabled: bool,
    pub wrap: u32,
    pub clkdiv: f32,
}

#[derive(Debug, Default)]
struct State {
    adc: [u16; ADC_TEMP_CHANNEL as usize + 1],
    adc_pins: Vec<u8>,
    temp_sensor: bool,
    slices: [PwmSlice; PWM_SLICES],
    levels: HashMap<u8, u32>,
}

#[derive(Clone, Default)]
pub struct SimAnalog {
    state: Arc<Mutex<State>>,
}

impl SimAnalog {
    /// Set the raw 12-bit conversion result of `channel`
    pub fn set_adc(&self, channel: u8, raw: u16) {
        lock(&self.state).adc[channel as usize] = raw & 0x0fff;
    }

    pub fn temp_sensor_enabled(&self) -> bool {
        lock(&self.state).temp_sensor
    }

    pub fn is_adc_pin(&self, pin: u8) -> bool {
        lock(&self.state).adc_pins.contains(&pin)
    }

    pub fn slice(&self, slice: u8) -> PwmSlice {
        lock(&self.state).slices[slice as usize]
    }

    pub fn level(&self, pin: u8) -> Option<u32> {
        lock(&self.state).levels.get(&pin).copied()
    }
}

impl AnalogDriver for SimAnalog {
    fn adc_init(&mut self, pin: u8) {
        let mut state = lock(&self.state);
        if !state.adc_pins.contains(&pin) {
            state.adc_pins.push(pin);
        }
    }

    fn set_temp_sensor(&mut self, enabled: bool) {
        lock(&self.state).temp_sensor = enabled;
    }

    fn adc_read(&mut self, channel: u8) -> u16 {
        lock(&self.state)
            .adc
            .get(channel as usize)
            .copied()
            .unwrap_or(0)
    }

    fn pwm_slice(&self, pin: u8) -> u8 {
        (pin >> 1) & 7
    }

    fn pwm_channel(&self, pin: u8) -> u8 {
        pin & 1
    }

    fn sys_clock_hz(&self) -> u32 {
        SYS_CLOCK_HZ
    }

    fn pwm_init(&mut self, _pin: u8, slice: u8, wrap: u32, clkdiv: f32) {
        lock(&self.state).slices[slice as usize] = PwmSlice {
            enabled: false,
            wrap,
            clkdiv,
        };
    }

    fn pwm_set_level(&mut self, pin: u8, level: u32) {
        lock(&self.state).levels.insert(pin, level);
    }

    fn pwm_set_enabled(&mut self, slice: u8, enabled: bool) {
        if let Some(s) = lock(&self.state).slices.get_mut(slice as usize) {
            s.enabled = enabled;
        }
    }

    fn deinit(&mut self, pin: u8) {
        let mut state = lock(&self.state);
        state.adc_pins.retain(|p| *p != pin);
        state.levels.remove(&pin);
    }
}
