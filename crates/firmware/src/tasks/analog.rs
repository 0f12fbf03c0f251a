//! Analog task: ADC inputs, the internal temperature sensor and PWM outputs

use super::read_pin;
use crate::error::HandlerError;
use crate::hal::AnalogDriver;
use crate::task::{StateCell, Task};
use protocol::params::{ADC_NATIVE_BITS, ADC_TEMP, ADC_TEMP_CHANNEL, adc_channel};
use protocol::{AnalogMode, Packet, PacketType};
use std::sync::Arc;

/// ADC reference voltage
const ADC_VREF: f32 = 3.3;

pub struct AnalogTask {
    state: Arc<StateCell>,
    driver: Box<dyn AnalogDriver>,
}

impl AnalogTask {
    pub fn new(driver: Box<dyn AnalogDriver>) -> Self {
        Self {
            state: StateCell::new(),
            driver,
        }
    }

    fn init_input(&mut self, pin: u8) -> Result<(), HandlerError> {
        if adc_channel(pin).is_none() {
            return Err(HandlerError::invalid("adc pin", pin));
        }
        if pin == ADC_TEMP {
            self.driver.set_temp_sensor(true);
        } else {
            self.driver.adc_init(pin);
        }
        Ok(())
    }

    fn init_output(
        &mut self,
        request: &Packet,
        pin: u8,
        response: &mut Packet,
    ) -> Result<(), HandlerError> {
        let count_top = request.read_u32(2)?;
        let period_us = request.read_u64(6)?;
        let slice = self.driver.pwm_slice(pin);
        let channel = self.driver.pwm_channel(pin);

        // Shortest period the counter can produce at the system clock
        let min_period_us = 1_000_000u64 * count_top as u64 / self.driver.sys_clock_hz().max(1) as u64;
        let clkdiv = if min_period_us == 0 {
            1.0
        } else {
            period_us as f32 / min_period_us as f32
        };
        self.driver.pwm_init(pin, slice, count_top, clkdiv);

        response.append_u32(count_top)?;
        response.append_u64(period_us)?;
        response.append_bytes(&[slice, channel])?;
        Ok(())
    }
}

fn read_resolution(request: &Packet, offset: usize) -> Result<u8, HandlerError> {
    let bits = request.read_u8(offset)?;
    if !(1..=16).contains(&bits) {
        return Err(HandlerError::invalid("resolution", bits));
    }
    Ok(bits)
}

/// Rescale a native conversion to `bits` of resolution
pub fn scale_reading(raw: u16, bits: u8) -> u16 {
    let full = (raw as u32) << (16 - ADC_NATIVE_BITS);
    (full >> (16 - bits as u32)) as u16
}

/// Convert a raw temperature-sensor reading to degrees Celsius
pub fn temperature_celsius(raw: u16) -> f32 {
    let volts = raw as f32 * ADC_VREF / (1u32 << ADC_NATIVE_BITS) as f32;
    27.0 - (volts - 0.706) / 0.001721
}

impl Task for AnalogTask {
    fn name(&self) -> &'static str {
        "analog"
    }

    fn state(&self) -> &StateCell {
        &self.state
    }

    fn handle(&mut self, request: &Packet, response: &mut Packet) -> Result<(), HandlerError> {
        let Ok(packet_type) = request.packet_type() else {
            return Ok(());
        };

        match packet_type {
            PacketType::AnalogInit => {
                let pin = request.read_u8(0)?;
                let mode = AnalogMode::try_from(request.read_u8(1)?)?;
                response.append_bytes(&[pin, mode.into()])?;
                match mode {
                    AnalogMode::Adc => self.init_input(pin)?,
                    AnalogMode::Pwm => {
                        let pin = read_pin(request, 0)?;
                        self.init_output(request, pin, response)?;
                    }
                }
            }
            PacketType::AnalogDeinit => {
                let pin = request.read_u8(0)?;
                let mode = AnalogMode::try_from(request.read_u8(1)?)?;
                response.append_bytes(&[pin, mode.into()])?;
                if mode == AnalogMode::Pwm {
                    let slice = request.read_u8(2)?;
                    self.driver.pwm_set_enabled(slice, false);
                    response.append_u8(slice)?;
                }
                if pin == ADC_TEMP {
                    self.driver.set_temp_sensor(false);
                } else {
                    self.driver.deinit(pin);
                }
            }
            PacketType::AnalogWrite => {
                let pin = read_pin(request, 0)?;
                let slice = request.read_u32(1)?;
                let value = request.read_u16(5)?;
                let count_top = request.read_u32(7)?;
                let bits = read_resolution(request, 11)?;

                let duty = value as f32 / ((1u32 << bits) - 1) as f32;
                let level = (duty * (count_top as f32 + 1.0)) as u32;
                self.driver.pwm_set_level(pin, level);
                self.driver.pwm_set_enabled(slice as u8, true);
                response.append_f32(duty)?;
            }
            PacketType::AnalogRead => {
                let channel = request.read_u8(0)?;
                if channel > ADC_TEMP_CHANNEL {
                    return Err(HandlerError::invalid("adc channel", channel));
                }
                let bits = read_resolution(request, 1)?;
                let raw = self.driver.adc_read(channel);
                response.append_u8(channel)?;
                response.append_u16(scale_reading(raw, bits))?;
            }
            PacketType::AnalogReadTemp => {
                let raw = self.driver.adc_read(ADC_TEMP_CHANNEL);
                response.append_f32(temperature_celsius(raw))?;
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_reading() {
        assert_eq!(scale_reading(0x0fff, 12), 0x0fff);
        assert_eq!(scale_reading(0x0fff, 16), 0xfff0);
        assert_eq!(scale_reading(0x0fff, 10), 0x03ff);
        assert_eq!(scale_reading(0x0800, 8), 0x80);
    }

    #[test]
    fn test_temperature_at_reference_point() {
        // 0.706 V is 27 degrees
        let raw = (0.706 / ADC_VREF * 4096.0) as u16;
        let t = temperature_celsius(raw);
        assert!((t - 27.0).abs() < 1.0, "got {}", t);
    }
}
