//! ADC inputs and PWM outputs

use super::{ChannelBinding, Peripheral, check_echo, check_pin, command};
use crate::error::{HostError, Result};
use crate::manager::TransportManager;
use common::lock;
use protocol::params::{ADC_TEMP, adc_channel};
use protocol::{AnalogMode, PacketType};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_READ_RESOLUTION: u8 = 10;
pub const DEFAULT_WRITE_RESOLUTION: u8 = 8;
pub const DEFAULT_COUNT_TOP: u32 = 1000;
pub const DEFAULT_PWM_PERIOD: Duration = Duration::from_micros(2000);

/// Highest PWM slice on the target
const MAX_SLICE: u8 = 7;

fn check_resolution(bits: u8) -> Result<u8> {
    if !(1..=16).contains(&bits) {
        return Err(HostError::invalid("resolution", bits));
    }
    Ok(bits)
}

/// One ADC input, or the internal temperature sensor when built on
/// [`ADC_TEMP`]
pub struct AnalogIn {
    manager: Arc<TransportManager>,
    binding: ChannelBinding,
    pin: u8,
    adc: u8,
    resolution: Mutex<u8>,
}

impl AnalogIn {
    pub fn new(manager: Arc<TransportManager>, pin: u8, resolution: u8) -> Result<Self> {
        let adc = adc_channel(pin).ok_or_else(|| HostError::invalid("analog pin", pin))?;
        Ok(Self {
            manager,
            binding: ChannelBinding::new(),
            pin,
            adc,
            resolution: Mutex::new(check_resolution(resolution)?),
        })
    }

    /// The internal temperature sensor
    pub fn temperature_sensor(manager: Arc<TransportManager>) -> Result<Self> {
        Self::new(manager, ADC_TEMP, DEFAULT_READ_RESOLUTION)
    }

    pub fn adc_channel(&self) -> u8 {
        self.adc
    }

    pub fn resolution(&self) -> u8 {
        *lock(&self.resolution)
    }

    pub fn set_resolution(&self, bits: u8) -> Result<()> {
        *lock(&self.resolution) = check_resolution(bits)?;
        Ok(())
    }

    /// One conversion scaled to the configured resolution
    pub fn read_u16(&self) -> Result<u16> {
        let request = command(PacketType::AnalogRead, &[self.adc, self.resolution()])?;
        let response = self.request(request)?;
        let channel = response.read_u8(0)?;
        if channel != self.adc {
            warn!(
                "ANALOG_READ answered for channel {} instead of {}",
                channel, self.adc
            );
        }
        Ok(response.read_u16(1)?)
    }

    /// Die temperature in degrees Celsius
    pub fn read_temperature(&self) -> Result<f32> {
        let response = self.request(command(PacketType::AnalogReadTemp, &[])?)?;
        Ok(response.read_f32(0)?)
    }

    pub fn deinit(&self) -> Result<()> {
        let channel = self.channel();
        let request = command(PacketType::AnalogDeinit, &[self.pin, AnalogMode::Adc.into()])?;
        self.manager.request(channel, request)?;
        self.binding.clear(channel);
        Ok(())
    }
}

impl Peripheral for AnalogIn {
    fn manager(&self) -> &TransportManager {
        &self.manager
    }

    fn binding(&self) -> &ChannelBinding {
        &self.binding
    }

    fn initialize(&self, channel: u8) -> Result<()> {
        let sent = [self.pin, AnalogMode::Adc.into()];
        let response = self
            .manager
            .request(channel, command(PacketType::AnalogInit, &sent)?)?;
        check_echo("ANALOG_INIT", &sent, &response);
        Ok(())
    }
}

#[derive(Debug)]
struct PwmState {
    resolution: u8,
    slice: Option<u8>,
    duty: f32,
}

/// One PWM output
pub struct AnalogOut {
    manager: Arc<TransportManager>,
    binding: ChannelBinding,
    pin: u8,
    count_top: u32,
    period: Duration,
    state: Mutex<PwmState>,
}

impl AnalogOut {
    pub fn new(manager: Arc<TransportManager>, pin: u8, resolution: u8) -> Result<Self> {
        Self::with_period(manager, pin, resolution, DEFAULT_COUNT_TOP, DEFAULT_PWM_PERIOD)
    }

    pub fn with_period(
        manager: Arc<TransportManager>,
        pin: u8,
        resolution: u8,
        count_top: u32,
        period: Duration,
    ) -> Result<Self> {
        if count_top == 0 {
            return Err(HostError::invalid("pwm count top", 0u32));
        }
        Ok(Self {
            manager,
            binding: ChannelBinding::new(),
            pin: check_pin(pin)?,
            count_top,
            period,
            state: Mutex::new(PwmState {
                resolution: check_resolution(resolution)?,
                slice: None,
                duty: 0.0,
            }),
        })
    }

    pub fn set_resolution(&self, bits: u8) -> Result<()> {
        lock(&self.state).resolution = check_resolution(bits)?;
        Ok(())
    }

    /// PWM slice the device assigned, once initialized
    pub fn slice(&self) -> Option<u8> {
        lock(&self.state).slice
    }

    /// Duty cycle (0.0..=1.0) the device applied on the last write
    pub fn duty(&self) -> f32 {
        lock(&self.state).duty
    }

    /// Set the output to `value` out of the configured resolution's full scale
    pub fn write_u16(&self, value: u16) -> Result<()> {
        self.ensure_initialized()?;
        let (slice, resolution) = {
            let state = lock(&self.state);
            (state.slice.unwrap_or(0), state.resolution)
        };
        let mut request = command(PacketType::AnalogWrite, &[self.pin])?;
        request.append_u32(slice as u32)?;
        request.append_u16(value)?;
        request.append_u32(self.count_top)?;
        request.append_u8(resolution)?;

        let response = self.request(request)?;
        lock(&self.state).duty = response.read_f32(0)?;
        Ok(())
    }

    /// Set the output as a fraction of full scale
    pub fn write(&self, duty: f32) -> Result<()> {
        let full = (1u32 << lock(&self.state).resolution) - 1;
        let value = (duty.clamp(0.0, 1.0) * full as f32).round() as u16;
        self.write_u16(value)
    }

    pub fn deinit(&self) -> Result<()> {
        let channel = self.channel();
        let slice = self.slice().unwrap_or(0);
        let request = command(
            PacketType::AnalogDeinit,
            &[self.pin, AnalogMode::Pwm.into(), slice],
        )?;
        self.manager.request(channel, request)?;
        self.binding.clear(channel);
        Ok(())
    }
}

impl Peripheral for AnalogOut {
    fn manager(&self) -> &TransportManager {
        &self.manager
    }

    fn binding(&self) -> &ChannelBinding {
        &self.binding
    }

    fn initialize(&self, channel: u8) -> Result<()> {
        let mut request = command(PacketType::AnalogInit, &[self.pin, AnalogMode::Pwm.into()])?;
        request.append_u32(self.count_top)?;
        request.append_u64(self.period.as_micros() as u64)?;

        let response = self.manager.request(channel, request.clone())?;
        check_echo("ANALOG_INIT", request.payload(), &response);

        let slice = response.read_u8(request.payload_len())?;
        let pwm_channel = response.read_u8(request.payload_len() + 1)?;
        if slice > MAX_SLICE || pwm_channel > 1 {
            warn!(
                "ANALOG_INIT reported slice {} channel {} for pin {}",
                slice, pwm_channel, self.pin
            );
        }
        lock(&self.state).slice = Some(slice);
        Ok(())
    }
}
