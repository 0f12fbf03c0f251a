//! Hardware driver seams
//!
//! Tasks program peripherals only through these traits. Register-level
//! drivers implement them on the target; [`crate::sim`] implements them in
//! memory. Interrupt callbacks are plain closures registered with the driver.

use protocol::{BitOrder, GpioEvents, Parity, PinDirection, PinMode};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// GPIO interrupt callback: `(pin, triggered events)`
pub type GpioIrqHandler = Arc<dyn Fn(u8, GpioEvents) + Send + Sync>;

/// UART receive callback, called once per received byte
pub type UartRxHandler = Arc<dyn Fn(u8) + Send + Sync>;

pub trait GpioDriver: Send {
    fn init(&mut self, pin: u8, direction: PinDirection);
    fn deinit(&mut self, pin: u8);
    fn set_pulls(&mut self, pin: u8, mode: PinMode);
    fn set_direction(&mut self, pin: u8, direction: PinDirection);
    fn write(&mut self, pin: u8, high: bool);
    fn read(&self, pin: u8) -> bool;

    /// Enable or disable interrupts for `events` on `pin`
    ///
    /// `handler` replaces the current callback when enabling.
    fn set_irq(&mut self, pin: u8, events: GpioEvents, handler: Option<GpioIrqHandler>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiPins {
    pub sck: u8,
    pub tx: u8,
    pub rx: u8,
    pub cs: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiFormat {
    pub bits: u8,
    pub cpol: bool,
    pub cpha: bool,
    pub order: BitOrder,
}

pub trait SpiDriver: Send {
    /// Returns the frequency actually configured
    fn init(&mut self, instance: u8, pins: SpiPins, freq_hz: u32) -> u32;
    fn deinit(&mut self, instance: u8);
    fn set_frequency(&mut self, instance: u8, freq_hz: u32) -> u32;
    fn set_format(&mut self, instance: u8, format: SpiFormat);

    /// Returns the number of bytes clocked out
    fn write(&mut self, instance: u8, data: &[u8]) -> usize;

    /// Clock `buf.len()` bytes in while repeatedly sending `fill`
    fn read(&mut self, instance: u8, fill: u8, buf: &mut [u8]) -> usize;

    /// Full-duplex transfer of `tx.len()` bytes
    fn transfer(&mut self, instance: u8, tx: &[u8], rx: &mut [u8]) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum I2cError {
    #[error("address not acknowledged")]
    Nack,
    #[error("bus timeout")]
    Timeout,
}

pub trait I2cDriver: Send {
    fn init(&mut self, instance: u8, sda: u8, scl: u8, freq_hz: u32);
    fn deinit(&mut self, instance: u8, sda: u8, scl: u8);
    fn set_frequency(&mut self, instance: u8, freq_hz: u32) -> u32;

    fn write(
        &mut self,
        instance: u8,
        addr: u8,
        data: &[u8],
        nostop: bool,
        timeout: Duration,
    ) -> Result<usize, I2cError>;

    fn read(
        &mut self,
        instance: u8,
        addr: u8,
        buf: &mut [u8],
        nostop: bool,
        timeout: Duration,
    ) -> Result<usize, I2cError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UartFormat {
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
}

pub trait UartDriver: Send {
    fn is_enabled(&self, instance: u8) -> bool;
    fn init(&mut self, instance: u8, tx: u8, rx: u8, baud: u32) -> u32;
    fn deinit(&mut self, instance: u8);
    fn set_baud(&mut self, instance: u8, baud: u32) -> u32;
    fn set_format(&mut self, instance: u8, format: UartFormat);
    fn set_flow_control(&mut self, instance: u8, rts: bool, cts: bool);
    fn set_break(&mut self, instance: u8, on: bool);
    fn is_readable(&self, instance: u8) -> bool;
    fn is_writable(&self, instance: u8) -> bool;
    fn getc(&mut self, instance: u8) -> Option<u8>;
    fn putc(&mut self, instance: u8, byte: u8);

    /// Returns the number of bytes accepted
    fn write(&mut self, instance: u8, data: &[u8]) -> usize;

    /// Returns the number of bytes read into `buf`
    fn read(&mut self, instance: u8, buf: &mut [u8]) -> usize;

    /// Route received bytes to `handler` instead of the receive FIFO
    fn set_rx_irq(&mut self, instance: u8, handler: Option<UartRxHandler>);
}

pub trait AnalogDriver: Send {
    fn adc_init(&mut self, pin: u8);
    fn set_temp_sensor(&mut self, enabled: bool);

    /// Raw 12-bit conversion of `channel`
    fn adc_read(&mut self, channel: u8) -> u16;

    fn pwm_slice(&self, pin: u8) -> u8;
    fn pwm_channel(&self, pin: u8) -> u8;
    fn sys_clock_hz(&self) -> u32;
    fn pwm_init(&mut self, pin: u8, slice: u8, wrap: u32, clkdiv: f32);
    fn pwm_set_level(&mut self, pin: u8, level: u32);
    fn pwm_set_enabled(&mut self, slice: u8, enabled: bool);
    fn deinit(&mut self, pin: u8);
}

/// Board-level services
pub trait Board: Send + Sync {
    fn set_led(&self, on: bool);

    /// Reboot the chip
    fn reset(&self);
}

/// The complete set of drivers handed to the firmware at boot
pub struct Peripherals {
    pub gpio: Box<dyn GpioDriver>,
    pub spi: Box<dyn SpiDriver>,
    pub i2c: Box<dyn I2cDriver>,
    pub uart: Box<dyn UartDriver>,
    pub analog: Box<dyn AnalogDriver>,
    pub board: Arc<dyn Board>,
}
