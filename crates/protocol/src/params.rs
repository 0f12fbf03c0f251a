//! Board limits and command parameter encodings
//!
//! Values here are the single bytes (or the `u32` event mask) carried in
//! command payloads.

use crate::error::{ProtocolError, Result};

/// Number of usable GPIO pins on the target
pub const TARGET_PINS_COUNT: u8 = 30;

pub const UART_INSTANCES: u8 = 2;
pub const SPI_INSTANCES: u8 = 2;
pub const I2C_INSTANCES: u8 = 2;

/// First pin wired to an ADC input; A0..A3 are GP26..GP29
pub const ADC_FIRST_PIN: u8 = 26;
pub const ADC_PIN_COUNT: u8 = 4;

/// Pseudo-pin selecting the internal temperature sensor
pub const ADC_TEMP: u8 = 0xF0;

/// ADC channel of the internal temperature sensor
pub const ADC_TEMP_CHANNEL: u8 = 4;

/// Native ADC resolution in bits
pub const ADC_NATIVE_BITS: u8 = 12;

/// On-board LED used for the liveness pattern
pub const LED_PIN: u8 = 25;

/// Maximum GPIO events carried by one `GPIO_EVENT` frame
pub const GPIO_EVENTS_PER_FRAME: usize = 7;

/// Size of one GPIO event item on the wire
pub const GPIO_EVENT_ITEM_SIZE: usize = 4;

/// Map an analog pin to its ADC channel
pub fn adc_channel(pin: u8) -> Option<u8> {
    match pin {
        ADC_TEMP => Some(ADC_TEMP_CHANNEL),
        p if (ADC_FIRST_PIN..ADC_FIRST_PIN + ADC_PIN_COUNT).contains(&p) => {
            Some(p - ADC_FIRST_PIN)
        }
        _ => None,
    }
}

macro_rules! param_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident = $value:expr,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        #[repr(u8)]
        pub enum $name {
            $($(#[$vmeta])* $variant = $value,)+
        }

        impl TryFrom<u8> for $name {
            type Error = ProtocolError;

            fn try_from(value: u8) -> Result<Self> {
                match value {
                    $(v if v == $value => Ok($name::$variant),)+
                    other => Err(ProtocolError::InvalidParameter {
                        name: stringify!($name),
                        value: other,
                    }),
                }
            }
        }

        impl From<$name> for u8 {
            fn from(value: $name) -> u8 {
                value as u8
            }
        }
    };
}

param_enum! {
    /// Pull and drive configuration of a GPIO pin
    pub enum PinMode {
        #[default]
        PullNone = 0,
        PullUp = 1,
        PullDown = 2,
        OpenDrainPullUp = 3,
        OpenDrainNoPull = 4,
        OpenDrainPullDown = 5,
    }
}

impl PinMode {
    pub const fn is_open_drain(self) -> bool {
        matches!(
            self,
            PinMode::OpenDrainPullUp | PinMode::OpenDrainNoPull | PinMode::OpenDrainPullDown
        )
    }
}

param_enum! {
    pub enum PinDirection {
        #[default]
        Input = 0,
        Output = 1,
    }
}

param_enum! {
    /// UART parity
    pub enum Parity {
        #[default]
        None = 0,
        Odd = 1,
        Even = 2,
        Forced1 = 3,
        Forced0 = 4,
    }
}

param_enum! {
    /// UART hardware flow control
    pub enum FlowControl {
        #[default]
        None = 0,
        Rts = 1,
        Cts = 2,
        RtsCts = 3,
    }
}

param_enum! {
    /// UART interrupt source
    pub enum SerialIrq {
        #[default]
        Rx = 0,
        Tx = 1,
    }
}

param_enum! {
    /// Function selected by `ANALOG_INIT`
    pub enum AnalogMode {
        #[default]
        Adc = 0,
        Pwm = 1,
    }
}

param_enum! {
    /// SPI bit order
    pub enum BitOrder {
        LsbFirst = 0,
        #[default]
        MsbFirst = 1,
    }
}

/// GPIO interrupt trigger mask, also the low half of a GPIO event item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GpioEvents(u32);

impl GpioEvents {
    pub const LEVEL_LOW: GpioEvents = GpioEvents(0x1);
    pub const LEVEL_HIGH: GpioEvents = GpioEvents(0x2);
    pub const FALL_EDGE: GpioEvents = GpioEvents(0x4);
    pub const RISE_EDGE: GpioEvents = GpioEvents(0x8);
    pub const ALL: GpioEvents = GpioEvents(0xf);

    pub const fn empty() -> Self {
        GpioEvents(0)
    }

    /// Keep only the known trigger bits
    pub const fn from_bits_truncate(bits: u32) -> Self {
        GpioEvents(bits & Self::ALL.0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: GpioEvents) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: GpioEvents) -> bool {
        self.0 & other.0 != 0
    }
}

impl std::ops::BitOr for GpioEvents {
    type Output = GpioEvents;

    fn bitor(self, rhs: GpioEvents) -> GpioEvents {
        GpioEvents(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for GpioEvents {
    fn bitor_assign(&mut self, rhs: GpioEvents) {
        self.0 |= rhs.0;
    }
}

impl std::ops::BitAnd for GpioEvents {
    type Output = GpioEvents;

    fn bitand(self, rhs: GpioEvents) -> GpioEvents {
        GpioEvents(self.0 & rhs.0)
    }
}

/// One GPIO interrupt occurrence, packed on the wire as `(pin << 16) | events`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpioEvent {
    pub pin: u8,
    pub events: GpioEvents,
}

impl GpioEvent {
    pub fn new(pin: u8, events: GpioEvents) -> Self {
        Self { pin, events }
    }

    pub const fn to_wire(self) -> u32 {
        ((self.pin as u32) << 16) | self.events.bits()
    }

    pub const fn from_wire(item: u32) -> Self {
        Self {
            pin: (item >> 16) as u8,
            events: GpioEvents::from_bits_truncate(item & 0xffff),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adc_channel_mapping() {
        assert_eq!(adc_channel(26), Some(0));
        assert_eq!(adc_channel(29), Some(3));
        assert_eq!(adc_channel(ADC_TEMP), Some(ADC_TEMP_CHANNEL));
        assert_eq!(adc_channel(25), None);
        assert_eq!(adc_channel(30), None);
    }

    #[test]
    fn test_param_decoding() {
        assert_eq!(PinMode::try_from(3), Ok(PinMode::OpenDrainPullUp));
        assert!(PinMode::try_from(6).is_err());
        assert_eq!(FlowControl::try_from(3), Ok(FlowControl::RtsCts));
        assert_eq!(u8::from(Parity::Forced0), 4);
    }

    #[test]
    fn test_gpio_event_wire_packing() {
        let evt = GpioEvent::new(17, GpioEvents::RISE_EDGE | GpioEvents::LEVEL_HIGH);
        assert_eq!(evt.to_wire(), 0x0011_000a);
        assert_eq!(GpioEvent::from_wire(0x0011_000a), evt);
    }

    #[test]
    fn test_gpio_events_flags() {
        let mask = GpioEvents::FALL_EDGE | GpioEvents::RISE_EDGE;
        assert!(mask.contains(GpioEvents::FALL_EDGE));
        assert!(!mask.contains(GpioEvents::LEVEL_LOW));
        assert!(mask.intersects(GpioEvents::ALL));
        assert_eq!(GpioEvents::from_bits_truncate(0xff).bits(), 0xf);
    }
}
