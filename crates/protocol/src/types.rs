//! Packet type and status catalogs
//!
//! Both catalogs travel as a single header byte. Type values are grouped by
//! peripheral and numbered sequentially from 1; `NONE` is `0xFF`.

use crate::error::{ProtocolError, Result};
use std::fmt;

/// Declares a `u8`-backed wire enum together with its decoder and wire names.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident : $err:ident {
            $($variant:ident = $value:expr => $label:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        $vis enum $name {
            $($variant = $value,)+
        }

        impl $name {
            /// Every variant, in wire order
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            /// Wire name, as printed in packet dumps
            pub const fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $label,)+
                }
            }
        }

        impl TryFrom<u8> for $name {
            type Error = ProtocolError;

            fn try_from(value: u8) -> Result<Self> {
                match value {
                    $(v if v == $value => Ok($name::$variant),)+
                    other => Err(ProtocolError::$err(other)),
                }
            }
        }

        impl From<$name> for u8 {
            fn from(value: $name) -> u8 {
                value as u8
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

wire_enum! {
    /// Command and event types
    pub enum PacketType: InvalidMessageType {
        // System
        SysInit = 1 => "SYS_INIT",
        SysDeinit = 2 => "SYS_DEINIT",
        SysHwReset = 3 => "SYS_HW_RESET",
        SysSwReset = 4 => "SYS_SW_RESET",
        SysGetFwVer = 5 => "SYS_GET_FW_VER",

        // GPIO
        GpioInit = 6 => "GPIO_INIT",
        GpioDeinit = 7 => "GPIO_DEINIT",
        GpioEvent = 8 => "GPIO_EVENT",
        GpioSetMode = 9 => "GPIO_SET_MODE",
        GpioSetValue = 10 => "GPIO_SET_VALUE",
        GpioGetValue = 11 => "GPIO_GET_VALUE",
        GpioSetIrq = 12 => "GPIO_SET_IRQ",
        GpioSetDir = 13 => "GPIO_SET_DIR",
        GpioPulseIn = 14 => "GPIO_PULSE_IN",

        // SPI
        SpiInit = 15 => "SPI_INIT",
        SpiDeinit = 16 => "SPI_DEINIT",
        SpiSetFreq = 17 => "SPI_SET_FREQ",
        SpiWrite = 18 => "SPI_WRITE",
        SpiRead = 19 => "SPI_READ",
        SpiTransfer = 20 => "SPI_TRANSFER",
        SpiSetFormat = 21 => "SPI_SET_FORMAT",

        // I2C
        I2cInit = 22 => "I2C_INIT",
        I2cDeinit = 23 => "I2C_DEINIT",
        I2cSetFreq = 24 => "I2C_SET_FREQ",
        I2cSetTimeout = 25 => "I2C_SET_TIMEOUT",
        I2cWrite = 26 => "I2C_WRITE",
        I2cRead = 27 => "I2C_READ",

        // Analog
        AnalogInit = 28 => "ANALOG_INIT",
        AnalogDeinit = 29 => "ANALOG_DEINIT",
        AnalogWrite = 30 => "ANALOG_WRITE",
        AnalogRead = 31 => "ANALOG_READ",
        AnalogReadTemp = 32 => "ANALOG_READ_TEMP",

        // UART
        SerialInit = 33 => "SERIAL_INIT",
        SerialDeinit = 34 => "SERIAL_DEINIT",
        SerialSetBaud = 35 => "SERIAL_SET_BAUD",
        SerialSetFormat = 36 => "SERIAL_SET_FORMAT",
        SerialSetIrq = 37 => "SERIAL_SET_IRQ",
        SerialSetFlowControl = 38 => "SERIAL_SET_FLOW_CONTROL",
        SerialReadable = 39 => "SERIAL_READABLE",
        SerialWritable = 40 => "SERIAL_WRITABLE",
        SerialSetBreak = 41 => "SERIAL_SET_BREAK",
        SerialGetc = 42 => "SERIAL_GETC",
        SerialPutc = 43 => "SERIAL_PUTC",
        SerialWrite = 44 => "SERIAL_WRITE",
        SerialRead = 45 => "SERIAL_READ",
        SerialEvent = 46 => "SERIAL_EVENT",

        None = 0xFF => "NONE",
    }
}

impl PacketType {
    /// Unsolicited frames produced by the device and carried on the event interface
    pub const fn is_event(self) -> bool {
        matches!(self, PacketType::GpioEvent | PacketType::SerialEvent)
    }

    /// Commands handled by the dispatcher itself rather than a peripheral task
    pub const fn is_system(self) -> bool {
        matches!(
            self,
            PacketType::SysInit
                | PacketType::SysDeinit
                | PacketType::SysHwReset
                | PacketType::SysSwReset
                | PacketType::SysGetFwVer
        )
    }
}

wire_enum! {
    /// Header status byte
    pub enum Status: InvalidStatus {
        None = 0 => "NONE",
        Cmd = 1 => "CMD",
        Rsp = 2 => "RSP",
        Err = 3 => "ERR",
        I2cNack = 4 => "RSP_I2C_NACK",
        I2cTimeout = 5 => "RSP_I2C_TIMEOUT",
        I2cBufOverflow = 6 => "RSP_I2C_BUF_OVERFLOW",
        SerialNotReadable = 7 => "RSP_SERIAL_NOT_READABLE",
        SerialNotWritable = 8 => "RSP_SERIAL_NOT_WRITABLE",
        SpiBusy = 9 => "RSP_SPI_BUSY",
        SpiNotReadable = 10 => "RSP_SPI_NOT_READABLE",
        SpiNotWritable = 11 => "RSP_SPI_NOT_WRITABLE",
        SpiLenMismatch = 12 => "RSP_SPI_LEN_MISMATCH",
    }
}

impl Status {
    /// A peripheral-level failure reported in place of a plain response
    pub const fn is_failure(self) -> bool {
        !matches!(self, Status::None | Status::Cmd | Status::Rsp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_values_are_sequential() {
        let numbered: Vec<u8> = PacketType::ALL
            .iter()
            .filter(|t| **t != PacketType::None)
            .map(|t| u8::from(*t))
            .collect();
        let expected: Vec<u8> = (1..=46).collect();
        assert_eq!(numbered, expected);
        assert_eq!(u8::from(PacketType::None), 0xFF);
    }

    #[test]
    fn test_type_roundtrip_through_byte() {
        for ty in PacketType::ALL {
            assert_eq!(PacketType::try_from(u8::from(*ty)), Ok(*ty));
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert_eq!(
            PacketType::try_from(0),
            Err(ProtocolError::InvalidMessageType(0))
        );
        assert_eq!(
            PacketType::try_from(47),
            Err(ProtocolError::InvalidMessageType(47))
        );
    }

    #[test]
    fn test_event_types() {
        assert!(PacketType::GpioEvent.is_event());
        assert!(PacketType::SerialEvent.is_event());
        assert!(!PacketType::GpioSetValue.is_event());
    }

    #[test]
    fn test_status_failure_classification() {
        assert!(!Status::Rsp.is_failure());
        assert!(Status::Err.is_failure());
        assert!(Status::I2cNack.is_failure());
        assert_eq!(Status::try_from(13), Err(ProtocolError::InvalidStatus(13)));
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(PacketType::SerialSetFlowControl.as_str(), "SERIAL_SET_FLOW_CONTROL");
        assert_eq!(Status::SpiLenMismatch.to_string(), "RSP_SPI_LEN_MISMATCH");
    }
}
