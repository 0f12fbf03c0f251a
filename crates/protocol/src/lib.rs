//! Wire protocol for the USB peripheral bridge
//!
//! This crate defines the fixed-format frames exchanged between the host and
//! the bridge device: the [`Packet`] buffer with its big-endian payload
//! codec, the [`PacketType`] and [`Status`] catalogs, the USB identity of the
//! device and the parameter encodings used inside command payloads.
//!
//! # Example
//!
//! ```
//! use protocol::{Packet, PacketType, SequenceCounter, Status};
//!
//! let mut seq = SequenceCounter::new();
//!
//! let mut request = Packet::command(PacketType::I2cWrite);
//! request.set_sequence(seq.next_sequence());
//! request.append_bytes(&[0, 0x50, 1, 0, 0xaa]).unwrap();
//!
//! // The device answers with the same type and sequence number
//! let mut response = Packet::new();
//! response.clone_header(&request);
//! response.set_status(Status::I2cNack);
//! assert_eq!(response.sequence(), request.sequence());
//! ```

pub mod error;
pub mod packet;
pub mod params;
pub mod sequence;
pub mod types;
pub mod usb;

pub use error::{ProtocolError, Result};
pub use packet::{HEADER_SIZE, MAX_PACKET_SIZE, MAX_PAYLOAD_SIZE, Packet};
pub use params::{
    AnalogMode, BitOrder, FlowControl, GpioEvent, GpioEvents, Parity, PinDirection, PinMode,
    SerialIrq,
};
pub use sequence::SequenceCounter;
pub use types::{PacketType, Status};
pub use usb::{Interface, PRODUCT_ID, VENDOR_ID};
