//! Wire packet
//!
//! Every frame exchanged with the device is a 4-byte header followed by at
//! most 60 payload bytes:
//!
//! ```text
//! offset 0: type           (1 byte)
//! offset 1: sequence       (1 byte)
//! offset 2: payload_length (1 byte, 0..60)
//! offset 3: status         (1 byte)
//! offset 4..: payload      (multi-byte fields big-endian)
//! ```
//!
//! The backing store is a fixed array so packets can live on the stack or in
//! a pre-allocated pool and be reused without allocating.
//!
//! # Example
//!
//! ```
//! use protocol::{Packet, PacketType, Status};
//!
//! let mut pkt = Packet::command(PacketType::GpioSetValue);
//! pkt.append_u8(10).unwrap();
//! pkt.append_u8(1).unwrap();
//!
//! let decoded = Packet::decode(pkt.as_bytes()).unwrap();
//! assert_eq!(decoded.packet_type(), Ok(PacketType::GpioSetValue));
//! assert_eq!(decoded.status(), Ok(Status::Cmd));
//! assert_eq!(decoded.payload(), &[10, 1]);
//! ```

use crate::error::{ProtocolError, Result};
use crate::types::{PacketType, Status};
use byteorder::{BigEndian, ByteOrder};
use std::fmt;

/// Maximum size of a frame, header included
pub const MAX_PACKET_SIZE: usize = 64;

/// Size of the packet header
pub const HEADER_SIZE: usize = 4;

/// Largest payload a full-size packet can hold
pub const MAX_PAYLOAD_SIZE: usize = MAX_PACKET_SIZE - HEADER_SIZE;

const TYPE: usize = 0;
const SEQ_NUM: usize = 1;
const PLD_LEN: usize = 2;
const STATUS: usize = 3;

/// A single protocol frame
#[derive(Clone)]
pub struct Packet {
    buf: [u8; MAX_PACKET_SIZE],
    capacity: usize,
}

impl Packet {
    /// Create a full-size packet
    pub const fn new() -> Self {
        Self {
            buf: [0; MAX_PACKET_SIZE],
            capacity: MAX_PACKET_SIZE,
        }
    }

    /// Create a packet whose total size, header included, is `capacity`
    ///
    /// Values above 64 are clamped to 64 and values below the header size are
    /// raised to it, so a packet of capacity `c` holds `min(c, 64) - 4`
    /// payload bytes (none for `c <= 4`).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: [0; MAX_PACKET_SIZE],
            capacity: capacity.clamp(HEADER_SIZE, MAX_PACKET_SIZE),
        }
    }

    /// Create a full-size command packet of the given type
    pub fn command(packet_type: PacketType) -> Self {
        let mut pkt = Self::new();
        pkt.set_type(packet_type);
        pkt.set_status(Status::Cmd);
        pkt
    }

    /// Decode a received frame
    ///
    /// The frame must hold at least the header, at most 64 bytes, and every
    /// payload byte its header declares. Trailing bytes past the declared
    /// payload are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut pkt = Self::new();
        pkt.fill_from(bytes)?;
        Ok(pkt)
    }

    /// Overwrite this packet with a received frame, keeping its capacity
    pub fn fill_from(&mut self, bytes: &[u8]) -> Result<()> {
        Self::check_frame(bytes, self.capacity)?;
        self.buf[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Validate a frame of `bytes.len()` received bytes against `capacity`
    pub fn check_frame(bytes: &[u8], capacity: usize) -> Result<()> {
        if bytes.len() < HEADER_SIZE {
            return Err(ProtocolError::IncompleteFrame {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        if bytes.len() > capacity {
            return Err(ProtocolError::FrameTooLarge {
                size: bytes.len(),
                max: capacity,
            });
        }
        let declared = bytes[PLD_LEN] as usize;
        if HEADER_SIZE + declared > bytes.len() {
            return Err(ProtocolError::InvalidPayloadLength {
                declared,
                max: bytes.len() - HEADER_SIZE,
            });
        }
        Ok(())
    }

    /// Total buffer size, header included
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Payload bytes this packet can hold in total
    pub fn max_payload(&self) -> usize {
        self.capacity - HEADER_SIZE
    }

    /// Payload bytes still free
    pub fn free_payload_slots(&self) -> usize {
        self.capacity - self.len()
    }

    /// Bytes on the wire: header plus filled payload
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        HEADER_SIZE + self.payload_len()
    }

    /// True when no payload has been appended
    pub fn is_empty(&self) -> bool {
        self.payload_len() == 0
    }

    /// Clear the header; payload bytes are left in place
    pub fn reset(&mut self) {
        self.buf[TYPE] = 0;
        self.buf[SEQ_NUM] = 0;
        self.buf[PLD_LEN] = 0;
        self.buf[STATUS] = 0;
    }

    /// Copy type and sequence number from `other`
    pub fn clone_header(&mut self, other: &Packet) {
        self.buf[TYPE] = other.buf[TYPE];
        self.buf[SEQ_NUM] = other.buf[SEQ_NUM];
    }

    pub fn packet_type(&self) -> Result<PacketType> {
        PacketType::try_from(self.buf[TYPE])
    }

    /// Raw type byte, for logging frames whose type did not decode
    pub fn raw_type(&self) -> u8 {
        self.buf[TYPE]
    }

    pub fn set_type(&mut self, packet_type: PacketType) {
        self.buf[TYPE] = packet_type.into();
    }

    pub fn sequence(&self) -> u8 {
        self.buf[SEQ_NUM]
    }

    pub fn set_sequence(&mut self, sequence: u8) {
        self.buf[SEQ_NUM] = sequence;
    }

    pub fn status(&self) -> Result<Status> {
        Status::try_from(self.buf[STATUS])
    }

    pub fn set_status(&mut self, status: Status) {
        self.buf[STATUS] = status.into();
    }

    pub fn payload_len(&self) -> usize {
        self.buf[PLD_LEN] as usize
    }

    /// Filled payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.buf[HEADER_SIZE..self.len()]
    }

    /// Header and filled payload, ready to be written to the transport
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len()]
    }

    /// The whole buffer up to capacity, for receiving a frame in place
    ///
    /// Call [`Packet::check_frame`] on the received prefix afterwards.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..self.capacity]
    }

    /// Free payload area, for drivers that fill the response directly
    ///
    /// Commit the bytes written with [`Packet::grow_payload`].
    pub fn spare_payload_mut(&mut self) -> &mut [u8] {
        let start = self.len();
        &mut self.buf[start..self.capacity]
    }

    /// Extend the payload by `n` bytes already written into the spare area
    pub fn grow_payload(&mut self, n: usize) -> Result<()> {
        self.reserve(n)?;
        self.buf[PLD_LEN] += n as u8;
        Ok(())
    }

    pub fn append_u8(&mut self, value: u8) -> Result<()> {
        let at = self.reserve(1)?;
        self.buf[at] = value;
        self.commit(1);
        Ok(())
    }

    pub fn append_u16(&mut self, value: u16) -> Result<()> {
        let at = self.reserve(2)?;
        BigEndian::write_u16(&mut self.buf[at..], value);
        self.commit(2);
        Ok(())
    }

    pub fn append_u32(&mut self, value: u32) -> Result<()> {
        let at = self.reserve(4)?;
        BigEndian::write_u32(&mut self.buf[at..], value);
        self.commit(4);
        Ok(())
    }

    pub fn append_u64(&mut self, value: u64) -> Result<()> {
        let at = self.reserve(8)?;
        BigEndian::write_u64(&mut self.buf[at..], value);
        self.commit(8);
        Ok(())
    }

    pub fn append_f32(&mut self, value: f32) -> Result<()> {
        let at = self.reserve(4)?;
        BigEndian::write_f32(&mut self.buf[at..], value);
        self.commit(4);
        Ok(())
    }

    pub fn append_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let at = self.reserve(bytes.len())?;
        self.buf[at..at + bytes.len()].copy_from_slice(bytes);
        self.commit(bytes.len());
        Ok(())
    }

    /// Append `count` copies of `byte`
    pub fn append_repeated(&mut self, byte: u8, count: usize) -> Result<()> {
        let at = self.reserve(count)?;
        self.buf[at..at + count].fill(byte);
        self.commit(count);
        Ok(())
    }

    /// Overwrite an already filled payload byte
    pub fn set_u8(&mut self, index: usize, value: u8) -> Result<()> {
        self.check_read(index, 1)?;
        self.buf[HEADER_SIZE + index] = value;
        Ok(())
    }

    pub fn read_u8(&self, offset: usize) -> Result<u8> {
        Ok(self.read_bytes(offset, 1)?[0])
    }

    pub fn read_u16(&self, offset: usize) -> Result<u16> {
        Ok(BigEndian::read_u16(self.read_bytes(offset, 2)?))
    }

    pub fn read_u32(&self, offset: usize) -> Result<u32> {
        Ok(BigEndian::read_u32(self.read_bytes(offset, 4)?))
    }

    pub fn read_u64(&self, offset: usize) -> Result<u64> {
        Ok(BigEndian::read_u64(self.read_bytes(offset, 8)?))
    }

    pub fn read_f32(&self, offset: usize) -> Result<f32> {
        Ok(BigEndian::read_f32(self.read_bytes(offset, 4)?))
    }

    /// Borrow `len` filled payload bytes starting at `offset`
    pub fn read_bytes(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.check_read(offset, len)?;
        let start = HEADER_SIZE + offset;
        Ok(&self.buf[start..start + len])
    }

    /// Payload bytes from `offset` to the end of the filled payload
    pub fn payload_from(&self, offset: usize) -> &[u8] {
        let start = (HEADER_SIZE + offset).min(self.len());
        &self.buf[start..self.len()]
    }

    /// True for frames carried on the event interface
    pub fn is_event(&self) -> bool {
        self.packet_type().is_ok_and(PacketType::is_event)
    }

    fn check_read(&self, offset: usize, size: usize) -> Result<()> {
        let length = self.payload_len();
        match offset.checked_add(size) {
            Some(end) if end <= length => Ok(()),
            _ => Err(ProtocolError::OutOfBounds {
                offset,
                size,
                length,
            }),
        }
    }

    /// Index of the first free byte if `n` more bytes fit
    fn reserve(&self, n: usize) -> Result<usize> {
        let available = self.free_payload_slots();
        if n > available {
            return Err(ProtocolError::PayloadOverflow {
                needed: n,
                available,
            });
        }
        Ok(self.len())
    }

    fn commit(&mut self, n: usize) {
        self.buf[PLD_LEN] += n as u8;
    }
}

impl Default for Packet {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("type", &self.raw_type())
            .field("sequence", &self.sequence())
            .field("status", &self.buf[STATUS])
            .field("capacity", &self.capacity)
            .field("payload", &self.payload())
            .finish()
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let type_name = self.packet_type().map_or("UNKNOWN", PacketType::as_str);
        let status_name = self.status().map_or("UNKNOWN", Status::as_str);
        write!(
            f,
            "Pkt: Typ: {} ({:#04x}), St: {}, Buf(Sz: {}, Len: {}), SeqN: {}, PldLen: {}, Pld:",
            type_name,
            self.raw_type(),
            status_name,
            self.capacity,
            self.len(),
            self.sequence(),
            self.payload_len()
        )?;
        for byte in self.payload() {
            write!(f, " {:02x}", byte)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_capacity() {
        let pkt = Packet::new();
        assert_eq!(pkt.capacity(), 64);
        assert_eq!(pkt.max_payload(), 60);
        assert_eq!(pkt.len(), HEADER_SIZE);
        assert!(pkt.is_empty());
    }

    #[test]
    fn test_capacity_clamped() {
        assert_eq!(Packet::with_capacity(0).max_payload(), 0);
        assert_eq!(Packet::with_capacity(3).capacity(), HEADER_SIZE);
        assert_eq!(Packet::with_capacity(10).max_payload(), 6);
        assert_eq!(Packet::with_capacity(1000).capacity(), MAX_PACKET_SIZE);
    }

    #[test]
    fn test_header_only_rejects_appends() {
        let mut pkt = Packet::with_capacity(0);
        let err = pkt.append_u8(1).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::PayloadOverflow {
                needed: 1,
                available: 0
            }
        );
        assert_eq!(pkt.payload_len(), 0);
    }

    #[test]
    fn test_overflow_leaves_payload_untouched() {
        let mut pkt = Packet::with_capacity(HEADER_SIZE + 5);
        pkt.append_u32(0xdead_beef).unwrap();
        assert!(pkt.append_u16(0x1234).is_err());
        assert!(pkt.append_f32(1.0).is_err());
        assert!(pkt.append_bytes(&[1, 2]).is_err());
        assert!(pkt.append_repeated(0, 2).is_err());
        assert_eq!(pkt.payload(), &[0xde, 0xad, 0xbe, 0xef]);
        pkt.append_u8(7).unwrap();
        assert_eq!(pkt.free_payload_slots(), 0);
    }

    #[test]
    fn test_big_endian_layout() {
        let mut pkt = Packet::new();
        pkt.append_u16(0x0102).unwrap();
        pkt.append_u32(0x0304_0506).unwrap();
        pkt.append_u64(0x0708_090a_0b0c_0d0e).unwrap();
        assert_eq!(
            pkt.payload(),
            &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14]
        );
        assert_eq!(pkt.read_u32(2), Ok(0x0304_0506));
    }

    #[test]
    fn test_read_past_payload() {
        let mut pkt = Packet::new();
        pkt.append_u8(1).unwrap();
        assert!(pkt.read_u16(0).is_err());
        assert!(pkt.read_u8(1).is_err());
        assert!(pkt.read_u8(usize::MAX).is_err());
        assert_eq!(pkt.read_u8(0), Ok(1));
    }

    #[test]
    fn test_clone_header_copies_type_and_sequence_only() {
        let mut src = Packet::command(PacketType::SpiWrite);
        src.set_sequence(42);
        src.append_u8(9).unwrap();

        let mut dst = Packet::new();
        dst.set_status(Status::Err);
        dst.clone_header(&src);

        assert_eq!(dst.packet_type(), Ok(PacketType::SpiWrite));
        assert_eq!(dst.sequence(), 42);
        assert_eq!(dst.status(), Ok(Status::Err));
        assert_eq!(dst.payload_len(), 0);
    }

    #[test]
    fn test_reset_keeps_payload_bytes() {
        let mut pkt = Packet::command(PacketType::GpioInit);
        pkt.append_u8(0xaa).unwrap();
        pkt.reset();
        assert_eq!(pkt.raw_type(), 0);
        assert_eq!(pkt.sequence(), 0);
        assert_eq!(pkt.payload_len(), 0);
        assert_eq!(pkt.buffer_mut()[HEADER_SIZE], 0xaa);
    }

    #[test]
    fn test_set_u8_within_payload() {
        let mut pkt = Packet::new();
        pkt.append_u8(0).unwrap();
        pkt.set_u8(0, 5).unwrap();
        assert_eq!(pkt.payload(), &[5]);
        assert!(pkt.set_u8(1, 5).is_err());
    }

    #[test]
    fn test_grow_payload_after_direct_write() {
        let mut pkt = Packet::new();
        pkt.append_u8(0xff).unwrap();
        pkt.spare_payload_mut()[..3].copy_from_slice(&[1, 2, 3]);
        pkt.grow_payload(3).unwrap();
        assert_eq!(pkt.payload(), &[0xff, 1, 2, 3]);
        assert!(pkt.grow_payload(57).is_err());
    }

    #[test]
    fn test_decode_validation() {
        assert!(matches!(
            Packet::decode(&[1, 2]),
            Err(ProtocolError::IncompleteFrame { .. })
        ));
        assert!(matches!(
            Packet::decode(&[0u8; 65]),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
        assert!(matches!(
            Packet::decode(&[10, 1, 3, 2, 0]),
            Err(ProtocolError::InvalidPayloadLength { .. })
        ));
        let pkt = Packet::decode(&[10, 1, 2, 2, 10, 1]).unwrap();
        assert_eq!(pkt.payload(), &[10, 1]);
    }

    #[test]
    fn test_display_dump() {
        let mut pkt = Packet::command(PacketType::GpioSetValue);
        pkt.set_sequence(3);
        pkt.append_bytes(&[10, 1]).unwrap();
        let dump = pkt.to_string();
        assert!(dump.contains("GPIO_SET_VALUE"));
        assert!(dump.contains("St: CMD"));
        assert!(dump.ends_with("0a 01"));
    }
}
