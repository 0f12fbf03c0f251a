//! Protocol error types

use thiserror::Error;

/// Protocol-level errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Not enough free payload bytes left for an append
    #[error("Payload overflow: needed {needed} bytes, {available} available")]
    PayloadOverflow { needed: usize, available: usize },

    /// Read or overwrite outside of the filled payload
    #[error("Payload access out of bounds: offset {offset} + {size} > length {length}")]
    OutOfBounds {
        offset: usize,
        size: usize,
        length: usize,
    },

    /// Frame shorter than the packet header
    #[error("Incomplete frame: expected {expected} bytes, got {actual}")]
    IncompleteFrame { expected: usize, actual: usize },

    /// Frame longer than the packet capacity
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Header declares more payload than the frame carries
    #[error("Invalid payload length: header declares {declared}, frame holds {max}")]
    InvalidPayloadLength { declared: usize, max: usize },

    /// Unknown packet type byte
    #[error("Invalid message type: {0:#04x}")]
    InvalidMessageType(u8),

    /// Unknown status byte
    #[error("Invalid status: {0:#04x}")]
    InvalidStatus(u8),

    /// Command parameter byte outside of its encoding
    #[error("Invalid {name} value: {value}")]
    InvalidParameter { name: &'static str, value: u8 },
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::PayloadOverflow {
            needed: 4,
            available: 2,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Payload overflow"));
        assert!(msg.contains("needed 4"));
        assert!(msg.contains("2 available"));
    }

    #[test]
    fn test_invalid_type_is_hex() {
        let msg = format!("{}", ProtocolError::InvalidMessageType(0x7f));
        assert!(msg.contains("0x7f"));
    }
}
