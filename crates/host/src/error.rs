//! Host error types

use common::TransportError;
use protocol::{PacketType, ProtocolError, Status};
use thiserror::Error;

/// Return code for an I2C transfer the addressed slave did not acknowledge
pub const RC_NACK: i32 = -1;
/// Return code for an I2C transfer that timed out on the bus
pub const RC_TIMEOUT: i32 = -2;
/// Return code for any other failure
pub const RC_ERROR: i32 = -3;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Transfer failed after {attempts} attempts: {last}")]
    TransferFailed {
        attempts: u32,
        last: TransportError,
    },

    #[error("Sequence mismatch: expected {expected}, received {received}")]
    SequenceMismatch { expected: u8, received: u8 },

    #[error("Type mismatch: sent {sent}, received {received:#04x}")]
    TypeMismatch { sent: PacketType, received: u8 },

    #[error("Device on channel {channel} disconnected")]
    DeviceDisconnected { channel: u8 },

    #[error("Link on channel {channel} is out of service after a fatal error")]
    LinkBroken { channel: u8 },

    #[error("No bridge device at index {index}")]
    DeviceNotFound { index: u8 },

    #[error("Invalid channel {0}")]
    InvalidChannel(u8),

    #[error("Invalid {what}: {value}")]
    InvalidArgument { what: &'static str, value: i64 },

    #[error("{kind} request failed with status {status}")]
    Peripheral { kind: PacketType, status: Status },

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl HostError {
    pub fn invalid(what: &'static str, value: impl Into<i64>) -> Self {
        HostError::InvalidArgument {
            what,
            value: value.into(),
        }
    }

    /// Whether the link can no longer be used
    ///
    /// Desynchronized sequence numbers, a vanished device and exhausted
    /// retries all leave the link in an unknown state.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HostError::TransferFailed { .. }
                | HostError::SequenceMismatch { .. }
                | HostError::TypeMismatch { .. }
                | HostError::DeviceDisconnected { .. }
                | HostError::LinkBroken { .. }
        ) || matches!(self, HostError::Transport(e) if e.is_fatal())
    }

    /// Status reported by the device, if this is a peripheral failure
    pub fn status(&self) -> Option<Status> {
        match self {
            HostError::Peripheral { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classic negative return code for this error
    pub fn return_code(&self) -> i32 {
        match self.status() {
            Some(Status::I2cNack) => RC_NACK,
            Some(Status::I2cTimeout) => RC_TIMEOUT,
            _ => RC_ERROR,
        }
    }
}

pub type Result<T> = std::result::Result<T, HostError>;
