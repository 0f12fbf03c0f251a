//! Common error types

use thiserror::Error;

/// Failure of a single USB transfer leg
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transfer timed out")]
    Timeout,

    /// Endpoint halted; recoverable with a clear-halt
    #[error("endpoint stalled")]
    Pipe,

    #[error("device disconnected")]
    NoDevice,

    /// Device sent more data than the receive buffer holds
    #[error("transfer overflow")]
    Overflow,

    #[error("USB I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// The device is gone and no retry can succeed
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::NoDevice)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
