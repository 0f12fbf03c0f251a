//! Firmware error types

use protocol::ProtocolError;
use thiserror::Error;

/// Why a task could not serve a request
///
/// The dispatcher turns any of these into an `ERR` response status.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Request payload is missing fields or carries too much data
    #[error("malformed request: {0}")]
    Malformed(#[from] ProtocolError),

    /// A field is outside the range the board supports
    #[error("invalid {what}: {value}")]
    InvalidArgument { what: &'static str, value: u32 },
}

impl HandlerError {
    pub fn invalid(what: &'static str, value: impl Into<u32>) -> Self {
        HandlerError::InvalidArgument {
            what,
            value: value.into(),
        }
    }
}

/// Firmware start-up and configuration errors
#[derive(Debug, Error)]
pub enum FirmwareError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} thread panicked")]
    Panicked(&'static str),
}

pub type Result<T> = std::result::Result<T, FirmwareError>;
