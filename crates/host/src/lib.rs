//! Host side of the I/O bridge
//!
//! [`TransportManager`] carries request/response exchanges to one or more
//! bridges and fans their unsolicited events out to listeners. The wrappers
//! in [`peripherals`] turn those exchanges into pin, bus and UART calls,
//! sending each peripheral's init command the first time it is used on a
//! channel.
//!
//! # Example
//!
//! ```no_run
//! use host::peripherals::Gpio;
//! use host::usb::RusbConnector;
//! use host::{HostConfig, TransportManager};
//! use std::sync::Arc;
//!
//! let config = HostConfig::load_or_default();
//! let connector = RusbConnector::from_settings(&config.usb).unwrap();
//! let manager = Arc::new(TransportManager::new(connector, config.transfer_settings()));
//!
//! let led = Gpio::output(manager, 25).unwrap();
//! led.write(true).unwrap();
//! ```

pub mod config;
pub mod error;
pub mod manager;
pub mod peripherals;
pub mod usb;

pub use config::HostConfig;
pub use error::{HostError, RC_ERROR, RC_NACK, RC_TIMEOUT, Result};
pub use manager::{
    Connector, EventListener, ListenerId, StaticConnector, TransferSettings, TransportManager,
};
pub use peripherals::{ByteStream, ChannelBinding, Peripheral};
