//! Bridge device firmware
//!
//! The firmware receives command frames from the host on the Data interface,
//! runs them through a chain of peripheral tasks and answers on the same
//! interface. Interrupt-driven input (GPIO edges, UART bytes) is queued and
//! reported on the Event interface.
//!
//! Hardware is reached only through the driver traits in [`hal`]; [`sim`]
//! provides an in-memory board so the whole firmware runs on a workstation.
//!
//! # Example
//!
//! ```no_run
//! use common::loopback::loopback;
//! use firmware::{Firmware, FirmwareConfig, sim::SimBoard};
//! use std::sync::Arc;
//!
//! let (_host, device) = loopback();
//! let board = SimBoard::new();
//! let handle = Firmware::start(FirmwareConfig::default(), board.peripherals(), Arc::new(device))
//!     .unwrap();
//! handle.shutdown().unwrap();
//! ```

pub mod blink;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod hal;
pub mod runtime;
pub mod sim;
pub mod task;
pub mod tasks;
pub mod watchdog;

pub use config::{BlinkSettings, FirmwareConfig};
pub use dispatcher::{Dispatcher, RxQueue};
pub use error::{FirmwareError, HandlerError, Result};
pub use hal::{Board, Peripherals};
pub use runtime::{Firmware, FirmwareHandle};
pub use task::{StateCell, Task, TaskState};
