//! Common utilities for the USB peripheral bridge
//!
//! This crate provides functionality shared between the device firmware and
//! the host library: error handling, logging setup, the bounded drop-oldest
//! event queue, the USB transport traits each side programs against, and an
//! in-memory cable connecting the two.

pub mod error;
pub mod logging;
pub mod loopback;
pub mod queue;
pub mod test_utils;
pub mod transport;

pub use error::{Error, Result, TransportError};
pub use logging::setup_logging;
pub use queue::{BoundedEventQueue, EventItem, PushOutcome};
pub use transport::{BusEvent, CdcPort, UsbTransport};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the guard if a previous holder panicked
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
