//! In-memory board
//!
//! Every simulated driver is a cheap handle over shared state: the firmware
//! gets boxed clones through [`SimBoard::peripherals`] while a test keeps the
//! originals to drive inputs and inspect outputs.
//!
//! ```
//! use firmware::sim::SimBoard;
//!
//! let board = SimBoard::new();
//! board.i2c.add_device(0x50);
//! let peripherals = board.peripherals();
//! # drop(peripherals);
//! ```

mod analog;
mod gpio;
mod i2c;
mod spi;
mod system;
mod uart;

pub use analog::{PwmSlice, SYS_CLOCK_HZ, SimAnalog};
pub use gpio::SimGpio;
pub use i2c::SimI2c;
pub use spi::SimSpi;
pub use system::SimSystem;
pub use uart::SimUart;

use crate::hal::Peripherals;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct SimBoard {
    pub gpio: SimGpio,
    pub spi: SimSpi,
    pub i2c: SimI2c,
    pub uart: SimUart,
    pub analog: SimAnalog,
    pub system: Arc<SimSystem>,
}

impl SimBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Driver set for the firmware, sharing state with this board
    pub fn peripherals(&self) -> Peripherals {
        Peripherals {
            gpio: Box::new(self.gpio.clone()),
            spi: Box::new(self.spi.clone()),
            i2c: Box::new(self.i2c.clone()),
            uart: Box::new(self.uart.clone()),
            analog: Box::new(self.analog.clone()),
            board: self.system.clone(),
        }
    }
}
