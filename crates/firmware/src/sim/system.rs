use crate::hal::Board;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// LED and reset line
#[derive(Debug, Default)]
pub struct SimSystem {
    led: AtomicBool,
    led_toggles: AtomicUsize,
    resets: AtomicUsize,
}

impl SimSystem {
    pub fn led(&self) -> bool {
        self.led.load(Ordering::SeqCst)
    }

    pub fn led_toggles(&self) -> usize {
        self.led_toggles.load(Ordering::SeqCst)
    }

    /// Reboots requested so far
    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

impl Board for SimSystem {
    fn set_led(&self, on: bool) {
        if self.led.swap(on, Ordering::SeqCst) != on {
            self.led_toggles.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}
