//! Software watchdog
//!
//! The USB context feeds the watchdog every iteration. A monitor thread
//! reboots the board through [`Board::reset`] when feeding stops for longer
//! than the timeout.

use crate::hal::Board;
use common::lock;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::error;

#[derive(Debug)]
pub struct SoftWatchdog {
    timeout: Duration,
    last_feed: Mutex<Instant>,
}

impl SoftWatchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_feed: Mutex::new(Instant::now()),
        }
    }

    pub fn feed(&self) {
        *lock(&self.last_feed) = Instant::now();
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_expired(&self) -> bool {
        lock(&self.last_feed).elapsed() > self.timeout
    }

    /// Watch for expiry until `shutdown` is set
    pub fn monitor(&self, board: &dyn Board, shutdown: &AtomicBool) {
        let period = (self.timeout / 4).max(Duration::from_millis(1));
        while !shutdown.load(Ordering::Acquire) {
            std::thread::sleep(period);
            if self.is_expired() {
                error!(
                    "Watchdog expired after {:?} without a feed, resetting board",
                    self.timeout
                );
                board.reset();
                self.feed();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_restarts_timeout() {
        let wd = SoftWatchdog::new(Duration::from_millis(30));
        assert!(!wd.is_expired());
        std::thread::sleep(Duration::from_millis(50));
        assert!(wd.is_expired());
        wd.feed();
        assert!(!wd.is_expired());
    }
}
