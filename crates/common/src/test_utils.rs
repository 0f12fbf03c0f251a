//! Test utilities for the bridge crates
//!
//! Helpers shared by the firmware and host test suites.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{command_packet, random_bytes};
//! use protocol::PacketType;
//!
//! let data = random_bytes(32);
//! let pkt = command_packet(PacketType::SpiTransfer, &[0, 32]);
//! assert_eq!(data.len(), 32);
//! assert_eq!(pkt.payload(), &[0, 32]);
//! ```

use protocol::{Packet, PacketType};
use rand::Rng;
use std::time::{Duration, Instant};

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Short timeout for reads that are expected to find nothing
pub const QUIET_TIMEOUT: Duration = Duration::from_millis(50);

/// Build a command packet with the given payload
///
/// # Panics
/// If the payload exceeds 60 bytes.
pub fn command_packet(packet_type: PacketType, payload: &[u8]) -> Packet {
    let mut pkt = Packet::command(packet_type);
    pkt.append_bytes(payload)
        .expect("test payload exceeds packet capacity");
    pkt
}

/// Random bytes for data-path tests
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut rng = rand::rng();
    (0..len).map(|_| rng.random()).collect()
}

/// Poll `condition` until it holds or `timeout` elapses
///
/// Returns whether the condition was met.
pub fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_until_times_out() {
        let start = Instant::now();
        assert!(!wait_until(Duration::from_millis(20), || false));
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(wait_until(Duration::from_millis(20), || true));
    }
}
