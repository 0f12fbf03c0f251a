//! Request sequence numbering

/// Hands out sequence numbers for outgoing requests
///
/// Numbers cover the full `0..=255` range and wrap back to 0. The device only
/// echoes the number, so every value is usable.
#[derive(Debug, Clone, Default)]
pub struct SequenceCounter {
    next: u8,
}

impl SequenceCounter {
    pub const fn new() -> Self {
        Self { next: 0 }
    }

    /// Start counting at `first`
    pub const fn starting_at(first: u8) -> Self {
        Self { next: first }
    }

    /// Take the next sequence number
    pub fn next_sequence(&mut self) -> u8 {
        let seq = self.next;
        self.next = self.next.wrapping_add(1);
        seq
    }

    /// Peek at the number the next request will use
    pub fn peek(&self) -> u8 {
        self.next
    }
}
