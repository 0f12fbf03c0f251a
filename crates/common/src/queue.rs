//! Bounded drop-oldest event queue
//!
//! Interrupt-style producers push small fixed-size items and never block; a
//! single consumer drains them into event frames. When the queue is full the
//! oldest unread item is discarded to make room.
//!
//! # Example
//!
//! ```
//! use common::queue::{BoundedEventQueue, PushOutcome};
//!
//! let queue = BoundedEventQueue::new("demo", 2);
//! assert_eq!(queue.push(1u32), PushOutcome::Pushed);
//! assert_eq!(queue.push(2u32), PushOutcome::Pushed);
//! assert_eq!(queue.push(3u32), PushOutcome::DroppedOldest);
//! assert_eq!(queue.try_pop(), Some(2));
//! assert_eq!(queue.try_pop(), Some(3));
//! assert_eq!(queue.try_pop(), None);
//! ```

use async_channel::{Receiver, Sender, bounded};
use protocol::Packet;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{trace, warn};

/// Result of a push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    /// The queue was full and its oldest item was discarded
    DroppedOldest,
}

/// An item that can be serialized into an event frame payload
pub trait EventItem {
    /// Bytes one item occupies in the payload
    const WIRE_SIZE: usize;

    fn encode(&self, packet: &mut Packet) -> protocol::Result<()>;
}

impl EventItem for u8 {
    const WIRE_SIZE: usize = 1;

    fn encode(&self, packet: &mut Packet) -> protocol::Result<()> {
        packet.append_u8(*self)
    }
}

impl EventItem for u32 {
    const WIRE_SIZE: usize = 4;

    fn encode(&self, packet: &mut Packet) -> protocol::Result<()> {
        packet.append_u32(*self)
    }
}

impl EventItem for protocol::GpioEvent {
    const WIRE_SIZE: usize = protocol::params::GPIO_EVENT_ITEM_SIZE;

    fn encode(&self, packet: &mut Packet) -> protocol::Result<()> {
        packet.append_u32(self.to_wire())
    }
}

/// Fixed-capacity FIFO that discards the oldest item on overflow
pub struct BoundedEventQueue<T> {
    name: &'static str,
    tx: Sender<T>,
    rx: Receiver<T>,
    dropped: AtomicU64,
}

impl<T> BoundedEventQueue<T> {
    /// Create a queue holding at most `capacity` items (at least one)
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self {
            name,
            tx,
            rx,
            dropped: AtomicU64::new(0),
        }
    }

    /// Push an item without blocking
    pub fn push(&self, item: T) -> PushOutcome {
        match self.tx.force_send(item) {
            Ok(None) => PushOutcome::Pushed,
            Ok(Some(_oldest)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    "Event queue '{}' overflow, dropped oldest item (total dropped: {})",
                    self.name, total
                );
                PushOutcome::DroppedOldest
            }
            // The queue owns both ends, so the channel cannot be closed.
            Err(_) => PushOutcome::DroppedOldest,
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Discard every queued item, returning how many were removed
    pub fn clear(&self) -> usize {
        let mut removed = 0;
        while self.rx.try_recv().is_ok() {
            removed += 1;
        }
        if removed > 0 {
            trace!("Cleared {} items from event queue '{}'", removed, self.name);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.rx.capacity().unwrap_or(1)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Items discarded by overflow since creation
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<T: EventItem> BoundedEventQueue<T> {
    /// Move up to `max_items` items into the packet payload
    ///
    /// Stops early when the queue empties or the packet has no room for a
    /// whole item; an item is only popped once it is known to fit.
    pub fn drain_into(&self, packet: &mut Packet, max_items: usize) -> protocol::Result<usize> {
        let mut drained = 0;
        while drained < max_items && packet.free_payload_slots() >= T::WIRE_SIZE {
            let Some(item) = self.try_pop() else {
                break;
            };
            item.encode(packet)?;
            drained += 1;
        }
        Ok(drained)
    }
}

impl<T> std::fmt::Debug for BoundedEventQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedEventQueue")
            .field("name", &self.name)
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("dropped", &self.dropped())
            .finish()
    }
}
