//! Integration tests for the bounded event queue
//!
//! Covers:
//! - Drop-oldest behaviour for arbitrary overflow counts
//! - Concurrent producers against a draining consumer
//! - Draining GPIO event items into a frame

use common::queue::{BoundedEventQueue, PushOutcome};
use proptest::prelude::*;
use protocol::{GpioEvent, GpioEvents, Packet};
use std::sync::Arc;
use std::thread;

// ============================================================================
// Drop-oldest
// ============================================================================

proptest! {
    #[test]
    fn test_keeps_newest_capacity_items(capacity in 1usize..16, k in 0usize..32) {
        let queue = BoundedEventQueue::new("prop", capacity);
        let mut dropped = 0;
        for i in 0..(capacity + k) as u32 {
            if queue.push(i) == PushOutcome::DroppedOldest {
                dropped += 1;
            }
        }
        prop_assert_eq!(dropped, k);
        prop_assert_eq!(queue.dropped(), k as u64);

        let drained: Vec<u32> = std::iter::from_fn(|| queue.try_pop()).collect();
        let expected: Vec<u32> = (k as u32..(capacity + k) as u32).collect();
        prop_assert_eq!(drained, expected);
    }
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_producers_never_block() {
    let queue = Arc::new(BoundedEventQueue::new("concurrent", 8));
    let producers: Vec<_> = (0..4u32)
        .map(|p| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..1000u32 {
                    queue.push((p << 16) | i);
                }
            })
        })
        .collect();

    let mut popped = 0u64;
    for _ in 0..2000 {
        if queue.try_pop().is_some() {
            popped += 1;
        }
    }
    for producer in producers {
        producer.join().unwrap();
    }
    popped += queue.clear() as u64;

    assert_eq!(popped + queue.dropped(), 4000);
    assert!(queue.is_empty());
}

#[test]
fn test_per_producer_order_preserved() {
    let queue = BoundedEventQueue::new("order", 64);
    for i in 0..10u32 {
        queue.push(i);
    }
    let mut last = None;
    while let Some(v) = queue.try_pop() {
        if let Some(prev) = last {
            assert!(v > prev);
        }
        last = Some(v);
    }
}

// ============================================================================
// Frame draining
// ============================================================================

#[test]
fn test_drain_gpio_events_into_frame() {
    let queue = BoundedEventQueue::new("gpio", 8);
    for pin in 0..8u8 {
        queue.push(GpioEvent::new(pin, GpioEvents::RISE_EDGE));
    }

    let mut pkt = Packet::new();
    pkt.append_u8(0).unwrap();
    let n = queue.drain_into(&mut pkt, 7).unwrap();
    pkt.set_u8(0, n as u8).unwrap();

    assert_eq!(n, 7);
    assert_eq!(pkt.payload_len(), 1 + 7 * 4);
    assert_eq!(
        GpioEvent::from_wire(pkt.read_u32(1).unwrap()),
        GpioEvent::new(0, GpioEvents::RISE_EDGE)
    );
    assert_eq!(queue.len(), 1);
}
