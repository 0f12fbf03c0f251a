//! Request dispatcher
//!
//! The USB context copies every frame received on the Data interface into a
//! pool of reusable slots and queues the slot index in an [`RxQueue`]. The
//! dispatch context pops indices, runs each request through the task chain
//! and writes the response back:
//!
//! ```text
//! Data OUT ──> RxQueue ──> Dispatcher::process ──> gpio ─> spi ─> analog ─> i2c ─> serial
//!                                   │
//!                                   └──> Data IN (responses) / Event IN (non-empty events)
//! ```

use crate::hal::Board;
use crate::task::{StateCell, Task, TaskState};
use common::{BoundedEventQueue, CdcPort, PushOutcome, TransportError, lock};
use protocol::{Interface, Packet, PacketType, ProtocolError, Status};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Attempts made to hand a frame to a full CDC transmit FIFO
const CDC_WRITE_RETRIES: usize = 10;

/// Pause between attempts while the transmit FIFO is full
const CDC_WRITE_BACKOFF: Duration = Duration::from_micros(200);

/// Received requests waiting for the dispatch context
///
/// Slots are written round robin. The index queue holds as many entries as
/// there are slots and drops the oldest index when a new frame arrives with
/// the queue full. Every push stamps its slot with a generation number that
/// travels with the index, so a slot overwritten while its old index is
/// still queued is detected and counted as a drop instead of being served
/// out of order.
pub struct RxQueue {
    slots: Vec<Mutex<Option<(u64, Packet)>>>,
    generation: AtomicU64,
    ready: BoundedEventQueue<(usize, u64)>,
    overwritten: AtomicU64,
}

impl RxQueue {
    pub fn new(slots: usize) -> Self {
        let slots = slots.max(1);
        Self {
            slots: (0..slots).map(|_| Mutex::new(None)).collect(),
            generation: AtomicU64::new(0),
            ready: BoundedEventQueue::new("rx-index", slots),
            overwritten: AtomicU64::new(0),
        }
    }

    /// Copy a received frame into the next slot and queue it
    pub fn push(&self, frame: &[u8]) -> Result<PushOutcome, ProtocolError> {
        let packet = Packet::decode(frame)?;
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let idx = (generation % self.slots.len() as u64) as usize;
        *lock(&self.slots[idx]) = Some((generation, packet));
        Ok(self.ready.push((idx, generation)))
    }

    /// Take the oldest queued request
    pub fn pop(&self) -> Option<Packet> {
        while let Some((idx, generation)) = self.ready.try_pop() {
            if let Some(packet) = self.take(idx, generation) {
                return Some(packet);
            }
        }
        None
    }

    /// Take slot `idx` if it still holds the frame queued as `generation`
    fn take(&self, idx: usize, generation: u64) -> Option<Packet> {
        let mut slot = lock(&self.slots[idx]);
        match slot.as_ref() {
            Some((stored, _)) if *stored == generation => slot.take().map(|(_, packet)| packet),
            Some((stored, _)) if *stored > generation => {
                let total = self.overwritten.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    "Request slot {} overwritten before it was served, dropped request {} (total overwritten: {})",
                    idx, generation, total
                );
                None
            }
            _ => None,
        }
    }

    pub fn clear(&self) {
        self.ready.clear();
        for slot in &self.slots {
            *lock(slot) = None;
        }
        self.generation.store(0, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Requests lost to overflow
    pub fn dropped(&self) -> u64 {
        self.ready.dropped() + self.overwritten.load(Ordering::Relaxed)
    }
}

/// Routes requests through the peripheral tasks and sends the responses
pub struct Dispatcher {
    state: Arc<StateCell>,
    tasks: Vec<Box<dyn Task>>,
    port: Arc<dyn CdcPort>,
    board: Arc<dyn Board>,
    rx: Arc<RxQueue>,
    response: Packet,
}

impl Dispatcher {
    /// Create a dispatcher over `tasks`, offered requests in the given order
    pub fn new(
        tasks: Vec<Box<dyn Task>>,
        port: Arc<dyn CdcPort>,
        board: Arc<dyn Board>,
        rx: Arc<RxQueue>,
    ) -> Self {
        Self {
            state: StateCell::new(),
            tasks,
            port,
            board,
            rx,
            response: Packet::new(),
        }
    }

    /// Start every task, then the dispatcher itself
    pub fn init(&mut self) {
        for task in &mut self.tasks {
            task.init();
            debug!("{} task running", task.name());
        }
        self.state.set(TaskState::Running);
    }

    /// State shared with the USB context
    pub fn state(&self) -> Arc<StateCell> {
        Arc::clone(&self.state)
    }

    pub fn rx_queue(&self) -> Arc<RxQueue> {
        Arc::clone(&self.rx)
    }

    /// Serve one request and send its response
    ///
    /// 1. The response takes the request's type and sequence with status `RSP`
    /// 2. System requests are handled here
    /// 3. Every task sees the request; each acts only on its own types
    /// 4. Event responses go to the Event interface when they carry payload,
    ///    everything else to the Data interface
    pub fn process(&mut self, request: &Packet) {
        if !self.state.is_running() {
            trace!("dispatcher not running, dropping {}", request.raw_type());
            return;
        }

        self.response.reset();
        self.response.clone_header(request);
        self.response.set_status(Status::Rsp);

        match request.packet_type() {
            Ok(PacketType::SysHwReset) => {
                info!("Hardware reset requested by host");
                self.board.reset();
            }
            Ok(PacketType::SysSwReset) => {
                self.reset();
                info!("Software reset requested by host");
            }
            Ok(_) => {}
            Err(e) => debug!("Ignoring request: {}", e),
        }

        for task in &mut self.tasks {
            task.process(request, &mut self.response);
        }

        self.send();
    }

    /// Return every task and the link to a clean state
    ///
    /// The dispatcher is parked in `Stopped` meanwhile, so the USB context
    /// discards frames arriving during the reset.
    pub fn reset(&mut self) {
        let state = Arc::clone(&self.state);
        state.while_stopped(|| {
            for iface in [Interface::Data, Interface::Event] {
                self.port.read_flush(iface);
                if let Err(e) = self.port.write_flush(iface) {
                    debug!("Flush of {} interface failed: {}", iface, e);
                }
            }
            self.rx.clear();
            for task in &mut self.tasks {
                task.reset();
            }
        });
    }

    fn send(&self) {
        let iface = if self.response.is_event() {
            if self.response.payload_len() == 0 {
                return;
            }
            Interface::Event
        } else {
            Interface::Data
        };

        trace!("TX {}: {}", iface, self.response);
        if let Err(e) = cdc_write(self.port.as_ref(), iface, self.response.as_bytes()) {
            warn!("Failed to send {} frame: {}", iface, e);
        }
    }
}

/// Write a whole frame to the CDC transmit FIFO
///
/// Each time the FIFO accepts nothing it is flushed and the write retried
/// after a short pause, up to [`CDC_WRITE_RETRIES`] times.
pub fn cdc_write(port: &dyn CdcPort, iface: Interface, data: &[u8]) -> Result<(), TransportError> {
    let mut sent = 0;
    let mut retries = CDC_WRITE_RETRIES;
    while sent < data.len() {
        let n = port.write(iface, &data[sent..])?;
        if n == 0 {
            if retries == 0 {
                return Err(TransportError::Overflow);
            }
            retries -= 1;
            port.write_flush(iface)?;
            trace!(
                "Waiting for space on {} FIFO ({}/{})",
                iface,
                CDC_WRITE_RETRIES - retries,
                CDC_WRITE_RETRIES
            );
            std::thread::sleep(CDC_WRITE_BACKOFF);
            continue;
        }
        sent += n;
    }
    port.write_flush(iface)
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::PacketType;

    fn frame(ty: PacketType, seq: u8) -> Vec<u8> {
        let mut pkt = Packet::command(ty);
        pkt.set_sequence(seq);
        pkt.as_bytes().to_vec()
    }

    #[test]
    fn test_rx_queue_fifo() {
        let rx = RxQueue::new(4);
        for seq in 0..3 {
            assert_eq!(rx.push(&frame(PacketType::GpioGetValue, seq)), Ok(PushOutcome::Pushed));
        }
        for seq in 0..3 {
            assert_eq!(rx.pop().map(|p| p.sequence()), Some(seq));
        }
        assert!(rx.pop().is_none());
    }

    #[test]
    fn test_rx_queue_drops_oldest() {
        let rx = RxQueue::new(3);
        for seq in 0..5 {
            rx.push(&frame(PacketType::SpiRead, seq)).unwrap();
        }
        assert_eq!(rx.dropped(), 2);
        let seqs: Vec<u8> = std::iter::from_fn(|| rx.pop()).map(|p| p.sequence()).collect();
        assert_eq!(seqs, vec![2, 3, 4]);
    }

    #[test]
    fn test_rx_queue_rejects_runt_frame() {
        let rx = RxQueue::new(2);
        assert!(rx.push(&[1, 2]).is_err());
        assert!(rx.is_empty());
    }

    #[test]
    fn test_rx_queue_clear() {
        let rx = RxQueue::new(2);
        rx.push(&frame(PacketType::SysInit, 1)).unwrap();
        rx.clear();
        assert!(rx.pop().is_none());
        assert_eq!(rx.capacity(), 2);
    }

    #[test]
    fn test_rx_queue_overwritten_slot_not_served_early() {
        let rx = RxQueue::new(2);
        rx.push(&frame(PacketType::GpioGetValue, 0)).unwrap();
        rx.push(&frame(PacketType::GpioGetValue, 1)).unwrap();

        // Consumer has claimed index 0 but not yet read its slot
        let (idx, generation) = rx.ready.try_pop().unwrap();
        assert_eq!((idx, generation), (0, 0));

        // Producer wraps around onto slot 0 meanwhile
        rx.push(&frame(PacketType::GpioGetValue, 2)).unwrap();

        assert!(rx.take(idx, generation).is_none());
        assert_eq!(rx.dropped(), 1);
        let seqs: Vec<u8> = std::iter::from_fn(|| rx.pop()).map(|p| p.sequence()).collect();
        assert_eq!(seqs, vec![1, 2]);
    }
}
