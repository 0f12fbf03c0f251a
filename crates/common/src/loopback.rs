//! In-memory USB cable
//!
//! [`loopback`] returns the two ends of a simulated bridge link: a
//! [`LoopbackHost`] implementing [`UsbTransport`] and a [`LoopbackDevice`]
//! implementing [`CdcPort`]. Bulk transfers keep their frame boundaries, the
//! way short USB packets terminate a transfer. Device writes are staged until
//! flushed, like a CDC FIFO.
//!
//! The host end can unplug the cable, raise bus events and inject transfer
//! faults, which is how the retry and disconnect paths are exercised.

use crate::error::TransportError;
use crate::lock;
use crate::transport::{BusEvent, CdcPort, UsbTransport};
use protocol::{Interface, MAX_PACKET_SIZE};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Device-side FIFO size per interface
const CDC_FIFO_SIZE: usize = MAX_PACKET_SIZE;

/// Which half of a transfer a fault applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    Write,
    Read,
}

#[derive(Debug)]
struct Fault {
    iface: Interface,
    leg: Leg,
    error: TransportError,
}

enum Popped<T> {
    Item(T),
    TimedOut,
    Closed,
}

/// Blocking FIFO shared by the two ends of the cable
struct Mailbox<T> {
    state: Mutex<MailboxState<T>>,
    ready: Condvar,
}

struct MailboxState<T> {
    items: VecDeque<T>,
    closed: bool,
}

impl<T> Mailbox<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(MailboxState {
                items: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    fn push(&self, item: T) -> bool {
        let mut state = lock(&self.state);
        if state.closed {
            return false;
        }
        state.items.push_back(item);
        self.ready.notify_one();
        true
    }

    fn pop(&self, timeout: Option<Duration>) -> Popped<T> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = lock(&self.state);
        loop {
            if let Some(item) = state.items.pop_front() {
                return Popped::Item(item);
            }
            if state.closed {
                return Popped::Closed;
            }
            match deadline {
                None => {
                    state = self
                        .ready
                        .wait(state)
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Popped::TimedOut;
                    }
                    state = self
                        .ready
                        .wait_timeout(state, deadline - now)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|e| e.into_inner().0);
                }
            }
        }
    }

    fn clear(&self) {
        lock(&self.state).items.clear();
    }

    fn close(&self) {
        lock(&self.state).closed = true;
        self.ready.notify_all();
    }
}

struct Cable {
    plugged: AtomicBool,
    host_to_device: [Mailbox<Vec<u8>>; 2],
    device_to_host: [Mailbox<Vec<u8>>; 2],
    staged: [Mutex<Vec<u8>>; 2],
    bus_events: Mailbox<BusEvent>,
    faults: Mutex<Vec<Fault>>,
    cleared_halts: Mutex<Vec<u8>>,
}

impl Cable {
    fn take_fault(&self, iface: Interface, leg: Leg) -> Option<TransportError> {
        let mut faults = lock(&self.faults);
        let pos = faults
            .iter()
            .position(|f| f.iface == iface && f.leg == leg)?;
        Some(faults.remove(pos).error)
    }

    fn check_plugged(&self) -> Result<(), TransportError> {
        if self.plugged.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::NoDevice)
        }
    }
}

fn slot(iface: Interface) -> usize {
    iface.cdc_index() as usize
}

/// Create both ends of a plugged-in cable
///
/// The device end sees a pending [`BusEvent::Mounted`].
pub fn loopback() -> (LoopbackHost, LoopbackDevice) {
    let cable = Arc::new(Cable {
        plugged: AtomicBool::new(true),
        host_to_device: [Mailbox::new(), Mailbox::new()],
        device_to_host: [Mailbox::new(), Mailbox::new()],
        staged: [Mutex::new(Vec::new()), Mutex::new(Vec::new())],
        bus_events: Mailbox::new(),
        faults: Mutex::new(Vec::new()),
        cleared_halts: Mutex::new(Vec::new()),
    });
    cable.bus_events.push(BusEvent::Mounted);

    (
        LoopbackHost {
            cable: Arc::clone(&cable),
        },
        LoopbackDevice { cable },
    )
}

/// Host end of the cable
#[derive(Clone)]
pub struct LoopbackHost {
    cable: Arc<Cable>,
}

impl LoopbackHost {
    /// Disconnect the device; blocked host reads fail with `NoDevice`
    pub fn unplug(&self) {
        debug!("Loopback cable unplugged");
        self.cable.plugged.store(false, Ordering::SeqCst);
        for mailbox in &self.cable.device_to_host {
            mailbox.close();
        }
        self.cable.bus_events.push(BusEvent::Unmounted);
    }

    pub fn is_plugged(&self) -> bool {
        self.cable.plugged.load(Ordering::SeqCst)
    }

    /// Raise a bus event on the device side
    pub fn signal(&self, event: BusEvent) {
        self.cable.bus_events.push(event);
    }

    /// Make the next `leg` transfer on `iface` fail with `error`
    pub fn inject_fault(&self, iface: Interface, leg: Leg, error: TransportError) {
        lock(&self.cable.faults).push(Fault { iface, leg, error });
    }

    /// Endpoints the host has cleared, in call order
    pub fn cleared_halts(&self) -> Vec<u8> {
        lock(&self.cable.cleared_halts).clone()
    }

    /// Write a raw frame as if the device had sent it, bypassing staging
    pub fn push_from_device(&self, iface: Interface, frame: &[u8]) {
        self.cable.device_to_host[slot(iface)].push(frame.to_vec());
    }
}

impl UsbTransport for LoopbackHost {
    fn write(
        &self,
        iface: Interface,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.cable.check_plugged()?;
        if let Some(err) = self.cable.take_fault(iface, Leg::Write) {
            return Err(err);
        }
        trace!("loopback host -> {}: {} bytes", iface, data.len());
        self.cable.host_to_device[slot(iface)].push(data.to_vec());
        Ok(data.len())
    }

    fn read(
        &self,
        iface: Interface,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, TransportError> {
        self.cable.check_plugged()?;
        if let Some(err) = self.cable.take_fault(iface, Leg::Read) {
            return Err(err);
        }
        match self.cable.device_to_host[slot(iface)].pop(timeout) {
            Popped::Item(frame) => {
                if frame.len() > buf.len() {
                    return Err(TransportError::Overflow);
                }
                buf[..frame.len()].copy_from_slice(&frame);
                Ok(frame.len())
            }
            Popped::TimedOut => Err(TransportError::Timeout),
            Popped::Closed => Err(TransportError::NoDevice),
        }
    }

    fn clear_halt(&self, endpoint: u8) -> Result<(), TransportError> {
        self.cable.check_plugged()?;
        lock(&self.cable.cleared_halts).push(endpoint);
        Ok(())
    }
}

/// Device end of the cable
#[derive(Clone)]
pub struct LoopbackDevice {
    cable: Arc<Cable>,
}

impl CdcPort for LoopbackDevice {
    fn poll_event(&self, timeout: Duration) -> Option<BusEvent> {
        match self.cable.bus_events.pop(Some(timeout)) {
            Popped::Item(event) => Some(event),
            Popped::TimedOut | Popped::Closed => None,
        }
    }

    fn read(
        &self,
        iface: Interface,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        match self.cable.host_to_device[slot(iface)].pop(Some(timeout)) {
            Popped::Item(frame) => {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                Ok(n)
            }
            Popped::TimedOut | Popped::Closed => Err(TransportError::Timeout),
        }
    }

    fn write(&self, iface: Interface, data: &[u8]) -> Result<usize, TransportError> {
        self.cable.check_plugged()?;
        let mut staged = lock(&self.cable.staged[slot(iface)]);
        let n = data.len().min(CDC_FIFO_SIZE - staged.len());
        staged.extend_from_slice(&data[..n]);
        Ok(n)
    }

    fn write_flush(&self, iface: Interface) -> Result<(), TransportError> {
        self.cable.check_plugged()?;
        let mut staged = lock(&self.cable.staged[slot(iface)]);
        if !staged.is_empty() {
            let frame = std::mem::take(&mut *staged);
            trace!("loopback device -> {}: {} bytes", iface, frame.len());
            self.cable.device_to_host[slot(iface)].push(frame);
        }
        Ok(())
    }

    fn read_flush(&self, iface: Interface) {
        self.cable.host_to_device[slot(iface)].clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHORT: Duration = Duration::from_millis(20);

    #[test]
    fn test_frames_keep_boundaries() {
        let (host, device) = loopback();
        host.write(Interface::Data, &[1, 2, 3], SHORT).unwrap();
        host.write(Interface::Data, &[4], SHORT).unwrap();

        let mut buf = [0u8; 64];
        assert_eq!(device.read(Interface::Data, &mut buf, SHORT), Ok(3));
        assert_eq!(device.read(Interface::Data, &mut buf, SHORT), Ok(1));
        assert_eq!(buf[0], 4);
        assert_eq!(
            device.read(Interface::Data, &mut buf, SHORT),
            Err(TransportError::Timeout)
        );
    }

    #[test]
    fn test_device_writes_staged_until_flush() {
        let (host, device) = loopback();
        device.write(Interface::Event, &[9, 9]).unwrap();

        let mut buf = [0u8; 64];
        assert_eq!(
            host.read(Interface::Event, &mut buf, Some(SHORT)),
            Err(TransportError::Timeout)
        );
        device.write_flush(Interface::Event).unwrap();
        assert_eq!(host.read(Interface::Event, &mut buf, Some(SHORT)), Ok(2));
    }

    #[test]
    fn test_fifo_accepts_partial_write() {
        let (_host, device) = loopback();
        assert_eq!(device.write(Interface::Data, &[0; 60]), Ok(60));
        assert_eq!(device.write(Interface::Data, &[0; 10]), Ok(4));
        assert_eq!(device.write(Interface::Data, &[0; 1]), Ok(0));
    }

    #[test]
    fn test_unplug_wakes_blocked_reader() {
        let (host, device) = loopback();
        let reader = {
            let host = host.clone();
            std::thread::spawn(move || {
                let mut buf = [0u8; 64];
                host.read(Interface::Event, &mut buf, None)
            })
        };
        std::thread::sleep(SHORT);
        host.unplug();
        assert_eq!(reader.join().unwrap(), Err(TransportError::NoDevice));
        assert_eq!(
            device.write(Interface::Data, &[1]),
            Err(TransportError::NoDevice)
        );
    }

    #[test]
    fn test_bus_events() {
        let (host, device) = loopback();
        assert_eq!(device.poll_event(SHORT), Some(BusEvent::Mounted));
        assert_eq!(device.poll_event(SHORT), None);
        host.signal(BusEvent::Suspended);
        assert_eq!(device.poll_event(SHORT), Some(BusEvent::Suspended));
    }

    #[test]
    fn test_injected_fault_fires_once() {
        let (host, _device) = loopback();
        host.inject_fault(Interface::Data, Leg::Write, TransportError::Pipe);
        assert_eq!(
            host.write(Interface::Data, &[1], SHORT),
            Err(TransportError::Pipe)
        );
        assert_eq!(host.write(Interface::Data, &[1], SHORT), Ok(1));
    }
}
