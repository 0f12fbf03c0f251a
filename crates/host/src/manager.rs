//! Transport manager
//!
//! Owns the links to every bridge the host talks to. Requests go out on the
//! Data interface one at a time under a single transfer lock, which also
//! guards the sequence counter. Each link gets a detached event-loop thread,
//! started by the first listener, that fans Event interface frames out to
//! every listener registered for that channel.

use crate::error::{HostError, Result};
use common::{TransportError, UsbTransport, lock};
use protocol::usb::MAX_USB_DEVICES;
use protocol::{Interface, MAX_PACKET_SIZE, Packet, PacketType, SequenceCounter, Status};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Timeout for the reset sent when a link comes up
const RESET_TIMEOUT: Duration = Duration::from_millis(1000);

/// Back-off after an unexpected event read error
const EVENT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Opens the transport behind a logical channel
pub trait Connector: Send + Sync {
    fn connect(&self, channel: u8) -> Result<Arc<dyn UsbTransport>>;
}

/// Connector over transports that are already open, indexed by channel
///
/// Used for in-process links such as the loopback cable.
pub struct StaticConnector {
    transports: Vec<Arc<dyn UsbTransport>>,
}

impl StaticConnector {
    pub fn new(transports: Vec<Arc<dyn UsbTransport>>) -> Self {
        Self { transports }
    }

    /// A single transport on channel 0
    pub fn single(transport: Arc<dyn UsbTransport>) -> Self {
        Self::new(vec![transport])
    }
}

impl Connector for StaticConnector {
    fn connect(&self, channel: u8) -> Result<Arc<dyn UsbTransport>> {
        self.transports
            .get(channel as usize)
            .cloned()
            .ok_or(HostError::DeviceNotFound { index: channel })
    }
}

/// Receives unsolicited frames from the Event interface
///
/// Called on the channel's event-loop thread. Keep it short; the next frame
/// is not read until every listener has returned.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &Packet);
}

impl<F> EventListener for F
where
    F: Fn(&Packet) + Send + Sync,
{
    fn on_event(&self, event: &Packet) {
        self(event)
    }
}

/// Handle returned by [`TransportManager::add_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Retry and bring-up policy for transfers
#[derive(Debug, Clone)]
pub struct TransferSettings {
    /// Per-leg timeout
    pub timeout: Duration,
    /// Exchanges tried before giving up
    pub max_attempts: u32,
    /// Send `SYS_SW_RESET` when a channel is first used
    pub reset_on_connect: bool,
    /// Wait after that reset before the first real request
    pub reset_settle: Duration,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(600),
            max_attempts: 4,
            reset_on_connect: true,
            reset_settle: Duration::from_millis(50),
        }
    }
}

/// One connected bridge
struct Link {
    channel: u8,
    transport: Arc<dyn UsbTransport>,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn EventListener>)>>,
    event_loop: AtomicBool,
    /// Set by the first link-fatal error; no transfer is attempted after it
    broken: AtomicBool,
}

impl Link {
    fn new(channel: u8, transport: Arc<dyn UsbTransport>) -> Self {
        Self {
            channel,
            transport,
            listeners: Mutex::new(Vec::new()),
            event_loop: AtomicBool::new(false),
            broken: AtomicBool::new(false),
        }
    }

    fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    fn mark_broken(&self, cause: &HostError) {
        if !self.broken.swap(true, Ordering::SeqCst) {
            error!("Channel {} taken out of service: {}", self.channel, cause);
        }
    }

    /// Clear a stalled endpoint; failures only matter to the next attempt
    fn clear_halt(&self, endpoint: u8) {
        match self.transport.clear_halt(endpoint) {
            Ok(()) => debug!(
                "Cleared halt on endpoint {:#04x} (channel {})",
                endpoint, self.channel
            ),
            Err(e) => warn!(
                "Failed to clear halt on endpoint {:#04x} (channel {}): {}",
                endpoint, self.channel, e
            ),
        }
    }

    /// One write-then-read exchange on the Data interface
    fn exchange_once(
        &self,
        request: &Packet,
        response: &mut Packet,
        timeout: Duration,
    ) -> std::result::Result<(), TransportError> {
        let data = request.as_bytes();
        match self.transport.write(Interface::Data, data, timeout) {
            Ok(n) if n == data.len() => {}
            Ok(n) => {
                return Err(TransportError::Io(format!(
                    "short write: {} of {} bytes",
                    n,
                    data.len()
                )));
            }
            Err(TransportError::Pipe) => {
                self.clear_halt(Interface::Data.out_endpoint());
                return Err(TransportError::Pipe);
            }
            Err(e) => return Err(e),
        }

        let mut buf = [0u8; MAX_PACKET_SIZE];
        let n = match self.transport.read(Interface::Data, &mut buf, Some(timeout)) {
            Ok(n) => n,
            Err(TransportError::Pipe) => {
                self.clear_halt(Interface::Data.in_endpoint());
                return Err(TransportError::Pipe);
            }
            Err(e) => return Err(e),
        };

        response
            .fill_from(&buf[..n])
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    fn dispatch(&self, event: &Packet) {
        // Snapshot so listeners can register or remove themselves while running
        let listeners: Vec<Arc<dyn EventListener>> = lock(&self.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        trace!(
            "Event on channel {} to {} listeners: {}",
            self.channel,
            listeners.len(),
            event
        );
        for listener in listeners {
            listener.on_event(event);
        }
    }

    fn run_event_loop(&self) {
        debug!("Event loop for channel {} started", self.channel);
        let mut buf = [0u8; MAX_PACKET_SIZE];

        loop {
            match self.transport.read(Interface::Event, &mut buf, None) {
                Ok(n) => match Packet::decode(&buf[..n]) {
                    Ok(event) => self.dispatch(&event),
                    Err(e) => warn!("Malformed event on channel {}: {}", self.channel, e),
                },
                Err(TransportError::Timeout) => {}
                Err(TransportError::NoDevice) => {
                    error!("Channel {} disconnected, event loop exiting", self.channel);
                    break;
                }
                Err(TransportError::Pipe) => self.clear_halt(Interface::Event.in_endpoint()),
                Err(e) => {
                    warn!("Event read on channel {} failed: {}", self.channel, e);
                    std::thread::sleep(EVENT_RETRY_DELAY);
                }
            }
        }

        self.event_loop.store(false, Ordering::SeqCst);
    }
}

/// Request/response transport over every connected bridge
pub struct TransportManager {
    connector: Box<dyn Connector>,
    settings: TransferSettings,
    links: Mutex<HashMap<u8, Arc<Link>>>,
    /// Serializes link bring-up
    connect_lock: Mutex<()>,
    /// Transfer lock; one request in flight across all channels
    sequence: Mutex<SequenceCounter>,
    next_listener: AtomicU64,
}

impl TransportManager {
    pub fn new(connector: impl Connector + 'static, settings: TransferSettings) -> Self {
        Self {
            connector: Box::new(connector),
            settings,
            links: Mutex::new(HashMap::new()),
            connect_lock: Mutex::new(()),
            sequence: Mutex::new(SequenceCounter::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Manager over a single already-open transport on channel 0
    pub fn with_transport(transport: Arc<dyn UsbTransport>, settings: TransferSettings) -> Self {
        Self::new(StaticConnector::single(transport), settings)
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    /// Whether `channel` has been brought up
    pub fn is_connected(&self, channel: u8) -> bool {
        lock(&self.links).contains_key(&channel)
    }

    /// Bring up `channel` now instead of on first use
    pub fn connect(&self, channel: u8) -> Result<()> {
        self.link(channel).map(|_| ())
    }

    /// Send `request` on `channel` and receive its `response`
    ///
    /// Assigns the next sequence number, then writes the request and reads
    /// the answer with the configured per-leg timeout. A failed leg retries
    /// the whole exchange. The response must echo the request's type and
    /// sequence number; anything else desynchronizes the link and is fatal.
    ///
    /// After a fatal error the link stays out of service and every further
    /// transfer on it fails with [`HostError::LinkBroken`] without touching
    /// the device.
    pub fn transfer(&self, channel: u8, request: &mut Packet, response: &mut Packet) -> Result<()> {
        self.transfer_with_timeout(channel, request, response, self.settings.timeout)
    }

    pub fn transfer_with_timeout(
        &self,
        channel: u8,
        request: &mut Packet,
        response: &mut Packet,
        timeout: Duration,
    ) -> Result<()> {
        let link = self.link(channel)?;
        let mut sequence = lock(&self.sequence);
        if link.is_broken() {
            return Err(HostError::LinkBroken { channel });
        }
        request.set_sequence(sequence.next_sequence());
        self.exchange(&link, request, response, timeout)
            .inspect_err(|e| {
                if e.is_fatal() {
                    link.mark_broken(e);
                }
            })
    }

    /// Whether `channel` was taken out of service by a fatal error
    pub fn is_broken(&self, channel: u8) -> bool {
        lock(&self.links)
            .get(&channel)
            .is_some_and(|link| link.is_broken())
    }

    /// Transfer `request` and turn a failure status into an error
    ///
    /// This is the entry point for the peripheral wrappers.
    pub fn request(&self, channel: u8, mut request: Packet) -> Result<Packet> {
        let mut response = Packet::new();
        self.transfer(channel, &mut request, &mut response)?;

        let status = response.status()?;
        if status.is_failure() {
            return Err(HostError::Peripheral {
                kind: request.packet_type()?,
                status,
            });
        }
        Ok(response)
    }

    /// Register `listener` for Event interface frames from `channel`
    ///
    /// The first registration on a channel starts its event loop.
    pub fn add_listener(
        &self,
        channel: u8,
        listener: Arc<dyn EventListener>,
    ) -> Result<ListenerId> {
        let link = self.link(channel)?;
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        lock(&link.listeners).push((id, listener));

        if !link.event_loop.swap(true, Ordering::SeqCst) {
            let name = format!("event-loop-{}", channel);
            let worker = Arc::clone(&link);
            if let Err(e) = std::thread::Builder::new()
                .name(name)
                .spawn(move || worker.run_event_loop())
            {
                link.event_loop.store(false, Ordering::SeqCst);
                lock(&link.listeners).retain(|(other, _)| *other != id);
                return Err(HostError::Transport(TransportError::Io(e.to_string())));
            }
        }

        debug!("Listener {:?} registered on channel {}", id, channel);
        Ok(id)
    }

    /// Remove a listener; returns whether it was registered
    ///
    /// The event loop keeps running with no listeners.
    pub fn remove_listener(&self, channel: u8, id: ListenerId) -> bool {
        let Some(link) = lock(&self.links).get(&channel).cloned() else {
            return false;
        };
        let mut listeners = lock(&link.listeners);
        let before = listeners.len();
        listeners.retain(|(other, _)| *other != id);
        before != listeners.len()
    }

    pub fn listener_count(&self, channel: u8) -> usize {
        lock(&self.links)
            .get(&channel)
            .map_or(0, |link| lock(&link.listeners).len())
    }

    /// Look up or bring up the link for `channel`
    fn link(&self, channel: u8) -> Result<Arc<Link>> {
        if channel as usize >= MAX_USB_DEVICES {
            return Err(HostError::InvalidChannel(channel));
        }
        if let Some(link) = lock(&self.links).get(&channel) {
            return Ok(Arc::clone(link));
        }

        let _guard = lock(&self.connect_lock);
        if let Some(link) = lock(&self.links).get(&channel) {
            return Ok(Arc::clone(link));
        }

        let transport = self.connector.connect(channel)?;
        let link = Arc::new(Link::new(channel, transport));
        if self.settings.reset_on_connect {
            self.reset_link(&link)?;
        }

        lock(&self.links).insert(channel, Arc::clone(&link));
        info!("Bridge on channel {} connected", channel);
        Ok(link)
    }

    /// Reset the firmware so it starts from empty queues
    ///
    /// A fatal failure leaves the link registered but out of service.
    fn reset_link(&self, link: &Link) -> Result<()> {
        let mut request = Packet::command(PacketType::SysSwReset);
        let mut response = Packet::new();
        {
            let mut sequence = lock(&self.sequence);
            request.set_sequence(sequence.next_sequence());
            match self.exchange(link, &mut request, &mut response, RESET_TIMEOUT) {
                Ok(()) => {}
                Err(e @ HostError::DeviceDisconnected { .. }) => return Err(e),
                Err(e) if e.is_fatal() => link.mark_broken(&e),
                Err(e) => warn!("Reset of channel {} failed: {}", link.channel, e),
            }
        }
        std::thread::sleep(self.settings.reset_settle);
        Ok(())
    }

    fn exchange(
        &self,
        link: &Link,
        request: &mut Packet,
        response: &mut Packet,
        timeout: Duration,
    ) -> Result<()> {
        request.set_status(Status::Cmd);
        let attempts = self.settings.max_attempts.max(1);
        let mut last = TransportError::Timeout;

        for attempt in 1..=attempts {
            trace!("TX ch{} #{}: {}", link.channel, attempt, request);
            match link.exchange_once(request, response, timeout) {
                Ok(()) => {
                    trace!("RX ch{}: {}", link.channel, response);
                    return verify(link.channel, request, response);
                }
                Err(TransportError::NoDevice) => {
                    error!("Bridge on channel {} disconnected", link.channel);
                    return Err(HostError::DeviceDisconnected {
                        channel: link.channel,
                    });
                }
                Err(e) => {
                    warn!(
                        "Transfer attempt {}/{} on channel {} failed: {}",
                        attempt, attempts, link.channel, e
                    );
                    last = e;
                }
            }
        }

        error!(
            "Transfer on channel {} failed after {} attempts",
            link.channel, attempts
        );
        Err(HostError::TransferFailed { attempts, last })
    }
}

/// Check that `response` answers `request`
fn verify(channel: u8, request: &Packet, response: &Packet) -> Result<()> {
    if response.raw_type() != request.raw_type() {
        error!(
            "Type mismatch on channel {}: sent {:#04x}, received {:#04x}",
            channel,
            request.raw_type(),
            response.raw_type()
        );
        return Err(HostError::TypeMismatch {
            sent: request.packet_type()?,
            received: response.raw_type(),
        });
    }
    if response.sequence() != request.sequence() {
        error!(
            "Sequence mismatch on channel {}: expected {}, received {}",
            channel,
            request.sequence(),
            response.sequence()
        );
        return Err(HostError::SequenceMismatch {
            expected: request.sequence(),
            received: response.sequence(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::command_packet;

    /// Device that answers requests with a header tweak
    ///
    /// The tweak applies to the first `faulty` replies; later replies echo
    /// the request correctly.
    struct Scripted {
        reply: Mutex<Vec<Vec<u8>>>,
        last_write: Mutex<Vec<u8>>,
        writes: AtomicU64,
        seq_offset: u8,
        type_override: Option<u8>,
        faulty: u64,
    }

    impl Scripted {
        fn new(seq_offset: u8) -> Self {
            Self {
                reply: Mutex::new(Vec::new()),
                last_write: Mutex::new(Vec::new()),
                writes: AtomicU64::new(0),
                seq_offset,
                type_override: None,
                faulty: u64::MAX,
            }
        }

        fn with_type(packet_type: PacketType) -> Self {
            Self {
                type_override: Some(packet_type as u8),
                ..Self::new(0)
            }
        }

        fn faulty_once(mut self) -> Self {
            self.faulty = 1;
            self
        }

        fn writes(&self) -> u64 {
            self.writes.load(Ordering::SeqCst)
        }
    }

    impl UsbTransport for Scripted {
        fn write(
            &self,
            _iface: Interface,
            data: &[u8],
            _timeout: Duration,
        ) -> std::result::Result<usize, TransportError> {
            let mut frame = data.to_vec();
            if self.writes.fetch_add(1, Ordering::SeqCst) < self.faulty {
                frame[1] = frame[1].wrapping_add(self.seq_offset);
                if let Some(packet_type) = self.type_override {
                    frame[0] = packet_type;
                }
            }
            frame[3] = 2;
            lock(&self.reply).push(frame);
            *lock(&self.last_write) = data.to_vec();
            Ok(data.len())
        }

        fn read(
            &self,
            _iface: Interface,
            buf: &mut [u8],
            _timeout: Option<Duration>,
        ) -> std::result::Result<usize, TransportError> {
            let frame = lock(&self.reply).pop().ok_or(TransportError::Timeout)?;
            buf[..frame.len()].copy_from_slice(&frame);
            Ok(frame.len())
        }

        fn clear_halt(&self, _endpoint: u8) -> std::result::Result<(), TransportError> {
            Ok(())
        }
    }

    fn quiet_settings() -> TransferSettings {
        TransferSettings {
            reset_on_connect: false,
            ..TransferSettings::default()
        }
    }

    #[test]
    fn test_sequence_numbers_advance() {
        let manager =
            TransportManager::with_transport(Arc::new(Scripted::new(0)), quiet_settings());
        let mut response = Packet::new();

        for expected in 0..3u8 {
            let mut request = command_packet(PacketType::GpioGetValue, &[4]);
            manager.transfer(0, &mut request, &mut response).unwrap();
            assert_eq!(request.sequence(), expected);
            assert_eq!(response.sequence(), expected);
        }
    }

    #[test]
    fn test_sequence_mismatch_is_fatal() {
        let manager =
            TransportManager::with_transport(Arc::new(Scripted::new(1)), quiet_settings());
        let mut request = command_packet(PacketType::GpioGetValue, &[4]);
        let mut response = Packet::new();

        let err = manager.transfer(0, &mut request, &mut response).unwrap_err();
        assert!(matches!(
            err,
            HostError::SequenceMismatch {
                expected: 0,
                received: 1
            }
        ));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_link_refuses_transfers_after_desync() {
        let device = Arc::new(Scripted::new(7).faulty_once());
        let manager = TransportManager::with_transport(device.clone(), quiet_settings());
        let mut response = Packet::new();

        let mut request = command_packet(PacketType::GpioGetValue, &[4]);
        let err = manager.transfer(0, &mut request, &mut response).unwrap_err();
        assert!(matches!(err, HostError::SequenceMismatch { .. }));
        assert!(manager.is_broken(0));
        assert_eq!(device.writes(), 1);

        // The device would answer correctly now, but the link stays down
        let mut request = command_packet(PacketType::GpioGetValue, &[4]);
        let err = manager.transfer(0, &mut request, &mut response).unwrap_err();
        assert!(matches!(err, HostError::LinkBroken { channel: 0 }));
        assert!(err.is_fatal());
        assert_eq!(device.writes(), 1);
    }

    #[test]
    fn test_type_mismatch_is_fatal() {
        let device = Arc::new(Scripted::with_type(PacketType::SpiRead));
        let manager = TransportManager::with_transport(device.clone(), quiet_settings());
        let mut request = command_packet(PacketType::GpioGetValue, &[4]);
        let mut response = Packet::new();

        let err = manager.transfer(0, &mut request, &mut response).unwrap_err();
        assert!(matches!(
            err,
            HostError::TypeMismatch {
                sent: PacketType::GpioGetValue,
                ..
            }
        ));
        assert!(err.is_fatal());

        assert!(matches!(
            manager.request(0, command_packet(PacketType::GpioGetValue, &[4])),
            Err(HostError::LinkBroken { channel: 0 })
        ));
        assert_eq!(device.writes(), 1);
    }

    #[test]
    fn test_healthy_link_is_not_broken() {
        let manager =
            TransportManager::with_transport(Arc::new(Scripted::new(0)), quiet_settings());
        assert!(!manager.is_broken(0));
        manager.connect(0).unwrap();
        assert!(!manager.is_broken(0));
    }

    #[test]
    fn test_invalid_channel() {
        let manager =
            TransportManager::with_transport(Arc::new(Scripted::new(0)), quiet_settings());
        let mut request = command_packet(PacketType::SysInit, &[]);
        let mut response = Packet::new();

        assert!(matches!(
            manager.transfer(8, &mut request, &mut response),
            Err(HostError::InvalidChannel(8))
        ));
        assert!(matches!(
            manager.transfer(1, &mut request, &mut response),
            Err(HostError::DeviceNotFound { index: 1 })
        ));
    }

    #[test]
    fn test_default_settings() {
        let settings = TransferSettings::default();
        assert_eq!(settings.max_attempts, 4);
        assert_eq!(settings.timeout, Duration::from_millis(600));
        assert!(settings.reset_on_connect);
    }
}
