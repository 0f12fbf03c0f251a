//! Firmware runtime
//!
//! Boots the dispatcher and runs it on three threads:
//!
//! - `usb-task` services the device stack, queues received requests, blinks
//!   the LED and feeds the watchdog
//! - `dispatch` polls the event queues and serves queued requests
//! - `watchdog` reboots the board if `usb-task` stalls

use crate::blink::LedBlinker;
use crate::config::FirmwareConfig;
use crate::dispatcher::{Dispatcher, RxQueue};
use crate::error::{FirmwareError, Result};
use crate::hal::{Board, Peripherals};
use crate::task::{StateCell, Task};
use crate::tasks::{AnalogTask, GpioTask, I2cTask, SerialTask, SpiTask};
use crate::watchdog::SoftWatchdog;
use common::{BoundedEventQueue, CdcPort, TransportError};
use protocol::{GpioEvent, Interface, MAX_PACKET_SIZE, Packet, PacketType};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

pub struct Firmware;

impl Firmware {
    /// Start the firmware on `port`
    ///
    /// Every task is initialized before the threads start, so the first
    /// request received is already served.
    pub fn start(
        config: FirmwareConfig,
        peripherals: Peripherals,
        port: Arc<dyn CdcPort>,
    ) -> Result<FirmwareHandle> {
        config.validate()?;

        let Peripherals {
            gpio,
            spi,
            i2c,
            uart,
            analog,
            board,
        } = peripherals;

        let gpio = GpioTask::new(gpio, config.gpio_event_queue);
        let gpio_events = gpio.events();
        let tasks: Vec<Box<dyn Task>> = vec![
            Box::new(gpio),
            Box::new(SpiTask::new(spi)),
            Box::new(AnalogTask::new(analog)),
            Box::new(I2cTask::new(i2c, config.i2c_timeout_us)),
            Box::new(SerialTask::new(uart, config.uart_rx_queue)),
        ];

        let rx = Arc::new(RxQueue::new(config.rx_slots));
        let mut dispatcher = Dispatcher::new(
            tasks,
            Arc::clone(&port),
            Arc::clone(&board),
            Arc::clone(&rx),
        );
        dispatcher.init();
        let state = dispatcher.state();

        let shutdown = Arc::new(AtomicBool::new(false));
        let watchdog = Arc::new(SoftWatchdog::new(config.watchdog_timeout()));
        let mut threads = Vec::with_capacity(3);

        let usb = UsbContext {
            config: config.clone(),
            port,
            board: Arc::clone(&board),
            state: Arc::clone(&state),
            rx: Arc::clone(&rx),
            watchdog: Arc::clone(&watchdog),
            shutdown: Arc::clone(&shutdown),
        };
        threads.push(spawn("usb-task", move || usb.run())?);

        let dispatch = DispatchContext {
            config,
            dispatcher,
            shutdown: Arc::clone(&shutdown),
        };
        threads.push(spawn("dispatch", move || dispatch.run())?);

        {
            let watchdog = Arc::clone(&watchdog);
            let board = Arc::clone(&board);
            let shutdown = Arc::clone(&shutdown);
            threads.push(spawn("watchdog", move || {
                watchdog.monitor(board.as_ref(), &shutdown)
            })?);
        }

        info!("Firmware started");
        Ok(FirmwareHandle {
            state,
            rx,
            gpio_events,
            shutdown,
            threads,
        })
    }
}

fn spawn(
    name: &'static str,
    f: impl FnOnce() + Send + 'static,
) -> Result<(&'static str, JoinHandle<()>)> {
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map(|handle| (name, handle))
        .map_err(|source| FirmwareError::Spawn { name, source })
}

/// Control handle for running firmware
pub struct FirmwareHandle {
    state: Arc<StateCell>,
    rx: Arc<RxQueue>,
    gpio_events: Arc<BoundedEventQueue<GpioEvent>>,
    shutdown: Arc<AtomicBool>,
    threads: Vec<(&'static str, JoinHandle<()>)>,
}

impl FirmwareHandle {
    /// Dispatcher state
    pub fn state(&self) -> &StateCell {
        &self.state
    }

    pub fn rx_queue(&self) -> &RxQueue {
        &self.rx
    }

    pub fn gpio_events(&self) -> &BoundedEventQueue<GpioEvent> {
        &self.gpio_events
    }

    /// Stop every thread and wait for them to exit
    pub fn shutdown(mut self) -> Result<()> {
        self.stop_threads()
    }

    fn stop_threads(&mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::Release);
        let mut result = Ok(());
        for (name, handle) in self.threads.drain(..) {
            if handle.join().is_err() {
                error!("{} thread panicked", name);
                result = Err(FirmwareError::Panicked(name));
            }
        }
        result
    }
}

impl Drop for FirmwareHandle {
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            let _ = self.stop_threads();
        }
    }
}

/// Device stack servicing: context A
struct UsbContext {
    config: FirmwareConfig,
    port: Arc<dyn CdcPort>,
    board: Arc<dyn Board>,
    state: Arc<StateCell>,
    rx: Arc<RxQueue>,
    watchdog: Arc<SoftWatchdog>,
    shutdown: Arc<AtomicBool>,
}

impl UsbContext {
    fn run(self) {
        debug!("USB context started");
        let mut blinker = LedBlinker::new(self.config.blink.clone());
        let mut buf = [0u8; MAX_PACKET_SIZE];
        let poll = self.config.usb_poll_interval();

        while !self.shutdown.load(Ordering::Acquire) {
            while let Some(event) = self.port.poll_event(Duration::ZERO) {
                debug!("Bus event: {:?}", event);
                blinker.on_bus_event(event);
            }

            match self.port.read(Interface::Data, &mut buf, poll) {
                Ok(0) | Err(TransportError::Timeout) => {}
                Ok(n) => self.on_rx(&buf[..n]),
                Err(e) => {
                    debug!("Data read failed: {}", e);
                    std::thread::sleep(poll);
                }
            }

            blinker.tick(self.board.as_ref());
            self.watchdog.feed();
        }
        debug!("USB context stopped");
    }

    fn on_rx(&self, frame: &[u8]) {
        if self.state.is_stopped() {
            trace!("Dispatcher stopped, discarding {} bytes", frame.len());
            return;
        }
        if let Err(e) = self.rx.push(frame) {
            warn!("Discarding malformed frame: {}", e);
        }
    }
}

/// Request processing: context B
///
/// Each pass serves both event polls and at most one queued request. An
/// empty request queue never blocks the loop: the thread sleeps
/// `idle_backoff_us` before the next event poll, or only yields when that is
/// `0`.
struct DispatchContext {
    config: FirmwareConfig,
    dispatcher: Dispatcher,
    shutdown: Arc<AtomicBool>,
}

impl DispatchContext {
    fn run(mut self) {
        debug!("Dispatch context started");
        let rx = self.dispatcher.rx_queue();
        let idle = self.config.idle_backoff();
        let gpio_poll = Packet::command(PacketType::GpioEvent);
        let serial_poll = Packet::command(PacketType::SerialEvent);

        while !self.shutdown.load(Ordering::Acquire) {
            self.dispatcher.process(&gpio_poll);
            self.dispatcher.process(&serial_poll);

            match rx.pop() {
                Some(request) => {
                    trace!("RX {}", request);
                    self.dispatcher.process(&request);
                }
                None if idle.is_zero() => std::thread::yield_now(),
                None => std::thread::sleep(idle),
            }
        }
        debug!("Dispatch context stopped");
    }
}
