//! Digital pin

use super::{ChannelBinding, Peripheral, check_echo, check_pin, command};
use crate::error::Result;
use crate::manager::{ListenerId, TransportManager};
use common::lock;
use protocol::{GpioEvent, GpioEvents, Packet, PacketType, PinDirection, PinMode};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
struct PinConfig {
    mode: PinMode,
    direction: PinDirection,
}

/// One GPIO pin on the bridge
pub struct Gpio {
    manager: Arc<TransportManager>,
    binding: ChannelBinding,
    pin: u8,
    config: Mutex<PinConfig>,
    /// Channel and id of the interrupt listener, if one is installed
    listener: Mutex<Option<(u8, ListenerId)>>,
}

impl Gpio {
    pub fn new(
        manager: Arc<TransportManager>,
        pin: u8,
        direction: PinDirection,
        mode: PinMode,
    ) -> Result<Self> {
        Ok(Self {
            manager,
            binding: ChannelBinding::new(),
            pin: check_pin(pin)?,
            config: Mutex::new(PinConfig { mode, direction }),
            listener: Mutex::new(None),
        })
    }

    pub fn output(manager: Arc<TransportManager>, pin: u8) -> Result<Self> {
        Self::new(manager, pin, PinDirection::Output, PinMode::PullNone)
    }

    pub fn input(manager: Arc<TransportManager>, pin: u8, mode: PinMode) -> Result<Self> {
        Self::new(manager, pin, PinDirection::Input, mode)
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    pub fn direction(&self) -> PinDirection {
        lock(&self.config).direction
    }

    pub fn mode(&self) -> PinMode {
        lock(&self.config).mode
    }

    /// Drive the pin; ignored with a warning while it is an input
    pub fn write(&self, value: bool) -> Result<()> {
        if self.direction() == PinDirection::Input {
            warn!("Write to input pin {} ignored", self.pin);
            return Ok(());
        }
        self.request(command(PacketType::GpioSetValue, &[self.pin, value as u8])?)?;
        Ok(())
    }

    pub fn read(&self) -> Result<bool> {
        let response = self.request(command(PacketType::GpioGetValue, &[self.pin])?)?;
        Ok(response.read_u8(0)? != 0)
    }

    pub fn set_mode(&self, mode: PinMode) -> Result<()> {
        let sent = [self.pin, mode.into()];
        let response = self.request(command(PacketType::GpioSetMode, &sent)?)?;
        check_echo("GPIO_SET_MODE", &sent, &response);
        lock(&self.config).mode = mode;
        Ok(())
    }

    pub fn set_direction(&self, direction: PinDirection) -> Result<()> {
        let sent = [self.pin, direction.into()];
        let response = self.request(command(PacketType::GpioSetDir, &sent)?)?;
        check_echo("GPIO_SET_DIR", &sent, &response);
        lock(&self.config).direction = direction;
        Ok(())
    }

    /// Width of the next pulse at `level`, or `None` if none completes in `timeout`
    pub fn pulse_in(&self, level: bool, timeout: Duration) -> Result<Option<Duration>> {
        let mut request = command(PacketType::GpioPulseIn, &[self.pin, level as u8])?;
        request.append_u64(timeout.as_micros() as u64)?;

        // The device may spend the whole timeout measuring
        let channel = self.ensure_initialized()?;
        let mut response = Packet::new();
        let leg_timeout = self.manager.settings().timeout + timeout;
        self.manager
            .transfer_with_timeout(channel, &mut request, &mut response, leg_timeout)?;

        if response.payload_len() < 8 {
            return Ok(None);
        }
        Ok(Some(Duration::from_micros(response.read_u64(0)?)))
    }

    /// Call `callback` for every `events` trigger on this pin
    ///
    /// Replaces any handler installed earlier.
    pub fn set_interrupt<F>(&self, events: GpioEvents, callback: F) -> Result<()>
    where
        F: Fn(GpioEvent) + Send + Sync + 'static,
    {
        let channel = self.ensure_initialized()?;
        self.remove_listener();

        let pin = self.pin;
        let listener = move |event: &Packet| {
            for item in decode_events(event) {
                if item.pin == pin && item.events.intersects(events) {
                    callback(GpioEvent::new(pin, item.events & events));
                }
            }
        };
        let id = self.manager.add_listener(channel, Arc::new(listener))?;
        *lock(&self.listener) = Some((channel, id));

        let mut request = command(PacketType::GpioSetIrq, &[self.pin, 1])?;
        request.append_u32(events.bits())?;
        let response = self.request(request.clone())?;
        check_echo("GPIO_SET_IRQ", request.payload(), &response);
        debug!("Interrupt on pin {} set for {:#x}", self.pin, events.bits());
        Ok(())
    }

    pub fn disable_interrupt(&self) -> Result<()> {
        let mut request = command(PacketType::GpioSetIrq, &[self.pin, 0])?;
        request.append_u32(GpioEvents::ALL.bits())?;
        self.request(request)?;
        self.remove_listener();
        Ok(())
    }

    /// Release the pin on the device
    pub fn deinit(&self) -> Result<()> {
        let channel = self.channel();
        self.remove_listener();
        self.manager
            .request(channel, command(PacketType::GpioDeinit, &[self.pin])?)?;
        self.binding.clear(channel);
        Ok(())
    }

    fn remove_listener(&self) {
        if let Some((channel, id)) = lock(&self.listener).take() {
            self.manager.remove_listener(channel, id);
        }
    }
}

impl Peripheral for Gpio {
    fn manager(&self) -> &TransportManager {
        &self.manager
    }

    fn binding(&self) -> &ChannelBinding {
        &self.binding
    }

    fn initialize(&self, channel: u8) -> Result<()> {
        let config = *lock(&self.config);
        let sent = [self.pin, config.mode.into(), config.direction.into()];
        let response = self
            .manager
            .request(channel, command(PacketType::GpioInit, &sent)?)?;
        check_echo("GPIO_INIT", &sent, &response);
        Ok(())
    }
}

impl Drop for Gpio {
    fn drop(&mut self) {
        self.remove_listener();
    }
}

/// Items of a `GPIO_EVENT` frame; anything else yields nothing
pub fn decode_events(event: &Packet) -> Vec<GpioEvent> {
    if !matches!(event.packet_type(), Ok(PacketType::GpioEvent)) {
        return Vec::new();
    }
    let count = event.read_u8(0).unwrap_or(0) as usize;
    (0..count)
        .map_while(|i| event.read_u32(1 + 4 * i).ok())
        .map(GpioEvent::from_wire)
        .collect()
}

impl std::fmt::Debug for Gpio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gpio")
            .field("pin", &self.pin)
            .field("channel", &self.channel())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_events() {
        let mut pkt = Packet::command(PacketType::GpioEvent);
        pkt.append_u8(2).unwrap();
        pkt.append_u32(GpioEvent::new(4, GpioEvents::RISE_EDGE).to_wire())
            .unwrap();
        pkt.append_u32(GpioEvent::new(7, GpioEvents::FALL_EDGE).to_wire())
            .unwrap();

        let events = decode_events(&pkt);
        assert_eq!(
            events,
            vec![
                GpioEvent::new(4, GpioEvents::RISE_EDGE),
                GpioEvent::new(7, GpioEvents::FALL_EDGE)
            ]
        );
    }

    #[test]
    fn test_decode_ignores_other_frames() {
        let mut pkt = Packet::command(PacketType::SerialEvent);
        pkt.append_bytes(&[1, 0, 0, 0, 0]).unwrap();
        assert!(decode_events(&pkt).is_empty());
    }

    #[test]
    fn test_decode_truncated_count() {
        let mut pkt = Packet::command(PacketType::GpioEvent);
        pkt.append_u8(3).unwrap();
        pkt.append_u32(GpioEvent::new(1, GpioEvents::LEVEL_LOW).to_wire())
            .unwrap();
        assert_eq!(decode_events(&pkt).len(), 1);
    }
}
