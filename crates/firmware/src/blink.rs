//! Liveness LED
//!
//! The LED toggles at a rate that tells the bus state apart: fast when
//! mounted, slower when not mounted and very slow while suspended.

use crate::config::BlinkSettings;
use crate::hal::Board;
use common::BusEvent;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct LedBlinker {
    settings: BlinkSettings,
    mounted: bool,
    interval: Duration,
    last_toggle: Instant,
    led_on: bool,
}

impl LedBlinker {
    pub fn new(settings: BlinkSettings) -> Self {
        let interval = Duration::from_millis(settings.not_mounted_ms);
        Self {
            settings,
            mounted: false,
            interval,
            last_toggle: Instant::now(),
            led_on: false,
        }
    }

    pub fn on_bus_event(&mut self, event: BusEvent) {
        let ms = match event {
            BusEvent::Mounted => {
                self.mounted = true;
                self.settings.mounted_ms
            }
            BusEvent::Unmounted => {
                self.mounted = false;
                self.settings.not_mounted_ms
            }
            BusEvent::Suspended => self.settings.suspended_ms,
            BusEvent::Resumed if self.mounted => self.settings.mounted_ms,
            BusEvent::Resumed => self.settings.not_mounted_ms,
        };
        self.interval = Duration::from_millis(ms);
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_on(&self) -> bool {
        self.led_on
    }

    pub fn tick(&mut self, board: &dyn Board) {
        self.tick_at(Instant::now(), board);
    }

    /// Toggle the LED if a full interval has passed since the last toggle
    pub fn tick_at(&mut self, now: Instant, board: &dyn Board) {
        if now.saturating_duration_since(self.last_toggle) < self.interval {
            return;
        }
        self.last_toggle = now;
        self.led_on = !self.led_on;
        board.set_led(self.led_on);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Led(Mutex<Vec<bool>>);

    impl Board for Led {
        fn set_led(&self, on: bool) {
            self.0.lock().unwrap().push(on);
        }

        fn reset(&self) {}
    }

    #[test]
    fn test_interval_follows_bus_state() {
        let mut blinker = LedBlinker::new(BlinkSettings::default());
        assert_eq!(blinker.interval(), Duration::from_millis(500));

        blinker.on_bus_event(BusEvent::Mounted);
        assert_eq!(blinker.interval(), Duration::from_millis(250));

        blinker.on_bus_event(BusEvent::Suspended);
        assert_eq!(blinker.interval(), Duration::from_millis(2500));

        blinker.on_bus_event(BusEvent::Resumed);
        assert_eq!(blinker.interval(), Duration::from_millis(250));

        blinker.on_bus_event(BusEvent::Unmounted);
        blinker.on_bus_event(BusEvent::Resumed);
        assert_eq!(blinker.interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_toggles_once_per_interval() {
        let led = Led::default();
        let mut blinker = LedBlinker::new(BlinkSettings::default());
        blinker.on_bus_event(BusEvent::Mounted);
        let start = blinker.last_toggle;

        blinker.tick_at(start + Duration::from_millis(100), &led);
        assert!(led.0.lock().unwrap().is_empty());

        blinker.tick_at(start + Duration::from_millis(250), &led);
        blinker.tick_at(start + Duration::from_millis(300), &led);
        blinker.tick_at(start + Duration::from_millis(500), &led);
        assert_eq!(*led.0.lock().unwrap(), vec![true, false]);
        assert!(!blinker.is_on());
    }
}
