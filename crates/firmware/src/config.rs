//! Firmware tunables

use crate::error::{FirmwareError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirmwareConfig {
    /// Request slots (and index queue depth) between the USB and dispatch contexts
    #[serde(default = "FirmwareConfig::default_rx_slots")]
    pub rx_slots: usize,

    #[serde(default = "FirmwareConfig::default_gpio_event_queue")]
    pub gpio_event_queue: usize,

    /// Per-UART receive queue used for `SERIAL_EVENT`
    #[serde(default = "FirmwareConfig::default_uart_rx_queue")]
    pub uart_rx_queue: usize,

    #[serde(default = "FirmwareConfig::default_watchdog_ms")]
    pub watchdog_ms: u64,

    /// How long the USB context waits for host data per iteration
    #[serde(default = "FirmwareConfig::default_usb_poll_ms")]
    pub usb_poll_ms: u64,

    /// Sleep of the dispatch context when no request is queued; `0` polls
    /// events again immediately
    #[serde(default = "FirmwareConfig::default_idle_backoff_us")]
    pub idle_backoff_us: u64,

    #[serde(default)]
    pub blink: BlinkSettings,

    /// Default I2C transfer timeout
    #[serde(default = "FirmwareConfig::default_i2c_timeout_us")]
    pub i2c_timeout_us: u32,
}

/// LED toggle intervals per bus state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlinkSettings {
    pub mounted_ms: u64,
    pub not_mounted_ms: u64,
    pub suspended_ms: u64,
}

impl Default for BlinkSettings {
    fn default() -> Self {
        Self {
            mounted_ms: 250,
            not_mounted_ms: 500,
            suspended_ms: 2500,
        }
    }
}

impl Default for FirmwareConfig {
    fn default() -> Self {
        Self {
            rx_slots: Self::default_rx_slots(),
            gpio_event_queue: Self::default_gpio_event_queue(),
            uart_rx_queue: Self::default_uart_rx_queue(),
            watchdog_ms: Self::default_watchdog_ms(),
            usb_poll_ms: Self::default_usb_poll_ms(),
            idle_backoff_us: Self::default_idle_backoff_us(),
            blink: BlinkSettings::default(),
            i2c_timeout_us: Self::default_i2c_timeout_us(),
        }
    }
}

impl FirmwareConfig {
    fn default_rx_slots() -> usize {
        6
    }

    fn default_gpio_event_queue() -> usize {
        8
    }

    fn default_uart_rx_queue() -> usize {
        32
    }

    fn default_watchdog_ms() -> u64 {
        2000
    }

    fn default_usb_poll_ms() -> u64 {
        1
    }

    fn default_idle_backoff_us() -> u64 {
        200
    }

    fn default_i2c_timeout_us() -> u32 {
        1_000_000
    }

    /// Parse and validate a TOML document; missing keys take their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: FirmwareConfig = toml::from_str(content)
            .map_err(|e| FirmwareError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.rx_slots == 0 {
            return Err(FirmwareError::Config("rx_slots must be at least 1".into()));
        }
        if self.gpio_event_queue < 2 {
            return Err(FirmwareError::Config(
                "gpio_event_queue must be at least 2".into(),
            ));
        }
        if self.uart_rx_queue == 0 {
            return Err(FirmwareError::Config(
                "uart_rx_queue must be at least 1".into(),
            ));
        }
        if self.watchdog_ms == 0 {
            return Err(FirmwareError::Config("watchdog_ms must be non-zero".into()));
        }
        Ok(())
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_ms)
    }

    pub fn usb_poll_interval(&self) -> Duration {
        Duration::from_millis(self.usb_poll_ms)
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_micros(self.idle_backoff_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FirmwareConfig::default();
        assert_eq!(config.rx_slots, 6);
        assert_eq!(config.gpio_event_queue, 8);
        assert_eq!(config.watchdog_timeout(), Duration::from_secs(2));
        assert_eq!(config.blink.suspended_ms, 2500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = FirmwareConfig::from_toml_str(
            r#"
rx_slots = 3

[blink]
mounted_ms = 100
not_mounted_ms = 200
suspended_ms = 300
"#,
        )
        .unwrap();
        assert_eq!(config.rx_slots, 3);
        assert_eq!(config.blink.mounted_ms, 100);
        assert_eq!(config.i2c_timeout_us, 1_000_000);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(FirmwareConfig::from_toml_str("rx_slots = 0").is_err());
        assert!(FirmwareConfig::from_toml_str("gpio_event_queue = 1").is_err());
        assert!(FirmwareConfig::from_toml_str("rx_slots = \"six\"").is_err());
    }
}
