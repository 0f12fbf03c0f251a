//! Host configuration management

use crate::error::HostError;
use crate::manager::TransferSettings;
use anyhow::{Context, Result, anyhow};
use protocol::usb::MAX_USB_DEVICES;
use protocol::{PRODUCT_ID, VENDOR_ID};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Host configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub usb: UsbSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Device selection and transfer policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UsbSettings {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Ordinal among attached bridges; becomes channel 0
    pub device_index: u8,
    pub transfer_timeout_ms: u64,
    pub max_attempts: u32,
    /// Reset the firmware when a channel is first used
    pub reset_on_connect: bool,
    pub reset_settle_ms: u64,
}

impl Default for UsbSettings {
    fn default() -> Self {
        let transfer = TransferSettings::default();
        Self {
            vendor_id: VENDOR_ID,
            product_id: PRODUCT_ID,
            device_index: 0,
            transfer_timeout_ms: transfer.timeout.as_millis() as u64,
            max_attempts: transfer.max_attempts,
            reset_on_connect: transfer.reset_on_connect,
            reset_settle_ms: transfer.reset_settle.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl HostConfig {
    /// Load configuration from file
    ///
    /// Without an explicit path the user config directory is tried, then
    /// `/etc/iobridge/host.toml`.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/iobridge/host.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or fall back to defaults
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Using default configuration: {:#}", e);
                Self::default()
            }
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: HostConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get default configuration path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("iobridge").join("host.toml")
        } else {
            PathBuf::from("/etc/iobridge/host.toml")
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        if !common::logging::is_valid_level(&self.logging.level) {
            return Err(HostError::Config(format!(
                "Invalid log level '{}', must be one of: trace, debug, info, warn, error",
                self.logging.level
            )));
        }
        if self.usb.max_attempts == 0 {
            return Err(HostError::Config("max_attempts must be at least 1".into()));
        }
        if self.usb.transfer_timeout_ms == 0 {
            return Err(HostError::Config(
                "transfer_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.usb.device_index as usize >= MAX_USB_DEVICES {
            return Err(HostError::Config(format!(
                "device_index {} out of range, at most {} bridges are supported",
                self.usb.device_index, MAX_USB_DEVICES
            )));
        }
        Ok(())
    }

    pub fn transfer_settings(&self) -> TransferSettings {
        TransferSettings {
            timeout: Duration::from_millis(self.usb.transfer_timeout_ms),
            max_attempts: self.usb.max_attempts,
            reset_on_connect: self.usb.reset_on_connect,
            reset_settle: Duration::from_millis(self.usb.reset_settle_ms),
        }
    }
}

/// Load configuration from a path that may start with `~`
pub fn load_config(path: &str) -> Result<HostConfig> {
    let path_buf = PathBuf::from(shellexpand::tilde(path).as_ref());
    HostConfig::load(Some(path_buf))
}
