//! Board-level commands

use super::{ChannelBinding, Peripheral, command};
use crate::error::Result;
use crate::manager::TransportManager;
use protocol::PacketType;
use std::sync::Arc;
use tracing::info;

/// Reset and identification commands for one bridge
pub struct System {
    manager: Arc<TransportManager>,
    binding: ChannelBinding,
}

impl System {
    pub fn new(manager: Arc<TransportManager>) -> Self {
        Self {
            manager,
            binding: ChannelBinding::new(),
        }
    }

    /// Stop the firmware, drop everything queued on both interfaces and
    /// resume
    pub fn software_reset(&self) -> Result<()> {
        self.request(command(PacketType::SysSwReset, &[])?)?;
        info!("Bridge on channel {} reset", self.channel());
        Ok(())
    }

    /// Ask the board to reboot; the link drops shortly after
    pub fn hardware_reset(&self) -> Result<()> {
        self.request(command(PacketType::SysHwReset, &[])?)?;
        info!("Bridge on channel {} rebooting", self.channel());
        Ok(())
    }

    /// Version string reported by the firmware, if it reports one
    pub fn firmware_version(&self) -> Result<Option<String>> {
        let response = self.request(command(PacketType::SysGetFwVer, &[])?)?;
        if response.payload().is_empty() {
            return Ok(None);
        }
        Ok(Some(
            String::from_utf8_lossy(response.payload())
                .trim_end_matches('\0')
                .to_string(),
        ))
    }
}

impl Peripheral for System {
    fn manager(&self) -> &TransportManager {
        &self.manager
    }

    fn binding(&self) -> &ChannelBinding {
        &self.binding
    }

    fn initialize(&self, channel: u8) -> Result<()> {
        self.manager
            .request(channel, command(PacketType::SysInit, &[])?)?;
        Ok(())
    }
}
