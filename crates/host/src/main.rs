//! iobridge - diagnostic tool for USB I/O bridges

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use common::setup_logging;
use host::peripherals::{Gpio, System};
use host::usb::{RusbConnector, list_bridges};
use host::{HostConfig, Peripheral, TransportManager};
use protocol::PinMode;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "iobridge")]
#[command(author, version, about = "Talk to USB I/O bridge boards")]
#[command(long_about = "
Diagnostic tool for USB GPIO/SPI/I2C/UART bridge boards.

EXAMPLES:
    # List attached bridges
    iobridge list

    # Reset the first bridge and ask for its firmware version
    iobridge probe

    # Drive GP25 high on the second bridge
    iobridge --channel 1 gpio-set 25 1

CONFIGURATION:
    The tool looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/iobridge/host.toml
    3. /etc/iobridge/host.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Logical bridge channel
    #[arg(long, default_value_t = 0)]
    channel: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enumerate attached bridges
    List,
    /// Open a bridge, reset its firmware and query the version
    Probe,
    /// Drive a pin
    GpioSet {
        pin: u8,
        /// 0 or 1
        value: u8,
    },
    /// Sample a pin
    GpioGet {
        pin: u8,
        /// Enable the internal pull-up
        #[arg(long)]
        pull_up: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = HostConfig::default();
        let path = HostConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        host::config::load_config(path).context("Failed to load configuration")?
    } else {
        HostConfig::load_or_default()
    };

    let log_level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("iobridge v{}", env!("CARGO_PKG_VERSION"));

    let Some(command) = args.command else {
        bail!("No command given, see --help");
    };

    match command {
        Command::List => list(&config),
        Command::Probe => {
            let manager = open(&config)?;
            probe(manager, args.channel)
        }
        Command::GpioSet { pin, value } => {
            let manager = open(&config)?;
            let gpio = Gpio::output(manager, pin)?;
            gpio.attach(args.channel)?;
            gpio.write(value != 0)
                .with_context(|| format!("Failed to set GP{}", pin))?;
            println!("GP{} = {}", pin, value != 0);
            Ok(())
        }
        Command::GpioGet { pin, pull_up } => {
            let manager = open(&config)?;
            let mode = if pull_up {
                PinMode::PullUp
            } else {
                PinMode::PullNone
            };
            let gpio = Gpio::input(manager, pin, mode)?;
            gpio.attach(args.channel)?;
            let level = gpio
                .read()
                .with_context(|| format!("Failed to read GP{}", pin))?;
            println!("GP{} = {}", pin, level as u8);
            Ok(())
        }
    }
}

fn open(config: &HostConfig) -> Result<Arc<TransportManager>> {
    let connector =
        RusbConnector::from_settings(&config.usb).context("Failed to initialize libusb")?;
    Ok(Arc::new(TransportManager::new(
        connector,
        config.transfer_settings(),
    )))
}

fn list(config: &HostConfig) -> Result<()> {
    let connector =
        RusbConnector::from_settings(&config.usb).context("Failed to initialize libusb")?;
    let bridges = list_bridges(
        connector.context(),
        config.usb.vendor_id,
        config.usb.product_id,
    )?;

    if bridges.is_empty() {
        println!(
            "No bridges found ({:04x}:{:04x})",
            config.usb.vendor_id, config.usb.product_id
        );
        return Ok(());
    }

    for bridge in bridges {
        println!(
            "[{}] bus {:03} address {:03} serial {}",
            bridge.index,
            bridge.bus_number,
            bridge.address,
            bridge.serial_number.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn probe(manager: Arc<TransportManager>, channel: u8) -> Result<()> {
    manager
        .connect(channel)
        .with_context(|| format!("Failed to open bridge on channel {}", channel))?;

    let system = System::new(manager);
    system.attach(channel)?;
    system.software_reset().context("Software reset failed")?;

    match system.firmware_version()? {
        Some(version) => println!("Channel {}: firmware {}", channel, version),
        None => println!("Channel {}: bridge responding", channel),
    }
    Ok(())
}
