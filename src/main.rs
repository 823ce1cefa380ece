//! CLI Entry Point for sr620-logger
//!
//! Logs the A-B time interval measured by an SR620 counter into daily data
//! files. The removable medium may be unplugged at any time; it is caught up
//! with recent history when it comes back.
//!
//! # Usage
//!
//! ```bash
//! sr620-logger -c sr620-default.yml -d ./data -u /media/usb/sr620
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use sr620_logger::acquisition::Acquisition;
use sr620_logger::clock::SystemClock;
use sr620_logger::config::{ConfigOverrides, Settings};
use sr620_logger::data::DualWriter;
use sr620_logger::instrument::sr620::Sr620;
use sr620_logger::instrument::InstrumentSetup;
use sr620_logger::logging::{self, LoggingConfig};
use sr620_logger::state::StateFlags;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};

#[derive(Parser, Debug)]
#[command(name = "sr620-logger")]
#[command(
    about = "Logs PPS delay measurement between A-B channels with SR620.",
    after_help = "You may disconnect the usb flash drive anytime. Just do not forget to plug it in again."
)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "sr620-default.yml")]
    config: PathBuf,

    /// Serial device file pointer (default: /dev/ttyAMA0)
    #[arg(short = 's', long, help_heading = "Serial device")]
    serial_device: Option<String>,

    /// Serial device timeout in seconds (default: 3)
    #[arg(short = 't', long, help_heading = "Serial device")]
    timeout: Option<u64>,

    /// Configure the measurement instrument upon opening the serial device
    #[arg(short = 'i', long, help_heading = "Measurement")]
    config_instrument: bool,

    /// Trigger level for both A and B channel in volts
    #[arg(short = 'l', long, help_heading = "Measurement")]
    trigger_level: Option<f64>,

    /// Folder for primary data file location, must exist (default: ./data/)
    #[arg(short = 'd', long, help_heading = "Data files")]
    data_path: Option<PathBuf>,

    /// Data file prefix (default: sr620-)
    #[arg(short = 'p', long, help_heading = "Data files")]
    prefix: Option<String>,

    /// Folder for second data file location (default: /media/usb/sr620)
    #[arg(short = 'u', long, help_heading = "Data files")]
    usb_path: Option<PathBuf>,

    /// Days after which data files are deleted (default: 999)
    #[arg(short = 'm', long, help_heading = "Data files")]
    max_history: Option<u32>,

    /// Days synced to the second location upon connection (default: 32)
    #[arg(short = 'y', long, help_heading = "Data files")]
    max_sync: Option<u32>,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            serial_device: self.serial_device.clone(),
            timeout: self.timeout,
            configure_upon_start: self.config_instrument.then_some(true),
            trigger_level: self.trigger_level,
            primary_data_path: self.data_path.clone(),
            prefix: self.prefix.clone(),
            secondary_data_path: self.usb_path.clone(),
            max_history: self.max_history,
            max_sync: self.max_sync,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load(Some(&cli.config), &cli.overrides())
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    settings.validate().context("invalid configuration")?;

    logging::init(&LoggingConfig::from_settings(&settings)?)?;
    info!("Program started with settings {:?}", settings);

    let flags = StateFlags::new();
    let writer = DualWriter::open(settings.storage(), flags, Arc::new(SystemClock))
        .inspect_err(|e| error!(error = %e, "Cannot start without primary storage"))?;

    let driver = Sr620::new(
        settings.serial_connection.clone(),
        InstrumentSetup::from_settings(&settings),
    );
    let mut acquisition = Acquisition::new(
        driver,
        writer,
        settings.read_value_commands.clone(),
        settings.reconnect_delay(),
    )
    .with_echo(true);

    let (stop, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Exiting after keyboard interrupt...");
                let _ = stop.send(true);
            }
            Err(e) => {
                error!(error = %e, "Unable to listen for Ctrl+C");
                // Keep the sender alive so the loop is not stopped
                std::future::pending::<()>().await;
            }
        }
    });

    debug!("Starting acquisition loop...");
    let outcome = acquisition.run(shutdown).await;
    let closed = acquisition.shutdown().await;

    outcome.context("acquisition failed")?;
    closed.context("orderly shutdown failed")?;
    Ok(())
}
