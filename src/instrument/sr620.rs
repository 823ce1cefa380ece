//! Stanford Research Systems SR620 universal time interval counter.
//!
//! RS-232 at the configured baud rate, 8N1. Commands are ASCII terminated by a
//! line feed; after each write the input buffer is discarded so that a stale
//! answer can never be read as the response to the next query. Responses are
//! read one byte at a time until `\n` or the read timeout.
//!
//! The `serialport` crate is synchronous, so every transfer runs on Tokio's
//! blocking pool.
//!
//! ## Configuration
//!
//! ```yaml
//! serial_connection:
//!   device: /dev/ttyAMA0
//!   baudrate: 9600
//!   timeout: 3
//! configure_upon_start: true
//! trigger_level: 1.5
//! ```

#[cfg(feature = "instrument_serial")]
use super::apply_setup;
use super::{CounterDriver, InstrumentSetup};
use crate::config::SerialConnection;
use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use tracing::{debug, info, warn};

#[cfg(feature = "instrument_serial")]
use serialport::SerialPort;
#[cfg(feature = "instrument_serial")]
use std::sync::Arc;
#[cfg(feature = "instrument_serial")]
use std::time::Duration;
#[cfg(feature = "instrument_serial")]
use tokio::sync::Mutex;

/// Returns the counter to front-panel control.
const LOCAL_MODE: &str = "LOCL0";

/// SR620 driver over a serial port.
pub struct Sr620 {
    connection: SerialConnection,
    setup: InstrumentSetup,
    #[cfg(feature = "instrument_serial")]
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl std::fmt::Debug for Sr620 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sr620")
            .field("device", &self.connection.device)
            .field("baudrate", &self.connection.baudrate)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Sr620 {
    pub fn new(connection: SerialConnection, setup: InstrumentSetup) -> Self {
        Self {
            connection,
            setup,
            #[cfg(feature = "instrument_serial")]
            port: None,
        }
    }

    #[cfg(feature = "instrument_serial")]
    fn port(&self) -> AppResult<Arc<Mutex<Box<dyn SerialPort>>>> {
        self.port.clone().ok_or(DaqError::SerialPortNotConnected)
    }

    #[cfg(feature = "instrument_serial")]
    async fn open_port(&mut self) -> AppResult<()> {
        let device = self.connection.device.clone();
        let baudrate = self.connection.baudrate;
        let timeout = self.connection.timeout();

        let port = tokio::task::spawn_blocking(move || {
            serialport::new(&device, baudrate)
                .data_bits(serialport::DataBits::Eight)
                .parity(serialport::Parity::None)
                .stop_bits(serialport::StopBits::One)
                // Short port timeout; the overall read deadline is enforced below
                .timeout(Duration::from_millis(100).min(timeout))
                .open()
                .map_err(|e| {
                    DaqError::Instrument(format!(
                        "Failed to open serial port '{device}' at {baudrate} baud: {e}"
                    ))
                })
        })
        .await
        .map_err(|e| DaqError::Instrument(format!("Serial I/O task panicked: {e}")))??;

        self.port = Some(Arc::new(Mutex::new(port)));
        Ok(())
    }
}

#[cfg(feature = "instrument_serial")]
fn write_line(port: &mut Box<dyn SerialPort>, command: &str) -> AppResult<()> {
    use std::io::Write;

    port.write_all(format!("{command}\n").as_bytes())?;
    port.flush()?;
    port.clear(serialport::ClearBuffer::Input)
        .map_err(|e| DaqError::Instrument(format!("Failed to reset input buffer: {e}")))?;
    debug!("Sent serial command: {}", command);
    Ok(())
}

#[cfg(feature = "instrument_serial")]
fn read_line(port: &mut Box<dyn SerialPort>, timeout: Duration) -> AppResult<String> {
    use std::io::Read;

    let mut response = Vec::new();
    let mut buffer = [0u8; 1];
    let start = std::time::Instant::now();

    loop {
        if start.elapsed() > timeout {
            return Err(DaqError::Instrument(format!(
                "Serial read timeout after {:?}",
                timeout
            )));
        }

        match port.read(&mut buffer) {
            Ok(1) => {
                if buffer[0] == b'\n' {
                    break;
                }
                response.push(buffer[0]);
            }
            Ok(0) => return Err(DaqError::SerialUnexpectedEof),
            Ok(_) => return Err(DaqError::Instrument("Short read returned more than requested".into())),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) => return Err(DaqError::Instrument(format!("Serial read error: {e}"))),
        }
    }

    let response = String::from_utf8_lossy(&response).trim().to_string();
    debug!("Received serial response: {}", response);
    Ok(response)
}

#[async_trait]
impl CounterDriver for Sr620 {
    #[cfg(feature = "instrument_serial")]
    async fn open(&mut self) -> AppResult<()> {
        self.open_port().await?;
        info!(device = %self.connection.device, "Serial port opened");

        let setup = self.setup.clone();
        apply_setup(self, &setup).await;
        Ok(())
    }

    #[cfg(not(feature = "instrument_serial"))]
    async fn open(&mut self) -> AppResult<()> {
        debug!(configure = self.setup.configure_upon_start, "Serial support compiled out");
        Err(DaqError::SerialFeatureDisabled)
    }

    async fn close(&mut self) -> AppResult<()> {
        if !self.is_open() {
            return Ok(());
        }
        debug!("Returning instrument to local mode");
        if let Err(e) = self.write(LOCAL_MODE).await {
            warn!(error = %e, "Unable to properly close and release serial device");
        }
        #[cfg(feature = "instrument_serial")]
        {
            self.port = None;
        }
        info!(device = %self.connection.device, "Serial device closed");
        Ok(())
    }

    #[cfg(feature = "instrument_serial")]
    async fn write(&mut self, command: &str) -> AppResult<()> {
        let port = self.port()?;
        let command = command.to_string();
        tokio::task::spawn_blocking(move || {
            let mut guard = port.blocking_lock();
            write_line(&mut guard, &command)
        })
        .await
        .map_err(|e| DaqError::Instrument(format!("Serial I/O task panicked: {e}")))?
    }

    #[cfg(not(feature = "instrument_serial"))]
    async fn write(&mut self, _command: &str) -> AppResult<()> {
        Err(DaqError::SerialFeatureDisabled)
    }

    #[cfg(feature = "instrument_serial")]
    async fn query(&mut self, command: &str) -> AppResult<String> {
        let port = self.port()?;
        let command = command.to_string();
        let timeout = self.connection.timeout();
        tokio::task::spawn_blocking(move || {
            let mut guard = port.blocking_lock();
            write_line(&mut guard, &command)?;
            read_line(&mut guard, timeout)
        })
        .await
        .map_err(|e| DaqError::Instrument(format!("Serial I/O task panicked: {e}")))?
    }

    #[cfg(not(feature = "instrument_serial"))]
    async fn query(&mut self, _command: &str) -> AppResult<String> {
        Err(DaqError::SerialFeatureDisabled)
    }

    fn is_open(&self) -> bool {
        #[cfg(feature = "instrument_serial")]
        {
            self.port.is_some()
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            false
        }
    }
}
