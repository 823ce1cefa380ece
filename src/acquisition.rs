//! Foreground poll loop.
//!
//! [`Acquisition`] connects to the counter, reads one value per iteration and
//! hands it to the [`DualWriter`]. A closed link is retried after the
//! reconnect back-off. Transport errors are counted; after
//! [`MAX_CONSECUTIVE_READ_FAILURES`] in a row the link is closed and reopened
//! on a later iteration.
//!
//! Only a fatal writer error (the primary store is gone) ends [`Acquisition::run`]
//! with an error. A shutdown signal ends it cleanly.

use crate::data::DualWriter;
use crate::error::{AppResult, DaqError};
use crate::instrument::CounterDriver;
use crate::state::{FlagSet, StateFlags};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Consecutive read failures after which the link is closed.
pub const MAX_CONSECUTIVE_READ_FAILURES: u32 = 5;

/// Poll loop over one counter and one writer.
pub struct Acquisition<D: CounterDriver> {
    driver: D,
    writer: Arc<DualWriter>,
    flags: Arc<StateFlags>,
    read_command: String,
    reconnect_delay: Duration,
    read_failures: u32,
    echo: bool,
}

impl<D: CounterDriver> std::fmt::Debug for Acquisition<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acquisition")
            .field("read_command", &self.read_command)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("read_failures", &self.read_failures)
            .field("flags", &self.flags.snapshot())
            .finish()
    }
}

impl<D: CounterDriver> Acquisition<D> {
    pub fn new(
        driver: D,
        writer: DualWriter,
        read_command: impl Into<String>,
        reconnect_delay: Duration,
    ) -> Self {
        let flags = writer.flags().clone();
        let observed = Arc::downgrade(&flags);
        flags.register(move || {
            if let Some(flags) = observed.upgrade() {
                debug!("New state {}", flags.snapshot());
            }
        });

        Self {
            driver,
            writer: Arc::new(writer),
            flags,
            read_command: read_command.into(),
            reconnect_delay,
            read_failures: 0,
            echo: false,
        }
    }

    /// Print every reading to stdout.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn writer(&self) -> &DualWriter {
        &self.writer
    }

    pub fn flags(&self) -> &Arc<StateFlags> {
        &self.flags
    }

    pub fn read_failures(&self) -> u32 {
        self.read_failures
    }

    /// Open the link. Failures are logged and leave the device disconnected.
    pub async fn open_device(&mut self) -> bool {
        match self.driver.open().await {
            Ok(()) => {
                self.read_failures = 0;
                self.flags.set(FlagSet::DEVICE_CONNECTED);
                true
            }
            Err(e) => {
                warn!(error = %e, "Unable to open measurement instrument");
                false
            }
        }
    }

    pub async fn close_device(&mut self) {
        if let Err(e) = self.driver.close().await {
            warn!(error = %e, "Unable to properly close and release serial device");
        }
        self.flags.clear(FlagSet::DEVICE_CONNECTED);
    }

    /// Query one value. `None` on a transport error.
    async fn read_value(&mut self) -> Option<String> {
        match self.driver.query(&self.read_command).await {
            Ok(value) => {
                self.read_failures = 0;
                Some(value)
            }
            Err(e) => {
                self.read_failures += 1;
                error!(
                    error = %e,
                    failures = self.read_failures,
                    "Unable to read value from instrument"
                );
                if self.read_failures >= MAX_CONSECUTIVE_READ_FAILURES {
                    warn!(
                        "{} consecutive read failures, closing instrument",
                        self.read_failures
                    );
                    self.close_device().await;
                }
                None
            }
        }
    }

    /// One iteration: reconnect if needed, otherwise read and log a value.
    ///
    /// Returns an error only when the writer lost its primary store.
    pub async fn poll_once(&mut self) -> AppResult<()> {
        if !self.flags.contains(FlagSet::DEVICE_CONNECTED) {
            debug!(state = %self.flags.snapshot(), "Instrument not connected");
            tokio::time::sleep(self.reconnect_delay).await;
            self.open_device().await;
            return Ok(());
        }

        if let Some(value) = self.read_value().await {
            if self.echo {
                println!("{} {}", Utc::now().format("%Y-%m-%d (%j) %H:%M:%S"), value);
            }
            // File and medium I/O stays off the async workers
            let writer = self.writer.clone();
            tokio::task::spawn_blocking(move || writer.write(&value))
                .await
                .map_err(|_| DaqError::WorkerJoin("write"))??;
        }
        Ok(())
    }

    /// Poll until `shutdown` turns `true` (or its sender goes away).
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> AppResult<()> {
        info!(command = %self.read_command, "Acquisition started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                result = self.poll_once() => {
                    if let Err(e) = result {
                        error!(error = %e, "Acquisition stopped");
                        return Err(e);
                    }
                }
            }
        }
        info!("Shutdown requested, leaving acquisition loop");
        Ok(())
    }

    /// Close the link and the writer, waiting for background workers.
    pub async fn shutdown(&mut self) -> AppResult<()> {
        info!("Closing instrument and data files");
        self.close_device().await;
        self.writer.shutdown().await
    }
}
