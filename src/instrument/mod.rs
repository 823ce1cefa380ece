//! Counter driver contract and implementations.
//!
//! The acquisition loop only needs four things from an instrument: open the
//! link, close it, send a command, and send a command and read back one line.
//! [`CounterDriver`] captures that, [`sr620::Sr620`] implements it over RS-232
//! and [`mock::MockCounter`] is a scripted stand-in for tests.

use crate::config::{InstrumentCommand, Settings};
use crate::error::AppResult;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, error, info};

pub mod mock;
pub mod sr620;

/// Transport to a counter/timer instrument.
///
/// Every call may fail with a transport error; the caller decides whether
/// that is transient.
#[async_trait]
pub trait CounterDriver: Send {
    /// Open the link and bring the instrument into measuring state.
    async fn open(&mut self) -> AppResult<()>;

    /// Release the link. Closing a closed driver is a no-op.
    async fn close(&mut self) -> AppResult<()>;

    /// Send a command that has no response.
    async fn write(&mut self, command: &str) -> AppResult<()>;

    /// Send a command and read one response line (trimmed).
    async fn query(&mut self, command: &str) -> AppResult<String>;

    fn is_open(&self) -> bool;
}

/// What to send to the counter right after the link opens.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentSetup {
    /// Run the full configuration sequence
    pub configure_upon_start: bool,
    pub commands: Vec<InstrumentCommand>,
    /// Send `STRT` after configuring
    pub start_measurement_immediately: bool,
    /// Trigger level for channels A and B in volts
    pub trigger_level: Option<f64>,
    /// Pause after each configuration command
    pub command_pause: Duration,
}

impl InstrumentSetup {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            configure_upon_start: settings.configure_upon_start,
            commands: settings.instrument_configuration.clone(),
            start_measurement_immediately: settings.start_measurement_immediately,
            trigger_level: settings.trigger_level,
            command_pause: Duration::from_millis(100),
        }
    }

    /// Nothing is sent.
    pub fn none() -> Self {
        Self {
            configure_upon_start: false,
            commands: Vec::new(),
            start_measurement_immediately: false,
            trigger_level: None,
            command_pause: Duration::ZERO,
        }
    }
}

fn trigger_level_command(level: f64) -> String {
    format!("LEVL 1,{level};LEVL 2,{level}")
}

/// Bring a freshly opened counter into the configured state.
///
/// Failures are logged, never returned: a counter that refuses a set-up
/// command is still worth reading.
pub async fn apply_setup<D>(driver: &mut D, setup: &InstrumentSetup)
where
    D: CounterDriver + ?Sized,
{
    let configured = if setup.configure_upon_start {
        match configure(driver, setup).await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Unable to configure SR620 instrument for measurement");
                false
            }
        }
    } else {
        false
    };
    // A completed configuration already carries the trigger level
    if let (false, Some(level)) = (configured, setup.trigger_level) {
        set_trigger_levels(driver, level).await;
    }
}

async fn configure<D>(driver: &mut D, setup: &InstrumentSetup) -> AppResult<()>
where
    D: CounterDriver + ?Sized,
{
    info!("Configuring measurement instrument...");
    let idn = driver.query("*IDN?").await?;
    debug!("*IDN? > {}", idn);
    let errs = driver.query("ERRS?").await?;
    debug!("ERRS? > {}", errs);

    for cmd in &setup.commands {
        driver.write(&cmd.command).await?;
        info!("{}", cmd.desc);
        if !setup.command_pause.is_zero() {
            tokio::time::sleep(setup.command_pause).await;
        }
    }
    if let Some(level) = setup.trigger_level {
        driver.write(&trigger_level_command(level)).await?;
        info!("Trigger levels of channels A and B set to {} V.", level);
    }
    info!("Measurement instrument configured.");

    if setup.start_measurement_immediately {
        driver.write("STRT").await?;
        info!("Measurement started.");
    }
    Ok(())
}

async fn set_trigger_levels<D>(driver: &mut D, level: f64)
where
    D: CounterDriver + ?Sized,
{
    match driver.write(&trigger_level_command(level)).await {
        Ok(()) => info!("Trigger levels of channels A and B set to {} V.", level),
        Err(e) => error!(error = %e, "Cannot set trigger level"),
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockCounter;
    use super::*;

    fn setup() -> InstrumentSetup {
        InstrumentSetup {
            configure_upon_start: true,
            commands: vec![
                InstrumentCommand {
                    command: "*RST".into(),
                    desc: "reset".into(),
                },
                InstrumentCommand {
                    command: "MODE 0;SIZE 1;SRCE 0".into(),
                    desc: "time mode".into(),
                },
            ],
            start_measurement_immediately: true,
            trigger_level: Some(0.75),
            command_pause: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn full_setup_sequence() {
        let mut counter = MockCounter::new();
        counter.push_response("StanfordResearchSystems,SR620,0,1.0");
        counter.push_response("0");
        counter.open().await.unwrap();

        apply_setup(&mut counter, &setup()).await;

        assert_eq!(
            counter.commands(),
            [
                "*IDN?",
                "ERRS?",
                "*RST",
                "MODE 0;SIZE 1;SRCE 0",
                "LEVL 1,0.75;LEVL 2,0.75",
                "STRT"
            ]
        );
    }

    #[tokio::test]
    async fn trigger_level_only() {
        let mut counter = MockCounter::new();
        counter.open().await.unwrap();
        let setup = InstrumentSetup {
            configure_upon_start: false,
            ..setup()
        };

        apply_setup(&mut counter, &setup).await;

        assert_eq!(counter.commands(), ["LEVL 1,0.75;LEVL 2,0.75"]);
    }

    #[tokio::test]
    async fn failed_configuration_still_sets_trigger_level() {
        let mut counter = MockCounter::new();
        counter.push_failure("no answer");
        counter.open().await.unwrap();

        apply_setup(&mut counter, &setup()).await;

        assert_eq!(counter.commands(), ["*IDN?", "LEVL 1,0.75;LEVL 2,0.75"]);
    }

    #[tokio::test]
    async fn nothing_configured_sends_nothing() {
        let mut counter = MockCounter::new();
        counter.open().await.unwrap();
        apply_setup(&mut counter, &InstrumentSetup::none()).await;
        assert!(counter.commands().is_empty());
    }
}
