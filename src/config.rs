//! Configuration loading using Figment
//!
//! Settings are layered, later sources overriding earlier ones:
//! 1. Built-in defaults ([`Settings::default`])
//! 2. A configuration file, YAML (`.yml`/`.yaml`) or TOML (`.toml`). A missing
//!    file is skipped so the defaults alone are a working configuration.
//! 3. Environment variables prefixed with `SR620_`, nested keys separated by
//!    `__` (e.g. `SR620_SERIAL_CONNECTION__DEVICE=/dev/ttyUSB0`)
//! 4. Command-line overrides ([`ConfigOverrides`])
//!
//! # Example
//! ```no_run
//! use sr620_logger::config::{ConfigOverrides, Settings};
//!
//! let settings = Settings::load(Some("sr620-default.yml".as_ref()), &ConfigOverrides::default())?;
//! settings.validate()?;
//! println!("Primary data in {}", settings.primary_data_path.display());
//! # Ok::<(), sr620_logger::error::DaqError>(())
//! ```

use crate::error::{AppResult, DaqError};
use figment::{
    providers::{Env, Format, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Serial link to the counter
    pub serial_connection: SerialConnection,
    /// Folder holding the authoritative data files (must exist)
    pub primary_data_path: PathBuf,
    /// Mirror folder on removable media, polled for presence
    pub secondary_data_path: Option<PathBuf>,
    /// Data file name prefix
    pub prefix: String,
    /// Days after which primary files are deleted
    pub max_history: u32,
    /// Days of history copied to the medium when it reappears
    pub max_sync: u32,
    /// Commands sent to the counter when `configure_upon_start` is set
    pub instrument_configuration: Vec<InstrumentCommand>,
    /// Run the configuration sequence after opening the serial port
    pub configure_upon_start: bool,
    /// Send `STRT` at the end of the configuration sequence
    pub start_measurement_immediately: bool,
    /// Command issued every poll cycle; its response is the logged value
    pub read_value_commands: String,
    /// Trigger level for channels A and B in volts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_level: Option<f64>,
    /// Delay before reopening the serial port after a disconnect, in seconds
    pub reconnect_delay_secs: u64,
    /// Diagnostics log file (truncated on start)
    pub log_file: Option<PathBuf>,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

/// Serial port settings. The SR620 is fixed at 8N1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialConnection {
    pub device: String,
    pub baudrate: u32,
    /// Read timeout in seconds
    pub timeout: u64,
}

impl SerialConnection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// One entry of the instrument set-up sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentCommand {
    pub command: String,
    #[serde(default)]
    pub desc: String,
}

impl InstrumentCommand {
    fn new(command: &str, desc: &str) -> Self {
        Self {
            command: command.to_string(),
            desc: desc.to_string(),
        }
    }
}

/// The part of the configuration consumed by the data writer.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    pub primary_data_path: PathBuf,
    pub secondary_data_path: Option<PathBuf>,
    pub prefix: String,
    pub max_history: u32,
    pub max_sync: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            serial_connection: SerialConnection {
                device: "/dev/ttyAMA0".to_string(),
                baudrate: 9600,
                timeout: 3,
            },
            primary_data_path: PathBuf::from("./data"),
            secondary_data_path: Some(PathBuf::from("/media/usb/sr620")),
            prefix: "sr620-".to_string(),
            max_history: 999,
            max_sync: 32,
            instrument_configuration: vec![
                InstrumentCommand::new(
                    "*RST",
                    "Counter reset and prepared for configuration.",
                ),
                InstrumentCommand::new(
                    "MODE 0;SIZE 1;SRCE 0",
                    "Time mode selected, sample size 1, source A.",
                ),
                InstrumentCommand::new(
                    "TCPL 1,0;TCPL 2,0",
                    "Channels A and B set to be DC coupled.",
                ),
                InstrumentCommand::new(
                    "TERM 1,0;TERM 2,0",
                    "Channels A and B set to be 50 Ohm terminated.",
                ),
                InstrumentCommand::new(
                    "TMOD 1,0;TMOD 2,0",
                    "Channels A and B trigger mode normal.",
                ),
                InstrumentCommand::new(
                    "TSLP 1,0;TSLP 2,0",
                    "Channels A and B trigger slope positive.",
                ),
                InstrumentCommand::new(
                    "LEVL 1,1.5;LEVL 2,1.5",
                    "Trigger levels of channels A and B set to 1.5V.",
                ),
                InstrumentCommand::new(
                    "ARMM 0;AUTM 1;DREL 0",
                    "Arming mode +-time, automode on, A and B trigger slope positive.",
                ),
            ],
            configure_upon_start: false,
            start_measurement_immediately: true,
            read_value_commands: "*WAI;XAVG?".to_string(),
            trigger_level: None,
            reconnect_delay_secs: 3,
            log_file: Some(PathBuf::from("sr620.log")),
            log_level: "debug".to_string(),
        }
    }
}

/// Values given on the command line. `None` leaves the lower layers alone.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub serial_device: Option<String>,
    pub timeout: Option<u64>,
    pub configure_upon_start: Option<bool>,
    pub trigger_level: Option<f64>,
    pub primary_data_path: Option<PathBuf>,
    pub prefix: Option<String>,
    pub secondary_data_path: Option<PathBuf>,
    pub max_history: Option<u32>,
    pub max_sync: Option<u32>,
}

impl ConfigOverrides {
    fn apply(&self, mut figment: Figment) -> Figment {
        fn put<T: Serialize>(figment: Figment, key: &str, value: &Option<T>) -> Figment {
            match value {
                Some(v) => figment.merge(Serialized::default(key, v)),
                None => figment,
            }
        }

        figment = put(figment, "serial_connection.device", &self.serial_device);
        figment = put(figment, "serial_connection.timeout", &self.timeout);
        figment = put(figment, "configure_upon_start", &self.configure_upon_start);
        figment = put(figment, "trigger_level", &self.trigger_level);
        figment = put(figment, "primary_data_path", &self.primary_data_path);
        figment = put(figment, "prefix", &self.prefix);
        figment = put(figment, "secondary_data_path", &self.secondary_data_path);
        figment = put(figment, "max_history", &self.max_history);
        put(figment, "max_sync", &self.max_sync)
    }
}

impl Settings {
    /// Load settings from defaults, an optional file, the environment and overrides.
    pub fn load(path: Option<&Path>, overrides: &ConfigOverrides) -> AppResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));

        if let Some(path) = path {
            if path.is_file() {
                figment = match path.extension().and_then(|e| e.to_str()) {
                    Some("toml") => figment.merge(Toml::file(path)),
                    _ => figment.merge(Yaml::file(path)),
                };
            } else {
                tracing::debug!(path = %path.display(), "Configuration file not found, using defaults");
            }
        }

        figment = figment.merge(Env::prefixed("SR620_").split("__"));
        figment = overrides.apply(figment);

        let mut settings: Settings = figment.extract()?;
        settings.primary_data_path = normalize_path(&settings.primary_data_path);
        settings.secondary_data_path = settings
            .secondary_data_path
            .as_deref()
            .map(normalize_path);
        Ok(settings)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.prefix.is_empty() {
            return Err(DaqError::Configuration(
                "Data file prefix must not be empty".to_string(),
            ));
        }
        if self.prefix.contains(['/', '\\']) {
            return Err(DaqError::Configuration(format!(
                "Data file prefix '{}' must not contain a path separator",
                self.prefix
            )));
        }

        if self.max_sync == 0 {
            return Err(DaqError::Configuration(
                "max_sync must be at least 1 day".to_string(),
            ));
        }

        if self.serial_connection.baudrate == 0 {
            return Err(DaqError::Configuration(
                "Serial baudrate must be positive".to_string(),
            ));
        }

        if self.secondary_data_path.as_ref() == Some(&self.primary_data_path) {
            return Err(DaqError::Configuration(format!(
                "Primary and secondary data paths are both '{}'",
                self.primary_data_path.display()
            )));
        }

        Ok(())
    }

    /// Settings consumed by the data writer
    pub fn storage(&self) -> StorageConfig {
        StorageConfig {
            primary_data_path: self.primary_data_path.clone(),
            secondary_data_path: self.secondary_data_path.clone(),
            prefix: self.prefix.clone(),
            max_history: self.max_history,
            max_sync: self.max_sync,
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

/// Lexically clean a path: drop `.` components and fold `..` where possible.
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let can_pop = matches!(
                    out.components().next_back(),
                    Some(Component::Normal(_))
                );
                if can_pop {
                    out.pop();
                } else if !matches!(
                    out.components().next_back(),
                    Some(Component::RootDir | Component::Prefix(_))
                ) {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        out
    }
}
