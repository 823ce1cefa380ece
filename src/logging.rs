//! Tracing setup
//!
//! Diagnostics go through `tracing`. [`init`] installs a `tracing-subscriber`
//! registry with:
//! - an `EnvFilter` (`RUST_LOG` wins, otherwise the configured level)
//! - a console layer on stderr
//! - optionally a plain-text layer appending to a log file, which is truncated
//!   at start-up
//!
//! Readings themselves are not logged here; they go to the data files and are
//! echoed on stdout by the acquisition loop.
//!
//! # Example
//! ```no_run
//! use sr620_logger::config::Settings;
//! use sr620_logger::logging::{self, LoggingConfig};
//!
//! # fn main() -> sr620_logger::error::AppResult<()> {
//! let settings = Settings::default();
//! logging::init(&LoggingConfig::from_settings(&settings)?)?;
//! tracing::info!("Logger started");
//! # Ok(())
//! # }
//! ```

use crate::config::Settings;
use crate::error::{AppResult, DaqError};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Tracing configuration options
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is not set
    pub level: Level,
    /// Diagnostic log file, truncated on start
    pub log_file: Option<PathBuf>,
    /// Colour the console output
    pub with_ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            log_file: None,
            with_ansi: true,
        }
    }
}

impl LoggingConfig {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    pub fn from_settings(settings: &Settings) -> AppResult<Self> {
        Ok(Self {
            level: parse_log_level(&settings.log_level)?,
            log_file: settings.log_file.clone(),
            ..Default::default()
        })
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Install the global subscriber.
///
/// Idempotent: if a subscriber is already installed (tests, embedding
/// applications) this returns `Ok(())` and leaves it in place.
pub fn init(config: &LoggingConfig) -> AppResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_to_filter_string(config.level)));

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(config.with_ansi)
        .with_target(false);

    let file_layer = match &config.log_file {
        Some(path) => {
            let file = File::create(path).map_err(|e| {
                DaqError::Logging(format!("cannot create log file '{}': {}", path.display(), e))
            })?;
            Some(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_thread_names(true),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .or_else(|e| {
            // Expected in tests and when the host already installed a subscriber
            if e
                .to_string()
                .contains("a global default trace dispatcher has already been set")
            {
                Ok(())
            } else {
                Err(DaqError::Logging(e.to_string()))
            }
        })
}

/// Parse log level string into tracing Level
fn parse_log_level(level: &str) -> AppResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(DaqError::Configuration(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        ))),
    }
}

fn level_to_filter_string(level: Level) -> String {
    match level {
        Level::TRACE => "trace".to_string(),
        Level::DEBUG => "debug".to_string(),
        Level::INFO => "info".to_string(),
        Level::WARN => "warn".to_string(),
        Level::ERROR => "error".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("trace"), Ok(Level::TRACE)));
        assert!(matches!(parse_log_level("debug"), Ok(Level::DEBUG)));
        assert!(matches!(parse_log_level("WARN"), Ok(Level::WARN)));
        assert!(matches!(parse_log_level("Error"), Ok(Level::ERROR)));
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn from_settings_takes_level_and_file() {
        let settings = Settings {
            log_level: "info".to_string(),
            log_file: None,
            ..Settings::default()
        };
        let config = LoggingConfig::from_settings(&settings).unwrap();
        assert_eq!(config.level, Level::INFO);
        assert!(config.log_file.is_none());

        let config = LoggingConfig::new(Level::WARN)
            .with_log_file("sr620.log")
            .with_ansi(false);
        assert_eq!(config.log_file, Some(PathBuf::from("sr620.log")));
        assert!(!config.with_ansi);
    }

    #[test]
    fn unwritable_log_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig::new(Level::INFO)
            .with_log_file(dir.path().join("missing").join("sr620.log"));
        assert!(matches!(init(&config), Err(DaqError::Logging(_))));
    }
}
