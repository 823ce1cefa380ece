//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole logger.
//! Using the `thiserror` crate, it gives one consistent way to describe the
//! things that can go wrong, from configuration problems to serial transport
//! faults and storage failures.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically parse or type errors in
//!   the configuration file or environment.
//! - **`Configuration`**: Semantic errors found by `Settings::validate`.
//! - **`PrimaryStorage`**: The primary data file could not be opened. This is the
//!   only condition the acquisition loop treats as fatal, because there is no valid
//!   degraded mode without local storage.
//! - **`Io`**: Any other file system error. Secondary-medium and per-file worker
//!   failures are logged at the call site and never surface as this variant to the
//!   acquisition loop.
//! - **`Instrument`** and the `Serial*` variants: transport errors from the
//!   counter driver. These are recoverable and feed the reconnect counter.
//!
//! By using `#[from]`, `DaqError` can be created from the underlying error types,
//! which keeps `?` usable throughout the crate.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("Cannot open primary data file '{}': {source}", path.display())]
    PrimaryStorage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No Tokio runtime available to run background workers")]
    RuntimeUnavailable,

    #[error("Background worker '{0}' failed to complete")]
    WorkerJoin(&'static str),

    #[error("Instrument error: {0}")]
    Instrument(String),

    #[error("Serial port not connected")]
    SerialPortNotConnected,

    #[error("Unexpected EOF from serial port")]
    SerialUnexpectedEof,

    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,

    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<DaqError>),
}

impl DaqError {
    /// Whether the error must stop the acquisition loop.
    ///
    /// Everything except loss of the primary store is handled by logging and
    /// carrying on.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DaqError::PrimaryStorage { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_primary_storage_is_fatal() {
        let primary = DaqError::PrimaryStorage {
            path: PathBuf::from("/data/sr620-20240011200.txt"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(primary.is_fatal());

        assert!(!DaqError::Instrument("timeout".into()).is_fatal());
        assert!(!DaqError::SerialPortNotConnected.is_fatal());
        assert!(!DaqError::Io(std::io::Error::from(std::io::ErrorKind::NotFound)).is_fatal());
    }

    #[test]
    fn primary_storage_message_names_the_file() {
        let err = DaqError::PrimaryStorage {
            path: PathBuf::from("/data/sr620-20240011200.txt"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(err.to_string().contains("sr620-20240011200.txt"));
    }

    #[test]
    fn shutdown_failure_keeps_inner_errors() {
        let err = DaqError::ShutdownFailed(vec![
            DaqError::Instrument("LOCL0 not acknowledged".into()),
            DaqError::WorkerJoin("sync"),
        ]);
        match err {
            DaqError::ShutdownFailed(inner) => assert_eq!(inner.len(), 2),
            other => panic!("unexpected variant: {:?}", other),
        }
    }
}
