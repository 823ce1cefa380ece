//! # SR620 Logger Core Library
//!
//! This crate is the core library for the `sr620-logger` application. It reads
//! values from a Stanford Research Systems SR620 time interval counter and
//! records them in daily data files, kept in a primary store and mirrored to a
//! removable medium whenever one is mounted. The binary (`main.rs`) is a thin
//! shell around it, so the same pieces can be driven from tests with a mock
//! counter and a manual clock.
//!
//! ## Crate Structure
//!
//! - **`acquisition`**: The foreground poll loop: reconnects the counter, reads
//!   one value per iteration and hands it to the writer.
//! - **`clock`**: The `Clock` seam used for file naming and day arithmetic.
//! - **`config`**: Loads and validates `Settings` from defaults, a YAML or TOML
//!   file, `SR620_*` environment variables and command-line overrides.
//! - **`data`**: The `DualWriter` and its helpers: file naming, rotation, the
//!   catch-up sync worker and the retention (delete) worker.
//! - **`error`**: The `DaqError` enum for centralized error handling.
//! - **`instrument`**: The `CounterDriver` trait, the SR620 serial driver and a
//!   scripted mock.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`state`**: Shared run-state flags with change notification.

pub mod acquisition;
pub mod clock;
pub mod config;
pub mod data;
pub mod error;
pub mod instrument;
pub mod logging;
pub mod state;
