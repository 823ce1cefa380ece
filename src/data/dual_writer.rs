//! Dual-destination, fault-tolerant data file writer.
//!
//! [`DualWriter`] appends every reading to a file in the primary store and,
//! when the removable medium is present, mirrors it to a file with the same
//! name in the secondary store. It owns both file handles and the pending
//! buffer, rotates files when the UTC date changes, and launches the two
//! background workers:
//!
//! - **sync** ([`crate::data::sync`]): catches the medium up with history it
//!   missed, then hands back an open secondary handle;
//! - **delete** ([`crate::data::retention`]): prunes primary files beyond the
//!   retention horizon, launched on every rotation.
//!
//! # Concurrency
//!
//! All handle and buffer mutation happens under one mutex
//! ([`Shared::lock_io`]). The foreground `write` holds it for the whole record;
//! the sync worker takes it only briefly to flip `BUFFERING` and to install the
//! secondary handle. State flags are the signal between the two, never the lock.
//!
//! # Failure policy
//!
//! Failing to open the primary file is fatal ([`DaqError::PrimaryStorage`]).
//! Everything else (a failed append, a yanked medium, a failed copy or delete)
//! is logged and the affected resource dropped.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sr620_logger::clock::SystemClock;
//! use sr620_logger::config::Settings;
//! use sr620_logger::data::DualWriter;
//! use sr620_logger::state::StateFlags;
//!
//! # async fn example() -> sr620_logger::error::AppResult<()> {
//! let settings = Settings::default();
//! let writer = DualWriter::open(settings.storage(), StateFlags::new(), Arc::new(SystemClock))?;
//! writer.write("1.23e-9")?;
//! writer.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use crate::clock::Clock;
use crate::config::StorageConfig;
use crate::data::destination::{medium_present, Destination};
use crate::data::naming::FileNamer;
use crate::data::record::LogRecord;
use crate::data::supervisor::WorkerSlot;
use crate::data::{retention, sync};
use crate::error::{AppResult, DaqError};
use crate::state::{FlagSet, StateFlags};
use chrono::{DateTime, NaiveDate, Utc};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tracing::{debug, error, info, trace, warn};

/// Handles and buffer guarded by [`Shared::lock_io`].
#[derive(Debug, Default)]
pub(crate) struct Destinations {
    pub(crate) primary: Option<Destination>,
    pub(crate) secondary: Option<Destination>,
    /// Records parked while the live file is being snapshotted.
    pub(crate) pending: Vec<LogRecord>,
    /// Date the current primary file was opened for.
    day: Option<NaiveDate>,
}

/// State shared between the writer and its workers.
pub(crate) struct Shared {
    pub(crate) storage: StorageConfig,
    pub(crate) namer: FileNamer,
    pub(crate) flags: Arc<StateFlags>,
    pub(crate) clock: Arc<dyn Clock>,
    io: Mutex<Destinations>,
}

impl Shared {
    pub(crate) fn lock_io(&self) -> MutexGuard<'_, Destinations> {
        self.io.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn open_primary(&self, now: DateTime<Utc>) -> AppResult<Destination> {
        let name = self.namer.file_name(now);
        let folder = &self.storage.primary_data_path;
        let destination =
            Destination::open_append(folder, &name).map_err(|source| DaqError::PrimaryStorage {
                path: folder.join(&name),
                source,
            })?;
        info!(file = %destination.path().display(), "Primary file opened");
        Ok(destination)
    }

    /// Open the mirror of the current primary file. Best effort: an absent
    /// medium is normal and any other failure means "medium unavailable".
    pub(crate) fn open_secondary(&self, io: &mut Destinations) -> bool {
        let Some(folder) = self.storage.secondary_data_path.as_deref() else {
            return false;
        };
        if !medium_present(folder) {
            self.flags.clear(
                FlagSet::MEDIUM_PRESENT | FlagSet::DUAL_WRITE_ACTIVE | FlagSet::SYNC_RUNNING,
            );
            return false;
        }
        self.flags.set(FlagSet::MEDIUM_PRESENT);

        let Some(name) = io.primary.as_ref().map(|p| p.file_name().to_string()) else {
            return false;
        };
        match Destination::open_append(folder, &name) {
            Ok(destination) => {
                info!(file = %destination.path().display(), "Secondary file opened");
                io.secondary = Some(destination);
                true
            }
            Err(e) => {
                warn!(folder = %folder.display(), file = %name, error = %e, "Unable to open secondary file");
                false
            }
        }
    }

    /// Write parked records to the files they were taken for.
    fn write_pending(&self, io: &mut Destinations) {
        let pending = std::mem::take(&mut io.pending);
        if pending.is_empty() {
            return;
        }
        debug!(records = pending.len(), "Writing buffered records before close");
        if let Some(primary) = io.primary.as_mut() {
            if let Err(e) = primary.write_records(&pending) {
                error!(error = %e, "Unable to write buffered records to primary file");
            }
        }
        if let Some(secondary) = io.secondary.as_mut() {
            if let Err(e) = secondary.write_records(&pending) {
                warn!(error = %e, "Unable to write buffered records to secondary file");
            }
        }
    }

    fn close_destinations(&self, io: &mut Destinations) {
        if let Some(primary) = io.primary.take() {
            debug!(file = %primary.path().display(), "Closing primary file");
            if let Err(e) = primary.close() {
                error!(error = %e, "Unable to close primary file");
            }
        }
        if let Some(secondary) = io.secondary.take() {
            debug!(file = %secondary.path().display(), "Closing secondary file");
            if let Err(e) = secondary.close() {
                warn!(error = %e, "Unable to close secondary file");
            }
        }
        self.flags.clear(FlagSet::DUAL_WRITE_ACTIVE);
    }
}

/// Writer for the primary store and its removable mirror.
pub struct DualWriter {
    shared: Arc<Shared>,
    sync_slot: WorkerSlot,
    delete_slot: WorkerSlot,
    runtime: Handle,
}

impl std::fmt::Debug for DualWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DualWriter")
            .field("storage", &self.shared.storage)
            .field("flags", &self.shared.flags.snapshot())
            .finish()
    }
}

impl DualWriter {
    /// Open today's primary file and schedule a retention pass.
    ///
    /// Must be called from within a Tokio runtime; the workers run on its
    /// blocking pool. Fails with [`DaqError::PrimaryStorage`] if the primary
    /// file cannot be opened.
    pub fn open(
        storage: StorageConfig,
        flags: Arc<StateFlags>,
        clock: Arc<dyn Clock>,
    ) -> AppResult<Self> {
        let runtime = Handle::try_current().map_err(|_| DaqError::RuntimeUnavailable)?;
        let namer = FileNamer::new(&storage.prefix)?;
        let writer = Self {
            shared: Arc::new(Shared {
                storage,
                namer,
                flags,
                clock,
                io: Mutex::new(Destinations::default()),
            }),
            sync_slot: WorkerSlot::new("sync", FlagSet::SYNC_RUNNING),
            delete_slot: WorkerSlot::new("delete", FlagSet::DELETE_RUNNING),
            runtime,
        };

        let now = writer.shared.clock.now();
        {
            let mut io = writer.shared.lock_io();
            writer.rotate(&mut io, now)?;
        }
        Ok(writer)
    }

    /// Log one reading.
    ///
    /// Only a failure to (re)open the primary file is returned as an error;
    /// it is fatal. Every other problem is logged.
    pub fn write(&self, value: &str) -> AppResult<()> {
        let now = self.shared.clock.now();
        let record = LogRecord::new(now, value);
        let flags = &self.shared.flags;
        let mut io = self.shared.lock_io();

        if io.day != Some(now.date_naive()) {
            self.rotate(&mut io, now)?;
        }

        if flags.contains(FlagSet::BUFFERING) {
            trace!(pending = io.pending.len() + 1, "Live file is being copied, buffering record");
            io.pending.push(record);
            return Ok(());
        }

        let flushed = std::mem::take(&mut io.pending);
        match io.primary.as_mut() {
            Some(primary) => {
                if let Err(e) = primary.write_records(flushed.iter().chain([&record])) {
                    error!(file = %primary.path().display(), error = %e, "Unable to write to primary file");
                }
            }
            None => error!("No primary file open, record dropped"),
        }

        self.write_secondary(&mut io, &flushed, &record);
        Ok(())
    }

    fn write_secondary(&self, io: &mut Destinations, flushed: &[LogRecord], record: &LogRecord) {
        let Some(folder) = self.shared.storage.secondary_data_path.as_deref() else {
            return;
        };
        let flags = &self.shared.flags;

        if !medium_present(folder) {
            flags.clear(
                FlagSet::MEDIUM_PRESENT | FlagSet::DUAL_WRITE_ACTIVE | FlagSet::SYNC_RUNNING,
            );
            if io.secondary.take().is_some() {
                debug!("Lost handle to secondary file");
            }
            return;
        }
        flags.set(FlagSet::MEDIUM_PRESENT);

        if flags.contains(FlagSet::SYNC_RUNNING) {
            return;
        }
        let Some(secondary) = io.secondary.as_mut() else {
            self.launch_sync();
            return;
        };

        match secondary.write_records(flushed.iter().chain([record])) {
            Ok(()) => {
                flags.set(FlagSet::DUAL_WRITE_ACTIVE);
            }
            Err(e) => {
                warn!(file = %secondary.path().display(), error = %e, "Secondary file inaccessible");
                flags.clear(FlagSet::DUAL_WRITE_ACTIVE);
                io.secondary = None;
            }
        }
    }

    /// Close the current files and open new ones named for `now`.
    fn rotate(&self, io: &mut Destinations, now: DateTime<Utc>) -> AppResult<()> {
        if let Some(previous) = io.day {
            info!(%previous, today = %now.date_naive(), "New day, rotating data files");
        }
        let had_secondary = io.secondary.is_some();
        self.shared.write_pending(io);
        self.shared.close_destinations(io);

        io.primary = Some(self.shared.open_primary(now)?);
        io.day = Some(now.date_naive());
        if had_secondary {
            self.shared.open_secondary(io);
        }

        self.trigger_delete();
        Ok(())
    }

    fn launch_sync(&self) -> bool {
        let shared = self.shared.clone();
        self.sync_slot
            .try_launch(&self.runtime, &self.shared.flags, move || sync::run(&shared))
    }

    /// Request a catch-up copy to the medium.
    ///
    /// Only starts when the medium is present, no secondary file is open and
    /// no sync is already running.
    pub fn trigger_sync(&self) -> bool {
        let Some(folder) = self.shared.storage.secondary_data_path.as_deref() else {
            return false;
        };
        if !medium_present(folder) || self.shared.lock_io().secondary.is_some() {
            return false;
        }
        self.launch_sync()
    }

    /// Request a retention pass over the primary store.
    pub fn trigger_delete(&self) -> bool {
        let shared = self.shared.clone();
        self.delete_slot
            .try_launch(&self.runtime, &self.shared.flags, move || {
                let today = shared.clock.now().date_naive();
                retention::prune(
                    &shared.storage.primary_data_path,
                    &shared.namer,
                    today,
                    shared.storage.max_history,
                );
            })
    }

    /// Flush and close both files.
    ///
    /// A later `write` reopens them as if the day had changed.
    pub fn close(&self) {
        let mut io = self.shared.lock_io();
        self.shared.close_destinations(&mut io);
        io.day = None;
    }

    /// Wait for running workers, write out parked records and close.
    pub async fn shutdown(&self) -> AppResult<()> {
        let mut errors = Vec::new();
        if let Err(e) = self.wait_for_workers().await {
            errors.push(e);
        }

        {
            let mut io = self.shared.lock_io();
            self.shared.write_pending(&mut io);
            self.shared.close_destinations(&mut io);
            io.day = None;
        }
        info!("Data files closed");

        if errors.is_empty() {
            Ok(())
        } else {
            Err(DaqError::ShutdownFailed(errors))
        }
    }

    /// Wait until neither worker is running.
    pub async fn wait_for_workers(&self) -> AppResult<()> {
        let sync = self.sync_slot.join().await;
        let delete = self.delete_slot.join().await;
        sync.and(delete)
    }

    pub fn flags(&self) -> &Arc<StateFlags> {
        &self.shared.flags
    }

    /// Path of the open primary file.
    pub fn primary_path(&self) -> Option<PathBuf> {
        self.shared
            .lock_io()
            .primary
            .as_ref()
            .map(|d| d.path().to_path_buf())
    }

    /// Path of the open secondary file.
    pub fn secondary_path(&self) -> Option<PathBuf> {
        self.shared
            .lock_io()
            .secondary
            .as_ref()
            .map(|d| d.path().to_path_buf())
    }

    /// Number of records waiting for the live-file snapshot to finish.
    pub fn pending_len(&self) -> usize {
        self.shared.lock_io().pending.len()
    }

    pub fn is_sync_active(&self) -> bool {
        self.sync_slot.is_active()
    }

    pub fn is_delete_active(&self) -> bool {
        self.delete_slot.is_active()
    }
}
