//! Single-slot supervisor for background workers.
//!
//! Each worker kind (catch-up sync, retention pruning) gets one slot. A slot
//! refuses to launch while its state flag is set or its previous job is still
//! alive, so at most one instance of each kind exists at any time. The slot,
//! not the job, reports completion by clearing the flag, and it does so even
//! if the job panics.

use crate::error::{AppResult, DaqError};
use crate::state::{FlagSet, StateFlags};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct WorkerSlot {
    name: &'static str,
    flag: FlagSet,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for WorkerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerSlot")
            .field("name", &self.name)
            .field("flag", &self.flag)
            .finish()
    }
}

/// Clears the worker's flag when the job ends, however it ends.
struct CompletionReport {
    flags: Arc<StateFlags>,
    flag: FlagSet,
    name: &'static str,
}

impl Drop for CompletionReport {
    fn drop(&mut self) {
        self.flags.clear(self.flag);
        debug!(worker = self.name, "Worker finished");
    }
}

impl WorkerSlot {
    pub fn new(name: &'static str, flag: FlagSet) -> Self {
        Self {
            name,
            flag,
            handle: Mutex::new(None),
        }
    }

    /// Start `job` on the blocking pool unless this kind is already running.
    ///
    /// Returns `false` (and logs) when the trigger is ignored.
    pub fn try_launch<F>(&self, runtime: &Handle, flags: &Arc<StateFlags>, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut slot = self.lock();
        let alive = slot.as_ref().is_some_and(|h| !h.is_finished());
        if alive || flags.contains(self.flag) {
            warn!(
                worker = self.name,
                "Want to start {} worker, but one is already underway; trigger ignored",
                self.name
            );
            return false;
        }

        flags.set(self.flag);
        let report = CompletionReport {
            flags: flags.clone(),
            flag: self.flag,
            name: self.name,
        };
        info!(worker = self.name, "Starting {} worker", self.name);
        *slot = Some(runtime.spawn_blocking(move || {
            let _report = report;
            job();
        }));
        true
    }

    /// Whether a job from this slot is still running.
    pub fn is_active(&self) -> bool {
        self.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Wait for the current job, if any.
    pub async fn join(&self) -> AppResult<()> {
        let handle = self.lock().take();
        match handle {
            Some(handle) => handle.await.map_err(|e| {
                warn!(worker = self.name, error = %e, "Worker did not complete");
                DaqError::WorkerJoin(self.name)
            }),
            None => Ok(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
