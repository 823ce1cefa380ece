//! Shared run-state flags.
//!
//! The logger tracks a handful of independent conditions (instrument connected,
//! removable medium present, dual-write active, catch-up running, pruning
//! running, live-file snapshot in progress). They are held as one immutable
//! [`FlagSet`] value inside a `tokio::sync::watch` channel, so every change
//! replaces the whole value and async subscribers see a consistent snapshot.
//!
//! Flags are a *signal*, not a lock: components that need mutual exclusion take
//! their own mutex and use the flags to tell each other what is going on.
//!
//! # Example
//!
//! ```
//! use sr620_logger::state::{FlagSet, StateFlags};
//!
//! let flags = StateFlags::new();
//! flags.register(|| println!("state changed"));
//!
//! assert!(flags.set(FlagSet::MEDIUM_PRESENT));
//! assert!(!flags.set(FlagSet::MEDIUM_PRESENT)); // already set, no notification
//! assert!(flags.contains(FlagSet::MEDIUM_PRESENT));
//! ```

use bitflags::bitflags;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

bitflags! {
    /// Set of run-state conditions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FlagSet: u8 {
        /// Serial link to the counter is open.
        const DEVICE_CONNECTED = 1;
        /// Secondary folder exists and is mounted.
        const MEDIUM_PRESENT = 1 << 1;
        /// The last record was written to both destinations.
        const DUAL_WRITE_ACTIVE = 1 << 2;
        /// A catch-up copy to the secondary medium is in progress.
        const SYNC_RUNNING = 1 << 3;
        /// Old primary files are being pruned.
        const DELETE_RUNNING = 1 << 4;
        /// The live file is being snapshotted; new records go to memory.
        const BUFFERING = 1 << 5;
    }
}

impl FlagSet {
    /// Names of the flags that are set, in declaration order.
    pub fn names(&self) -> Vec<&'static str> {
        self.iter_names().map(|(name, _)| name).collect()
    }
}

impl fmt::Display for FlagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.names().join(", "))
    }
}

type Observer = Arc<dyn Fn() + Send + Sync>;

/// Owner of the current [`FlagSet`].
///
/// Shared by handle (`Arc<StateFlags>`) between the acquisition loop, the
/// writer and its background workers.
pub struct StateFlags {
    sender: watch::Sender<FlagSet>,
    observers: Mutex<Vec<Observer>>,
}

impl fmt::Debug for StateFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateFlags")
            .field("flags", &self.snapshot())
            .finish()
    }
}

impl Default for StateFlags {
    fn default() -> Self {
        let (sender, _) = watch::channel(FlagSet::empty());
        Self {
            sender,
            observers: Mutex::new(Vec::new()),
        }
    }
}

impl StateFlags {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Union `flags` into the set.
    ///
    /// Returns `true` and notifies observers once if anything changed.
    pub fn set(&self, flags: FlagSet) -> bool {
        let changed = self.sender.send_if_modified(|current| {
            if current.contains(flags) {
                false
            } else {
                current.insert(flags);
                true
            }
        });
        if changed {
            self.notify();
        }
        changed
    }

    /// Remove `flags` from the set.
    ///
    /// Returns `true` and notifies observers once if anything changed.
    pub fn clear(&self, flags: FlagSet) -> bool {
        let changed = self.sender.send_if_modified(|current| {
            if current.intersects(flags) {
                current.remove(flags);
                true
            } else {
                false
            }
        });
        if changed {
            self.notify();
        }
        changed
    }

    /// Whether every flag in `flag` is set.
    pub fn contains(&self, flag: FlagSet) -> bool {
        self.sender.borrow().contains(flag)
    }

    /// Current value.
    pub fn snapshot(&self) -> FlagSet {
        *self.sender.borrow()
    }

    /// Register a callback invoked with no arguments after every change.
    ///
    /// Observers re-read the set themselves. They run on whichever thread made
    /// the change and must not block or call back into the writer.
    pub fn register<F>(&self, observer: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.lock_observers().push(Arc::new(observer));
    }

    /// Async subscription to changes.
    pub fn subscribe(&self) -> watch::Receiver<FlagSet> {
        self.sender.subscribe()
    }

    fn notify(&self) {
        // Snapshot the list so an observer may register another one.
        let observers: Vec<Observer> = self.lock_observers().clone();
        for observer in observers {
            observer();
        }
    }

    fn lock_observers(&self) -> std::sync::MutexGuard<'_, Vec<Observer>> {
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
