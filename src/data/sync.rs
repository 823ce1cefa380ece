//! Catch-up copy of recent history to the secondary medium.
//!
//! When the medium shows up without an open secondary handle, the writer
//! launches [`run`] on the blocking pool. It first copies every historical data
//! file inside the catch-up window whose mirror is missing or has a different
//! size, then snapshots the live file last. While the live file is copied the
//! `BUFFERING` flag is set, so the foreground writer parks new records in
//! memory instead of appending to a file that is being read. The secondary
//! handle is opened, and `BUFFERING` and `SYNC_RUNNING` cleared, in the same
//! critical section, so the next write mirrors the parked records and nothing
//! falls between snapshot and live mirroring.

use crate::data::destination::medium_present;
use crate::data::dual_writer::Shared;
use crate::data::naming::{age_in_days, FileNamer};
use crate::state::{FlagSet, StateFlags};
use chrono::NaiveDate;
use std::fs;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// How often the live-file snapshot is retried when a day rollover replaces
/// the live file while it is being copied.
const LIVE_SNAPSHOT_ATTEMPTS: usize = 3;

/// Outcome of the historical part of a catch-up pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub copied: Vec<String>,
    pub failed: Vec<String>,
}

/// Whether `target` is missing or differs in size from `source`.
///
/// A source that cannot be read (e.g. pruned meanwhile) needs no copy.
pub fn needs_copy(source: &Path, target: &Path) -> bool {
    let Ok(src) = fs::metadata(source) else {
        return false;
    };
    match fs::metadata(target) {
        Ok(dst) => dst.len() != src.len(),
        Err(_) => true,
    }
}

/// Copy data files from `primary` to `secondary` that are younger than
/// `max_sync` days and whose mirror is missing or stale.
///
/// `skip` names the live file, which is handled separately.
pub fn copy_history(
    primary: &Path,
    secondary: &Path,
    namer: &FileNamer,
    today: NaiveDate,
    max_sync: u32,
    skip: Option<&str>,
) -> SyncReport {
    let mut report = SyncReport::default();

    let entries = match fs::read_dir(primary) {
        Ok(entries) => entries,
        Err(e) => {
            error!(folder = %primary.display(), error = %e, "Unable to list primary folder for syncing");
            return report;
        }
    };

    for entry in entries.filter_map(Result::ok) {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(date) = namer.file_date(&name) else {
            debug!(file = %name, "Skipping file");
            continue;
        };
        if Some(name.as_str()) == skip
            || !entry.file_type().map(|t| t.is_file()).unwrap_or(false)
            || age_in_days(date, today) >= i64::from(max_sync)
        {
            continue;
        }

        let target = secondary.join(&name);
        if !needs_copy(&entry.path(), &target) {
            continue;
        }
        debug!(file = %name, "Copying file");
        match fs::copy(entry.path(), &target) {
            Ok(_) => {
                info!(file = %name, "Copied file");
                report.copied.push(name);
            }
            Err(e) => {
                error!(file = %name, error = %e, "Unable to copy file");
                report.failed.push(name);
            }
        }
    }
    report
}

/// Clears `BUFFERING` if the snapshot is abandoned halfway.
struct BufferingWindow<'a>(&'a StateFlags);

impl Drop for BufferingWindow<'_> {
    fn drop(&mut self) {
        self.0.clear(FlagSet::BUFFERING);
    }
}

/// Body of the sync worker.
pub(crate) fn run(shared: &Shared) {
    let Some(secondary) = shared.storage.secondary_data_path.as_deref() else {
        return;
    };
    if !medium_present(secondary) {
        warn!(folder = %secondary.display(), "Medium vanished before syncing started");
        shared
            .flags
            .clear(FlagSet::MEDIUM_PRESENT | FlagSet::DUAL_WRITE_ACTIVE | FlagSet::SYNC_RUNNING);
        return;
    }

    let today = shared.clock.now().date_naive();
    let live = shared
        .lock_io()
        .primary
        .as_ref()
        .map(|p| p.file_name().to_string());

    let report = copy_history(
        &shared.storage.primary_data_path,
        secondary,
        &shared.namer,
        today,
        shared.storage.max_sync,
        live.as_deref(),
    );
    if !report.failed.is_empty() {
        warn!(failed = report.failed.len(), "Some files could not be synced");
    }

    snapshot_live_file(shared, secondary, live);
    info!(copied = report.copied.len(), "Sync files done");
}

/// Copy `name` from the primary store unless its mirror is already current.
///
/// Returns `false` if the copy failed.
fn mirror_file(primary: &Path, secondary: &Path, name: &str) -> bool {
    let source = primary.join(name);
    let target = secondary.join(name);
    if !needs_copy(&source, &target) {
        return true;
    }
    debug!(file = %name, "Copying file");
    match fs::copy(&source, &target) {
        Ok(_) => {
            info!(file = %name, "Copied file");
            true
        }
        Err(e) => {
            error!(file = %name, error = %e, "Unable to copy file");
            false
        }
    }
}

/// Copy the live file inside the `BUFFERING` window, then open the mirror.
///
/// `previous` is the file that was live when the history scan started and was
/// therefore skipped by it. If the day rotated since, that file is final and is
/// copied here too. A rotation during the copy itself retries with the new
/// live file.
pub(crate) fn snapshot_live_file(
    shared: &Shared,
    secondary: &Path,
    mut previous: Option<String>,
) {
    let _window = BufferingWindow(&shared.flags);
    let primary_folder = &shared.storage.primary_data_path;

    for attempt in 1..=LIVE_SNAPSHOT_ATTEMPTS {
        let live = {
            let mut io = shared.lock_io();
            let Some(primary) = io.primary.as_mut() else {
                break;
            };
            if let Err(e) = primary.flush() {
                warn!(file = %primary.path().display(), error = %e, "Unable to flush primary file before snapshot");
            }
            shared.flags.set(FlagSet::BUFFERING);
            primary.file_name().to_string()
        };

        if let Some(rotated) = previous.take().filter(|name| *name != live) {
            debug!(file = %rotated, "Live file rotated out since the scan started");
            mirror_file(primary_folder, secondary, &rotated);
        }
        let in_step = mirror_file(primary_folder, secondary, &live);

        let mut io = shared.lock_io();
        let still_live = io.primary.as_ref().is_some_and(|p| p.file_name() == live);
        if still_live || attempt == LIVE_SNAPSHOT_ATTEMPTS {
            if in_step && still_live {
                shared.open_secondary(&mut io);
            }
            shared
                .flags
                .clear(FlagSet::BUFFERING | FlagSet::SYNC_RUNNING);
            return;
        }
        debug!(file = %live, "Live file rotated during snapshot, retrying");
        previous = Some(live);
    }

    shared
        .flags
        .clear(FlagSet::BUFFERING | FlagSet::SYNC_RUNNING);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Days, TimeZone, Utc};
    use tempfile::TempDir;

    struct Stores {
        _root: TempDir,
        primary: std::path::PathBuf,
        secondary: std::path::PathBuf,
    }

    fn stores() -> Stores {
        let root = TempDir::new().unwrap();
        let primary = root.path().join("data");
        let secondary = root.path().join("usb");
        fs::create_dir(&primary).unwrap();
        fs::create_dir(&secondary).unwrap();
        Stores {
            _root: root,
            primary,
            secondary,
        }
    }

    #[test]
    fn copies_missing_and_stale_files_inside_window() {
        let s = stores();
        let namer = FileNamer::new("sr620-").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 20, 10, 0, 0).unwrap();

        let missing = namer.file_name(now - Days::new(1));
        let stale = namer.file_name(now - Days::new(2));
        let same = namer.file_name(now - Days::new(3));
        let too_old = namer.file_name(now - Days::new(5));
        for name in [&missing, &stale, &same, &too_old] {
            fs::write(s.primary.join(name), b"1.0\t5\n2.0\t6\n").unwrap();
        }
        fs::write(s.secondary.join(&stale), b"1.0\t5\n").unwrap();
        fs::write(s.secondary.join(&same), b"9.9\t9\n2.0\t6\n").unwrap();

        let mut report = copy_history(&s.primary, &s.secondary, &namer, now.date_naive(), 5, None);
        report.copied.sort();

        let mut expected = vec![missing.clone(), stale.clone()];
        expected.sort();
        assert_eq!(report.copied, expected);
        assert!(report.failed.is_empty());
        assert_eq!(
            fs::read(s.secondary.join(&stale)).unwrap(),
            b"1.0\t5\n2.0\t6\n".to_vec()
        );
        // equal size counts as in sync
        assert_eq!(
            fs::read(s.secondary.join(&same)).unwrap(),
            b"9.9\t9\n2.0\t6\n".to_vec()
        );
        assert!(!s.secondary.join(&too_old).exists());
    }

    #[test]
    fn live_file_is_left_for_the_snapshot_step() {
        let s = stores();
        let namer = FileNamer::new("sr620-").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 20, 10, 0, 0).unwrap();
        let live = namer.file_name(now);
        fs::write(s.primary.join(&live), b"1.0\t5\n").unwrap();

        let report = copy_history(
            &s.primary,
            &s.secondary,
            &namer,
            now.date_naive(),
            5,
            Some(&live),
        );
        assert!(report.copied.is_empty());
        assert!(!s.secondary.join(&live).exists());
    }

    #[test]
    fn window_spans_new_year() {
        let s = stores();
        let namer = FileNamer::new("sr620-").unwrap();
        let december = namer.file_name(Utc.with_ymd_and_hms(2023, 12, 30, 23, 0, 0).unwrap());
        fs::write(s.primary.join(&december), b"1.0\t5\n").unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();

        assert!(copy_history(&s.primary, &s.secondary, &namer, today, 3, None).copied.is_empty());
        assert_eq!(
            copy_history(&s.primary, &s.secondary, &namer, today, 4, None).copied,
            vec![december]
        );
    }

    #[test]
    fn unreadable_source_needs_no_copy() {
        let s = stores();
        assert!(!needs_copy(&s.primary.join("gone.txt"), &s.secondary.join("gone.txt")));
    }
}
