//! Retention: pruning primary files older than `max_history` days.

use crate::data::naming::{age_in_days, FileNamer};
use chrono::NaiveDate;
use std::fs;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Outcome of one pruning pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneReport {
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
}

/// Delete data files in `folder` dated more than `max_history` days before
/// `today`.
///
/// A file exactly `max_history` days old is kept. Files whose names do not
/// match the data file pattern are left alone. Failures are logged per file
/// and never stop the pass.
pub fn prune(folder: &Path, namer: &FileNamer, today: NaiveDate, max_history: u32) -> PruneReport {
    let mut report = PruneReport::default();

    let entries = match fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(e) => {
            error!(folder = %folder.display(), error = %e, "Unable to list primary folder for deletion");
            return report;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Unreadable directory entry skipped");
                continue;
            }
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(date) = namer.file_date(&name) else {
            debug!(file = %name, "Skipping file");
            continue;
        };
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        if age_in_days(date, today) <= i64::from(max_history) {
            continue;
        }

        match fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!(file = %name, "Deleted file");
                report.deleted.push(name);
            }
            Err(e) => {
                error!(file = %name, error = %e, "Unable to delete file");
                report.failed.push(name);
            }
        }
    }

    info!(
        deleted = report.deleted.len(),
        failed = report.failed.len(),
        "Deletion of files done"
    );
    report
}
