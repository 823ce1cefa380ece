//! Data file naming.
//!
//! Files are named `<prefix><YYYY><DDD><HH><MM>.txt` from the UTC time they were
//! opened, e.g. `sr620-20243662359.txt` for 2024-12-31 23:59. The year and
//! day-of-year encoded in the name give the file's calendar date, which is what
//! rotation, catch-up and retention reason about. Names that do not match the
//! pattern are ignored.

use crate::error::{AppResult, DaqError};
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;

/// Builds and recognises data file names for one prefix.
#[derive(Debug, Clone)]
pub struct FileNamer {
    prefix: String,
    pattern: Regex,
}

impl FileNamer {
    pub fn new(prefix: &str) -> AppResult<Self> {
        let pattern = Regex::new(&format!(
            r"^{}(\d{{4}})(\d{{3}})\d{{4}}\.txt$",
            regex::escape(prefix)
        ))
        .map_err(|e| DaqError::Configuration(format!("Bad data file prefix '{prefix}': {e}")))?;
        Ok(Self {
            prefix: prefix.to_string(),
            pattern,
        })
    }

    /// Name of the file opened at `at`, truncated to the minute.
    pub fn file_name(&self, at: DateTime<Utc>) -> String {
        format!("{}{}.txt", self.prefix, at.format("%Y%j%H%M"))
    }

    /// Calendar date encoded in `name`, or `None` if it is not a data file.
    pub fn file_date(&self, name: &str) -> Option<NaiveDate> {
        let caps = self.pattern.captures(name)?;
        let year: i32 = caps.get(1)?.as_str().parse().ok()?;
        let ordinal: u32 = caps.get(2)?.as_str().parse().ok()?;
        NaiveDate::from_yo_opt(year, ordinal)
    }
}

/// Whole days from `file_date` to `today`; negative for future-dated files.
///
/// Uses full calendar dates, so day 360 of last year is 10 days before day 5
/// of this year rather than 355 days after it.
pub fn age_in_days(file_date: NaiveDate, today: NaiveDate) -> i64 {
    (today - file_date).num_days()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn file_name_encodes_year_day_hour_minute() {
        let namer = FileNamer::new("sr620-").unwrap();
        let at = Utc.with_ymd_and_hms(2024, 2, 1, 7, 5, 59).unwrap();
        assert_eq!(namer.file_name(at), "sr620-20240320705.txt");
    }

    #[test]
    fn file_name_is_zero_padded() {
        let namer = FileNamer::new("sr620-").unwrap();
        let at = Utc.with_ymd_and_hms(2024, 1, 3, 4, 5, 0).unwrap();
        assert_eq!(namer.file_name(at), "sr620-20240030405.txt");
    }

    #[test]
    fn parses_date_back_out_of_name() {
        let namer = FileNamer::new("sr620-").unwrap();
        let at = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 0).unwrap();
        let name = namer.file_name(at);
        assert_eq!(name, "sr620-20243662359.txt");
        assert_eq!(
            namer.file_date(&name),
            NaiveDate::from_ymd_opt(2024, 12, 31)
        );
    }

    #[test]
    fn rejects_foreign_names() {
        let namer = FileNamer::new("sr620-").unwrap();
        assert_eq!(namer.file_date("sr620-2024001.txt"), None);
        assert_eq!(namer.file_date("other-20240010000.txt"), None);
        assert_eq!(namer.file_date("sr620-20240010000.txt.bak"), None);
        assert_eq!(namer.file_date("sr620-20240010000xtxt"), None);
        // day 400 does not exist
        assert_eq!(namer.file_date("sr620-20244000000.txt"), None);
    }

    #[test]
    fn prefix_is_matched_literally() {
        let namer = FileNamer::new("run.1+").unwrap();
        assert!(namer.file_date("run.1+20240010000.txt").is_some());
        assert!(namer.file_date("runx1+20240010000.txt").is_none());
    }

    #[test]
    fn age_crosses_year_boundary() {
        let last_year = NaiveDate::from_yo_opt(2023, 360).unwrap();
        let today = NaiveDate::from_yo_opt(2024, 5).unwrap();
        assert_eq!(age_in_days(last_year, today), 10);
        assert_eq!(age_in_days(today, last_year), -10);
    }
}
