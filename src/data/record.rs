//! One logged reading and its line format.

use chrono::{DateTime, Utc};

/// Field separator between timestamp and value.
pub const SEPARATOR: char = '\t';

/// A reading as received from the counter, stamped when it was logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    timestamp: DateTime<Utc>,
    value: String,
}

impl LogRecord {
    pub fn new(timestamp: DateTime<Utc>, value: impl Into<String>) -> Self {
        Self {
            timestamp,
            value: value.into(),
        }
    }

    /// `<epoch seconds with microseconds><TAB><value><LF>`
    pub fn to_line(&self) -> String {
        format!(
            "{}.{:06}{}{}\n",
            self.timestamp.timestamp(),
            self.timestamp.timestamp_subsec_micros(),
            SEPARATOR,
            self.value
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn line_is_tab_separated_and_newline_terminated() {
        let ts = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let record = LogRecord::new(ts, "1.23e-9");
        assert_eq!(record.to_line(), "1700000000.123456\t1.23e-9\n");
    }

    #[test]
    fn whole_seconds_keep_the_fraction() {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert_eq!(LogRecord::new(ts, "x").to_line(), "1700000000.000000\tx\n");
    }
}
