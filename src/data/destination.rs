//! Open append handles on data files and medium detection.

use crate::data::record::LogRecord;
use std::fs::{self, File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};

/// An append handle bound to one data file.
///
/// Writes go through a `LineWriter`, so every complete record is handed to
/// the OS as soon as it is written and a concurrent copy of the file sees it.
#[derive(Debug)]
pub struct Destination {
    path: PathBuf,
    file_name: String,
    writer: LineWriter<File>,
}

impl Destination {
    /// Open `folder/file_name` for appending, creating it if needed.
    ///
    /// The folder itself is never created.
    pub fn open_append(folder: &Path, file_name: &str) -> io::Result<Self> {
        let path = folder.join(file_name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file_name: file_name.to_string(),
            writer: LineWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Basename of the file, shared by the primary and secondary copies.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Append records in order.
    pub fn write_records<'a, I>(&mut self, records: I) -> io::Result<()>
    where
        I: IntoIterator<Item = &'a LogRecord>,
    {
        for record in records {
            self.writer.write_all(record.to_line().as_bytes())?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    /// Flush and release the handle.
    pub fn close(mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()
    }
}

/// Whether the secondary folder is currently usable.
///
/// Besides being a directory, the folder has to be listed by its parent: a
/// stale mount point can keep answering `stat` after the drive is gone.
pub fn medium_present(folder: &Path) -> bool {
    if !folder.is_dir() {
        return false;
    }
    let Some(name) = folder.file_name() else {
        return true;
    };
    let parent = match folder.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::read_dir(parent)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .any(|entry| entry.file_name() == name)
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    #[test]
    fn appends_records_to_existing_file() {
        let dir = TempDir::new().unwrap();
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        let mut first = Destination::open_append(dir.path(), "a.txt").unwrap();
        first.write_records([&LogRecord::new(ts, "1")]).unwrap();
        first.close().unwrap();

        let mut second = Destination::open_append(dir.path(), "a.txt").unwrap();
        second.write_records([&LogRecord::new(ts, "2")]).unwrap();
        // visible without an explicit flush
        let content = fs::read_to_string(dir.path().join("a.txt")).unwrap();
        assert_eq!(content, "1700000000.000000\t1\n1700000000.000000\t2\n");
        assert_eq!(second.file_name(), "a.txt");
    }

    #[test]
    fn open_fails_when_folder_is_missing() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(Destination::open_append(&missing, "a.txt").is_err());
        assert!(!missing.exists());
    }

    #[test]
    fn medium_presence_follows_the_folder() {
        let dir = TempDir::new().unwrap();
        let usb = dir.path().join("usb").join("sr620");
        assert!(!medium_present(&usb));

        fs::create_dir_all(&usb).unwrap();
        assert!(medium_present(&usb));

        fs::remove_dir_all(dir.path().join("usb")).unwrap();
        assert!(!medium_present(&usb));
    }

    #[test]
    fn a_plain_file_is_not_a_medium() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("sr620");
        fs::write(&file, b"").unwrap();
        assert!(!medium_present(&file));
    }
}
