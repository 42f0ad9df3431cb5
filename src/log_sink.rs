use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::clock::{self, Clock};

#[derive(Debug, thiserror::Error)]
pub enum LogSinkError {
    #[error("unable to create log directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("unable to open log file {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("unable to write log file {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("unable to format timestamp: {0}")]
    Timestamp(#[from] time::error::Format),
    #[error("log sink is closed")]
    Closed,
}

/// The handle a LogSink writes through. Only `File` implements it outside of
/// tests.
pub(crate) trait LogFile: Write + Send {
    fn sync(&mut self) -> std::io::Result<()>;
}

impl LogFile for File {
    fn sync(&mut self) -> std::io::Result<()> {
        self.sync_data()
    }
}

/// LogSink appends `[YYYY-MM-DD HH:MM:SS.mmm] <text>` entries to the session
/// log. All threads share one sink; the file handle lives behind a mutex so
/// that each entry is formatted, written and synced as a unit.
pub struct LogSink {
    path: PathBuf,
    clock: Clock,
    file: Mutex<Option<Box<dyn LogFile>>>,
    entries: AtomicU64,
}

impl LogSink {
    /// Opens (or creates) the log at `path` for appending, creating missing
    /// parent directories first.
    pub fn create(path: impl Into<PathBuf>, clock: Clock) -> Result<LogSink, LogSinkError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| LogSinkError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let file = open_append(&path)?;
        Ok(LogSink::with_file(path, clock, Box::new(file)))
    }

    pub(crate) fn with_file(path: PathBuf, clock: Clock, file: Box<dyn LogFile>) -> LogSink {
        LogSink {
            path,
            clock,
            file: Mutex::new(Some(file)),
            entries: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries successfully recorded so far.
    pub fn entries_written(&self) -> u64 {
        self.entries.load(Ordering::Relaxed)
    }

    /// Records one entry and syncs it to disk before returning. A failed write
    /// is retried once on a freshly opened handle.
    pub fn record(&self, text: &str) -> Result<(), LogSinkError> {
        let mut file = self.lock();
        let Some(handle) = file.as_mut() else {
            return Err(LogSinkError::Closed);
        };
        // The timestamp is taken under the lock so that entries stay in
        // chronological order in the file.
        let entry = format!("[{}] {text}\n", clock::format_millis(self.clock.now())?);
        let mut written = 0;

        if let Err(e) = write_durably(&mut **handle, entry.as_bytes(), &mut written) {
            log::warn!(
                "writing to {} failed after {written} of {} bytes ({e}), reopening and retrying",
                self.path.display(),
                entry.len()
            );
            // Whatever already made it into the file stays there: the retry
            // only appends the rest (or just syncs, if everything was written).
            let mut reopened: Box<dyn LogFile> = Box::new(open_append(&self.path)?);
            write_durably(&mut *reopened, entry.as_bytes(), &mut written).map_err(
                |source| LogSinkError::Write {
                    path: self.path.clone(),
                    source,
                },
            )?;
            *file = Some(reopened);
        }
        self.entries.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Like record, but failures are reported as warnings instead of being
    /// returned: losing a log line must never take down a terminal loop.
    pub fn record_or_warn(&self, text: &str) {
        if let Err(e) = self.record(text) {
            log::warn!("log entry dropped: {e}");
        }
    }

    /// Closes the file. Returns true if this call closed it, false if it was
    /// already closed.
    pub fn close(&self) -> bool {
        let Some(mut file) = self.lock().take() else {
            return false;
        };
        let synced = match file.flush() {
            Ok(()) => file.sync(),
            Err(e) => Err(e),
        };
        if let Err(e) = synced {
            log::warn!("final sync of {} failed: {e}", self.path.display());
        }
        true
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn LogFile>>> {
        self.file.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn open_append(path: &Path) -> Result<File, LogSinkError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LogSinkError::Open {
            path: path.to_path_buf(),
            source,
        })
}

/// Writes `entry[*written..]` and syncs it. `written` is advanced as bytes are
/// accepted, so a caller retrying after an error never writes a byte twice.
fn write_durably(
    file: &mut dyn LogFile,
    entry: &[u8],
    written: &mut usize,
) -> std::io::Result<()> {
    while *written < entry.len() {
        match file.write(&entry[*written..]) {
            Ok(0) => return Err(ErrorKind::WriteZero.into()),
            Ok(n) => *written += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    file.flush()?;
    file.sync()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn read_entries(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    // Splits "[2024-01-01 00:00:00.000] text" into its timestamp and text.
    fn split_entry(entry: &str) -> (&str, &str) {
        assert!(entry.starts_with('['), "malformed entry {entry:?}");
        let (timestamp, text) = entry[1..].split_once("] ").expect("missing separator");
        (timestamp, text)
    }

    #[test]
    fn test_record_format() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::create(dir.path().join("port.log"), Clock::local()).unwrap();
        sink.record("hello").unwrap();
        sink.record("").unwrap();

        let entries = read_entries(sink.path());
        assert_eq!(entries.len(), 2);
        let (timestamp, text) = split_entry(&entries[0]);
        assert_eq!(text, "hello");
        // YYYY-MM-DD HH:MM:SS.mmm
        assert_eq!(timestamp.len(), 23, "unexpected timestamp {timestamp:?}");
        assert_eq!(&timestamp[10..11], " ");
        assert_eq!(&timestamp[19..20], ".");
        assert_eq!(entries[1].split_once("] ").map(|(_, t)| t), Some(""));
        assert_eq!(sink.entries_written(), 2);
    }

    #[test]
    fn test_create_makes_parent_directories_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("nested").join("port.log");
        {
            let sink = LogSink::create(&path, Clock::local()).unwrap();
            sink.record("first session").unwrap();
            assert!(sink.close());
        }
        let sink = LogSink::create(&path, Clock::local()).unwrap();
        sink.record("second session").unwrap();

        let texts: Vec<String> = read_entries(&path)
            .iter()
            .map(|e| split_entry(e).1.to_string())
            .collect();
        assert_eq!(texts, vec!["first session", "second session"]);
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::create(dir.path().join("port.log"), Clock::local()).unwrap();
        assert!(sink.close());
        assert!(!sink.close());
        assert!(matches!(sink.record("late"), Err(LogSinkError::Closed)));
        // Must not panic.
        sink.record_or_warn("late");
    }

    #[test]
    fn test_concurrent_records_never_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(LogSink::create(dir.path().join("port.log"), Clock::local()).unwrap());
        let writers: Vec<_> = (0..3)
            .map(|id| {
                let sink = sink.clone();
                std::thread::spawn(move || {
                    for n in 0..50 {
                        sink.record(&format!("writer{id} entry{n} {}", "x".repeat(64)))
                            .unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let entries = read_entries(sink.path());
        assert_eq!(entries.len(), 150);
        for entry in &entries {
            let (_, text) = split_entry(entry);
            assert!(text.starts_with("writer"), "corrupted entry {entry:?}");
            assert!(text.ends_with(&"x".repeat(64)), "corrupted entry {entry:?}");
        }
        let mut timestamps: Vec<&str> = entries.iter().map(|e| split_entry(e).0).collect();
        let in_file_order = timestamps.clone();
        timestamps.sort();
        assert_eq!(in_file_order, timestamps, "entries must be in time order");
    }

    // Passes writes through to a real file until told to fail.
    struct FlakyFile {
        inner: File,
        // Bytes accepted before writes start failing; None never fails.
        accept: Option<usize>,
        fail_sync: bool,
    }

    impl Write for FlakyFile {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            match self.accept {
                Some(0) => Err(std::io::Error::new(ErrorKind::Other, "disk unplugged")),
                Some(left) => {
                    let n = self.inner.write(&buf[..left.min(buf.len())])?;
                    self.accept = Some(left - n);
                    Ok(n)
                }
                None => self.inner.write(buf),
            }
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.inner.flush()
        }
    }

    impl LogFile for FlakyFile {
        fn sync(&mut self) -> std::io::Result<()> {
            if self.fail_sync {
                return Err(std::io::Error::new(ErrorKind::Other, "fsync failed"));
            }
            self.inner.sync_data()
        }
    }

    #[test]
    fn test_retry_never_duplicates_or_tears_entries() {
        struct TestCase<'a> {
            name: &'a str,
            accept: Option<usize>,
            fail_sync: bool,
        }
        let tests = [
            TestCase {
                name: "SyncFails",
                accept: None,
                fail_sync: true,
            },
            TestCase {
                name: "WriteFailsMidEntry",
                accept: Some(5),
                fail_sync: false,
            },
            TestCase {
                name: "WriteFailsImmediately",
                accept: Some(0),
                fail_sync: false,
            },
        ];
        for case in tests {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("port.log");
            let flaky = FlakyFile {
                inner: open_append(&path).unwrap(),
                accept: case.accept,
                fail_sync: case.fail_sync,
            };
            let sink = LogSink::with_file(path.clone(), Clock::local(), Box::new(flaky));
            sink.record("hello").unwrap();
            // Goes to the reopened handle.
            sink.record("again").unwrap();

            let got: Vec<String> = read_entries(&path)
                .iter()
                .map(|e| split_entry(e).1.to_string())
                .collect();
            assert_eq!(
                got,
                vec!["hello", "again"],
                "{}: got={got:?}, want={:?}",
                case.name,
                ["hello", "again"]
            );
            assert_eq!(sink.entries_written(), 2, "{}", case.name);
        }
    }
}
