//! The two capacity-bounded log sinks: the persistent `logs` table and the
//! local log file.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use earnwatch_core::{LogEntry, LogLevel, NewLogEntry};
use thiserror::Error;

use crate::{LogStore, StoreError};

/// Persistent sink over a [`LogStore`]. Evicts the oldest rows before an
/// insert so the table never holds more than `capacity` entries.
pub struct DbLogSink<L: ?Sized> {
    store: Arc<L>,
    capacity: usize,
}

impl<L: ?Sized> Clone for DbLogSink<L> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            capacity: self.capacity,
        }
    }
}

impl<L: LogStore + ?Sized> DbLogSink<L> {
    pub fn new(store: Arc<L>, capacity: usize) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn write(&self, entry: &NewLogEntry) -> Result<LogEntry, StoreError> {
        let occupancy = self.store.count_logs().await?;
        let capacity = self.capacity as i64;
        if occupancy >= capacity {
            for _ in 0..(occupancy - capacity + 1) {
                self.store.delete_oldest_log().await?;
            }
        }
        self.store.insert_log(entry).await
    }

    pub async fn count_at_level(&self, level: LogLevel) -> Result<i64, StoreError> {
        self.store.count_logs_at_level(level).await
    }
}

#[derive(Debug, Error)]
#[error("local log {path}: {source}")]
pub struct LocalLogError {
    pub path: String,
    #[source]
    pub source: io::Error,
}

/// Append-only text log holding at most `capacity` lines.
///
/// The most recent lines are mirrored in memory; appends go straight to the
/// end of the file. Evicting a line rewrites the file through a sibling
/// `.tmp` file renamed over the log, so a failed rewrite leaves the previous
/// trail on disk. The handle is opened once and closed on drop.
#[derive(Debug)]
pub struct LocalLogFile {
    path: PathBuf,
    file: File,
    lines: VecDeque<String>,
    capacity: usize,
}

impl LocalLogFile {
    /// Opens or creates the log. Undecodable bytes are replaced rather than
    /// rejected, and a trailing unterminated line is closed off so the next
    /// entry starts on its own line.
    pub fn open(path: impl Into<PathBuf>, capacity: usize) -> Result<Self, LocalLogError> {
        let path = path.into();
        let capacity = capacity.max(1);
        let err = |source| LocalLogError {
            path: path.display().to_string(),
            source,
        };

        let file = open_append(&path).map_err(err)?;
        let bytes = fs::read(&path).map_err(err)?;

        let mut lines = VecDeque::with_capacity(capacity);
        let mut total = 0usize;
        if !bytes.is_empty() {
            let body = bytes.strip_suffix(b"\n").unwrap_or(&bytes[..]);
            for raw in body.split(|b| *b == b'\n') {
                total += 1;
                if lines.len() == capacity {
                    lines.pop_front();
                }
                let line = String::from_utf8_lossy(raw);
                lines.push_back(line.trim_end_matches('\r').to_string());
            }
        }
        let unterminated = !bytes.is_empty() && !bytes.ends_with(b"\n");

        let mut sink = Self {
            path,
            file,
            lines,
            capacity,
        };
        if total > capacity || unterminated {
            sink.rewrite()?;
        }
        Ok(sink)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Retained lines, oldest first.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn write(&mut self, entry: &NewLogEntry) -> Result<(), LocalLogError> {
        let line = entry.to_line().replace(['\r', '\n'], " ");
        if self.lines.len() >= self.capacity {
            let evicted = self.lines.pop_front();
            self.lines.push_back(line);
            if let Err(err) = self.rewrite() {
                self.lines.pop_back();
                if let Some(evicted) = evicted {
                    self.lines.push_front(evicted);
                }
                return Err(err);
            }
            Ok(())
        } else {
            writeln!(self.file, "{line}")
                .and_then(|_| self.file.flush())
                .map_err(|source| self.io_err(source))?;
            self.lines.push_back(line);
            Ok(())
        }
    }

    fn rewrite(&mut self) -> Result<(), LocalLogError> {
        let tmp = self.tmp_path();
        let result = (|| -> io::Result<File> {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            for line in &self.lines {
                writeln!(writer, "{line}")?;
            }
            writer.flush()?;
            drop(writer);
            fs::rename(&tmp, &self.path)?;
            open_append(&self.path)
        })();
        match result {
            Ok(file) => {
                self.file = file;
                Ok(())
            }
            Err(source) => {
                let _ = fs::remove_file(&tmp);
                Err(self.io_err(source))
            }
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn io_err(&self, source: io::Error) -> LocalLogError {
        LocalLogError {
            path: self.path.display().to_string(),
            source,
        }
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use tempfile::tempdir;

    fn entry(n: usize) -> NewLogEntry {
        NewLogEntry::new(LogLevel::Info, format!("entry {n}"), None)
    }

    #[tokio::test]
    async fn db_sink_keeps_the_most_recent_capacity_rows() {
        let store = Arc::new(MemoryStore::new());
        let sink = DbLogSink::new(Arc::clone(&store), 5);

        for n in 0..12 {
            sink.write(&entry(n)).await.expect("write");
            assert!(store.count_logs().await.expect("count") <= 5);
        }

        let kept = store
            .all_logs()
            .into_iter()
            .map(|l| l.message)
            .collect::<Vec<_>>();
        assert_eq!(
            kept,
            (7..12).map(|n| format!("entry {n}")).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn db_sink_below_capacity_keeps_everything() {
        let store = Arc::new(MemoryStore::new());
        let sink = DbLogSink::new(Arc::clone(&store), 10);
        for n in 0..3 {
            sink.write(&entry(n)).await.expect("write");
        }
        assert_eq!(store.count_logs().await.expect("count"), 3);
    }

    #[tokio::test]
    async fn db_sink_drains_an_overfull_table_down_to_capacity() {
        let store = Arc::new(MemoryStore::new());
        for n in 0..8 {
            store.insert_log(&entry(n)).await.expect("seed");
        }
        let sink = DbLogSink::new(Arc::clone(&store), 5);
        sink.write(&entry(100)).await.expect("write");

        let kept = store.all_logs();
        assert_eq!(kept.len(), 5);
        assert_eq!(kept.last().map(|l| l.message.as_str()), Some("entry 100"));
        assert_eq!(kept.first().map(|l| l.message.as_str()), Some("entry 4"));
    }

    #[test]
    fn local_file_retains_last_capacity_lines_in_order() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("log.txt");
        let mut sink = LocalLogFile::open(&path, 4).expect("open");

        for n in 0..10 {
            sink.write(&entry(n)).expect("write");
            assert!(sink.len() <= 4);
        }

        let on_disk = std::fs::read_to_string(&path).expect("read");
        let expected = (6..10)
            .map(|n| format!("[INFO] entry {n} (entity_ref: nil)\n"))
            .collect::<String>();
        assert_eq!(on_disk, expected);
        assert_eq!(sink.lines().count(), 4);
    }

    #[test]
    fn local_file_appends_until_full() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("log.txt");
        let mut sink = LocalLogFile::open(&path, 10).expect("open");
        sink.write(&NewLogEntry::new(LogLevel::Error, "boom", Some(9)))
            .expect("write");
        sink.write(&entry(1)).expect("write");

        let on_disk = std::fs::read_to_string(&path).expect("read");
        assert_eq!(
            on_disk,
            "[ERROR] boom (entity_ref: 9)\n[INFO] entry 1 (entity_ref: nil)\n"
        );
    }

    #[test]
    fn reopening_compacts_an_oversized_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("log.txt");
        let seeded = (0..20).map(|n| format!("line {n}\n")).collect::<String>();
        std::fs::write(&path, seeded).expect("seed");

        let mut sink = LocalLogFile::open(&path, 3).expect("open");
        assert_eq!(
            sink.lines().collect::<Vec<_>>(),
            vec!["line 17", "line 18", "line 19"]
        );
        assert_eq!(
            std::fs::read_to_string(&path).expect("read"),
            "line 17\nline 18\nline 19\n"
        );

        sink.write(&entry(0)).expect("write");
        assert_eq!(
            std::fs::read_to_string(&path).expect("read"),
            "line 18\nline 19\n[INFO] entry 0 (entity_ref: nil)\n"
        );
    }

    #[test]
    fn undecodable_bytes_do_not_block_opening() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("log.txt");
        std::fs::write(&path, b"[ERROR] bad \xff\xfe bytes\n").expect("seed");

        let mut sink = LocalLogFile::open(&path, 10).expect("open");
        assert_eq!(sink.len(), 1);
        assert!(sink.lines().all(|l| l.starts_with("[ERROR] bad ")));

        sink.write(&entry(1)).expect("write");
        let on_disk = std::fs::read(&path).expect("read");
        assert!(on_disk.ends_with(b"bytes\n[INFO] entry 1 (entity_ref: nil)\n"));
    }

    #[test]
    fn unterminated_last_line_is_closed_on_open() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("log.txt");
        std::fs::write(&path, "[INFO] partial line without newline").expect("seed");

        let mut sink = LocalLogFile::open(&path, 10).expect("open");
        sink.write(&NewLogEntry::new(LogLevel::Error, "next", None))
            .expect("write");

        assert_eq!(
            std::fs::read_to_string(&path).expect("read"),
            "[INFO] partial line without newline\n[ERROR] next (entity_ref: nil)\n"
        );
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn failed_eviction_keeps_the_previous_trail() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("log.txt");
        let mut sink = LocalLogFile::open(&path, 2).expect("open");
        sink.write(&entry(0)).expect("write");
        sink.write(&entry(1)).expect("write");

        // A directory where the rewrite wants its scratch file.
        std::fs::create_dir(dir.path().join("log.txt.tmp")).expect("block tmp");
        assert!(sink.write(&entry(2)).is_err());

        let expected = "[INFO] entry 0 (entity_ref: nil)\n[INFO] entry 1 (entity_ref: nil)\n";
        assert_eq!(std::fs::read_to_string(&path).expect("read"), expected);
        assert_eq!(
            sink.lines().collect::<Vec<_>>(),
            vec![
                "[INFO] entry 0 (entity_ref: nil)",
                "[INFO] entry 1 (entity_ref: nil)"
            ]
        );
    }

    #[test]
    fn embedded_newlines_stay_on_one_line() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("log.txt");
        let mut sink = LocalLogFile::open(&path, 3).expect("open");
        sink.write(&NewLogEntry::new(LogLevel::Warn, "two\nlines", None))
            .expect("write");
        assert_eq!(
            std::fs::read_to_string(&path).expect("read"),
            "[WARN] two lines (entity_ref: nil)\n"
        );
    }
}
