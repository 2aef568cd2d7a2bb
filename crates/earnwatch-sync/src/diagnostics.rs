//! Routes diagnostic entries to the persistent and local sinks.

use earnwatch_core::{LogLevel, NewLogEntry, StockId};
use earnwatch_storage::{DbLogSink, LocalLogFile, LogStore, StoreError};
use tracing::{debug, error, info, warn};

/// Owns both sinks for the lifetime of the service.
///
/// Writes try the persistent sink first and fall back to the local file.
/// A failing local write is reported on the tracing stream and goes no
/// further.
pub struct DiagnosticLog<L: ?Sized> {
    db: DbLogSink<L>,
    local: LocalLogFile,
}

impl<L: LogStore + ?Sized> DiagnosticLog<L> {
    pub fn new(db: DbLogSink<L>, local: LocalLogFile) -> Self {
        Self { db, local }
    }

    pub fn db(&self) -> &DbLogSink<L> {
        &self.db
    }

    pub fn local(&self) -> &LocalLogFile {
        &self.local
    }

    /// Persistent sink, falling back to the local file if that fails.
    pub async fn record(
        &mut self,
        level: LogLevel,
        message: impl Into<String>,
        stock_id: Option<StockId>,
    ) {
        let entry = NewLogEntry::new(level, message, stock_id);
        trace_entry(&entry);
        if let Err(err) = self.db.write(&entry).await {
            self.write_local(&entry);
            self.note_db_failure(&err, stock_id);
        }
    }

    /// Persistent sink when reachable, and the local file regardless.
    pub async fn record_everywhere(
        &mut self,
        level: LogLevel,
        message: impl Into<String>,
        stock_id: Option<StockId>,
    ) {
        let entry = NewLogEntry::new(level, message, stock_id);
        trace_entry(&entry);
        let persisted = self.db.write(&entry).await;
        self.write_local(&entry);
        if let Err(err) = persisted {
            self.note_db_failure(&err, stock_id);
        }
    }

    /// Local file only.
    pub fn record_local(
        &mut self,
        level: LogLevel,
        message: impl Into<String>,
        stock_id: Option<StockId>,
    ) {
        let entry = NewLogEntry::new(level, message, stock_id);
        trace_entry(&entry);
        self.write_local(&entry);
    }

    fn note_db_failure(&mut self, err: &StoreError, stock_id: Option<StockId>) {
        warn!(error = %err, "persistent log write failed; using local log");
        self.write_local(&NewLogEntry::new(
            LogLevel::Error,
            format!("Could not write to the database: {err}"),
            stock_id,
        ));
    }

    fn write_local(&mut self, entry: &NewLogEntry) {
        if let Err(err) = self.local.write(entry) {
            error!(error = %err, line = %entry.to_line(), "local log write failed");
        }
    }
}

fn trace_entry(entry: &NewLogEntry) {
    let stock_id = entry.stock_id;
    let message = entry.message.as_str();
    match entry.level {
        LogLevel::Debug => debug!(?stock_id, "{message}"),
        LogLevel::Info => info!(?stock_id, "{message}"),
        LogLevel::Warn => warn!(?stock_id, "{message}"),
        LogLevel::Error => error!(?stock_id, "{message}"),
        LogLevel::Fatal => error!(fatal = true, ?stock_id, "{message}"),
    }
}
