//! Storage boundary, bounded log sinks and HTTP fetch utilities for earnwatch.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use earnwatch_core::{EarningsDate, LogEntry, LogLevel, NewLogEntry, Stock, StockId};
use thiserror::Error;

mod http;
#[cfg(any(test, feature = "test-util"))]
mod memory;
mod pg;
mod sink;

pub use http::{FetchedResponse, HttpClientConfig, HttpError, HttpFetcher, BROWSER_USER_AGENTS};
#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryStore;
pub use pg::{PgConnectOptions, PgStore};
pub use sink::{DbLogSink, LocalLogError, LocalLogFile};

pub const CRATE_NAME: &str = "earnwatch-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("stored value is invalid: {0}")]
    Corrupt(String),
    #[error("{what} {id} not found")]
    NotFound { what: &'static str, id: i64 },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Stocks and their earnings dates.
#[async_trait]
pub trait EarningsStore: Send + Sync {
    /// The active stock with the oldest `updated_at`, if any.
    async fn next_active_stock(&self) -> Result<Option<Stock>, StoreError>;

    async fn earnings_dates(&self, stock_id: StockId) -> Result<Vec<EarningsDate>, StoreError>;

    async fn insert_earnings_date(
        &self,
        stock_id: StockId,
        at: DateTime<Utc>,
    ) -> Result<EarningsDate, StoreError>;

    async fn delete_earnings_date(&self, id: i64) -> Result<(), StoreError>;

    async fn set_stock_active(&self, stock_id: StockId, active: bool) -> Result<(), StoreError>;

    async fn update_company_name(&self, stock_id: StockId, name: &str) -> Result<(), StoreError>;

    async fn touch_stock(&self, stock_id: StockId, at: DateTime<Utc>) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub level: Option<LogLevel>,
    pub stock_id: Option<StockId>,
    pub limit: usize,
}

impl Default for LogFilter {
    fn default() -> Self {
        Self {
            level: None,
            stock_id: None,
            limit: 100,
        }
    }
}

/// The persistent `logs` table.
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn count_logs(&self) -> Result<i64, StoreError>;

    async fn count_logs_at_level(&self, level: LogLevel) -> Result<i64, StoreError>;

    /// Removes the row with the smallest id. A no-op on an empty table.
    async fn delete_oldest_log(&self) -> Result<(), StoreError>;

    async fn insert_log(&self, entry: &NewLogEntry) -> Result<LogEntry, StoreError>;

    /// Newest first.
    async fn logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, StoreError>;
}
