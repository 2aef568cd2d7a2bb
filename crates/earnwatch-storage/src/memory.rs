use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use earnwatch_core::{EarningsDate, LogEntry, LogLevel, NewLogEntry, Stock, StockId};

use crate::{EarningsStore, LogFilter, LogStore, StoreError};

/// In-process store with the same contract as [`crate::PgStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    stocks: BTreeMap<StockId, Stock>,
    earnings_dates: BTreeMap<i64, EarningsDate>,
    logs: BTreeMap<i64, LogEntry>,
    next_earnings_id: i64,
    next_log_id: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().expect("memory store lock poisoned")
    }

    pub fn seed_stock(&self, stock: Stock) {
        self.state().stocks.insert(stock.id, stock);
    }

    pub fn seed_earnings_date(&self, stock_id: StockId, at: DateTime<Utc>) -> EarningsDate {
        let mut state = self.state();
        state.next_earnings_id += 1;
        let record = EarningsDate {
            id: state.next_earnings_id,
            stock_id,
            earnings_datetime: at,
        };
        state.earnings_dates.insert(record.id, record.clone());
        record
    }

    pub fn stock(&self, id: StockId) -> Option<Stock> {
        self.state().stocks.get(&id).cloned()
    }

    /// Every log row, oldest first.
    pub fn all_logs(&self) -> Vec<LogEntry> {
        self.state().logs.values().cloned().collect()
    }

    fn stock_mut<'a>(
        state: &'a mut MemoryState,
        stock_id: StockId,
    ) -> Result<&'a mut Stock, StoreError> {
        state.stocks.get_mut(&stock_id).ok_or(StoreError::NotFound {
            what: "stock",
            id: stock_id,
        })
    }
}

#[async_trait]
impl EarningsStore for MemoryStore {
    async fn next_active_stock(&self) -> Result<Option<Stock>, StoreError> {
        Ok(self
            .state()
            .stocks
            .values()
            .filter(|s| s.is_active)
            .min_by_key(|s| (s.updated_at, s.id))
            .cloned())
    }

    async fn earnings_dates(&self, stock_id: StockId) -> Result<Vec<EarningsDate>, StoreError> {
        Ok(self
            .state()
            .earnings_dates
            .values()
            .filter(|d| d.stock_id == stock_id)
            .cloned()
            .collect())
    }

    async fn insert_earnings_date(
        &self,
        stock_id: StockId,
        at: DateTime<Utc>,
    ) -> Result<EarningsDate, StoreError> {
        let mut state = self.state();
        if !state.stocks.contains_key(&stock_id) {
            return Err(StoreError::NotFound {
                what: "stock",
                id: stock_id,
            });
        }
        if state
            .earnings_dates
            .values()
            .any(|d| d.stock_id == stock_id && d.earnings_datetime == at)
        {
            return Err(StoreError::Conflict(format!(
                "earnings date {at} already stored for stock {stock_id}"
            )));
        }
        state.next_earnings_id += 1;
        let record = EarningsDate {
            id: state.next_earnings_id,
            stock_id,
            earnings_datetime: at,
        };
        state.earnings_dates.insert(record.id, record.clone());
        Ok(record)
    }

    async fn delete_earnings_date(&self, id: i64) -> Result<(), StoreError> {
        self.state().earnings_dates.remove(&id);
        Ok(())
    }

    async fn set_stock_active(&self, stock_id: StockId, active: bool) -> Result<(), StoreError> {
        let mut state = self.state();
        Self::stock_mut(&mut state, stock_id)?.is_active = active;
        Ok(())
    }

    async fn update_company_name(&self, stock_id: StockId, name: &str) -> Result<(), StoreError> {
        let mut state = self.state();
        Self::stock_mut(&mut state, stock_id)?.company_name = name.to_string();
        Ok(())
    }

    async fn touch_stock(&self, stock_id: StockId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.state();
        Self::stock_mut(&mut state, stock_id)?.updated_at = at;
        Ok(())
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn count_logs(&self) -> Result<i64, StoreError> {
        Ok(self.state().logs.len() as i64)
    }

    async fn count_logs_at_level(&self, level: LogLevel) -> Result<i64, StoreError> {
        Ok(self
            .state()
            .logs
            .values()
            .filter(|l| l.level == level)
            .count() as i64)
    }

    async fn delete_oldest_log(&self) -> Result<(), StoreError> {
        self.state().logs.pop_first();
        Ok(())
    }

    async fn insert_log(&self, entry: &NewLogEntry) -> Result<LogEntry, StoreError> {
        let mut state = self.state();
        state.next_log_id += 1;
        let row = LogEntry {
            id: state.next_log_id,
            level: entry.level,
            message: entry.message.clone(),
            stock_id: entry.stock_id,
            timestamp: entry.timestamp,
        };
        state.logs.insert(row.id, row.clone());
        Ok(row)
    }

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, StoreError> {
        Ok(self
            .state()
            .logs
            .values()
            .rev()
            .filter(|l| filter.level.map_or(true, |level| l.level == level))
            .filter(|l| filter.stock_id.map_or(true, |id| l.stock_id == Some(id)))
            .take(filter.limit)
            .cloned()
            .collect())
    }
}
