use async_trait::async_trait;
use chrono::{DateTime, Utc};
use earnwatch_core::{EarningsDate, Exchange, LogEntry, LogLevel, NewLogEntry, Stock, StockId};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

pub use sqlx::postgres::PgConnectOptions;

use crate::{EarningsStore, LogFilter, LogStore, StoreError};

/// Postgres-backed store. One cycle runs at a time, so the pool stays small.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(options: PgConnectOptions) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn stock_from_row(row: &PgRow) -> Result<Stock, StoreError> {
    let exchange: String = row.try_get("exchange")?;
    Ok(Stock {
        id: row.try_get("id")?,
        ticker: row.try_get("ticker")?,
        company_name: row.try_get("company_name")?,
        exchange: exchange
            .parse::<Exchange>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn earnings_date_from_row(row: &PgRow) -> Result<EarningsDate, StoreError> {
    Ok(EarningsDate {
        id: row.try_get("id")?,
        stock_id: row.try_get("stock_id")?,
        earnings_datetime: row.try_get("earnings_datetime")?,
    })
}

fn log_from_row(row: &PgRow) -> Result<LogEntry, StoreError> {
    let level: String = row.try_get("level")?;
    Ok(LogEntry {
        id: row.try_get("id")?,
        level: level
            .parse::<LogLevel>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        message: row.try_get("message")?,
        stock_id: row.try_get("stock_id")?,
        timestamp: row.try_get("timestamp")?,
    })
}

fn expect_one_row(affected: u64, what: &'static str, id: i64) -> Result<(), StoreError> {
    if affected == 0 {
        Err(StoreError::NotFound { what, id })
    } else {
        Ok(())
    }
}

#[async_trait]
impl EarningsStore for PgStore {
    async fn next_active_stock(&self) -> Result<Option<Stock>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, ticker, company_name, exchange, is_active, created_at, updated_at
            FROM stocks
            WHERE is_active = TRUE
            ORDER BY updated_at ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(stock_from_row).transpose()
    }

    async fn earnings_dates(&self, stock_id: StockId) -> Result<Vec<EarningsDate>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, stock_id, earnings_datetime FROM earnings_dates WHERE stock_id = $1",
        )
        .bind(stock_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(earnings_date_from_row).collect()
    }

    async fn insert_earnings_date(
        &self,
        stock_id: StockId,
        at: DateTime<Utc>,
    ) -> Result<EarningsDate, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO earnings_dates (stock_id, earnings_datetime)
            VALUES ($1, $2)
            RETURNING id, stock_id, earnings_datetime
            "#,
        )
        .bind(stock_id)
        .bind(at)
        .fetch_one(&self.pool)
        .await?;
        earnings_date_from_row(&row)
    }

    async fn delete_earnings_date(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM earnings_dates WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_stock_active(&self, stock_id: StockId, active: bool) -> Result<(), StoreError> {
        let done = sqlx::query("UPDATE stocks SET is_active = $2 WHERE id = $1")
            .bind(stock_id)
            .bind(active)
            .execute(&self.pool)
            .await?;
        expect_one_row(done.rows_affected(), "stock", stock_id)
    }

    async fn update_company_name(&self, stock_id: StockId, name: &str) -> Result<(), StoreError> {
        let done = sqlx::query("UPDATE stocks SET company_name = $2 WHERE id = $1")
            .bind(stock_id)
            .bind(name)
            .execute(&self.pool)
            .await?;
        expect_one_row(done.rows_affected(), "stock", stock_id)
    }

    async fn touch_stock(&self, stock_id: StockId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let done = sqlx::query("UPDATE stocks SET updated_at = $2 WHERE id = $1")
            .bind(stock_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        expect_one_row(done.rows_affected(), "stock", stock_id)
    }
}

#[async_trait]
impl LogStore for PgStore {
    async fn count_logs(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM logs")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn count_logs_at_level(&self, level: LogLevel) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM logs WHERE level = $1")
            .bind(level.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn delete_oldest_log(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM logs WHERE id = (SELECT MIN(id) FROM logs)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_log(&self, entry: &NewLogEntry) -> Result<LogEntry, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO logs ("timestamp", level, message, stock_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id, "timestamp", level, message, stock_id
            "#,
        )
        .bind(entry.timestamp)
        .bind(entry.level.as_str())
        .bind(&entry.message)
        .bind(entry.stock_id)
        .fetch_one(&self.pool)
        .await?;
        log_from_row(&row)
    }

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new(
            r#"SELECT id, "timestamp", level, message, stock_id FROM logs WHERE TRUE"#,
        );
        if let Some(level) = filter.level {
            qb.push(" AND level = ").push_bind(level.as_str());
        }
        if let Some(stock_id) = filter.stock_id {
            qb.push(" AND stock_id = ").push_bind(stock_id);
        }
        qb.push(" ORDER BY id DESC LIMIT ")
            .push_bind(filter.limit as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(log_from_row).collect()
    }
}
