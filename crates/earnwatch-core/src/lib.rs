//! Core domain model for earnwatch: tracked stocks, their earnings dates and
//! diagnostic log entries, plus the pure normalize/reconcile steps.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod normalize;
pub mod reconcile;

pub use normalize::{normalize_token, normalize_tokens, NormalizeError, NormalizedBatch};
pub use reconcile::{reconcile, Delta};

pub const CRATE_NAME: &str = "earnwatch-core";

/// Capacity shared by both diagnostic log sinks.
pub const LOG_CAPACITY: usize = 1000;

pub type StockId = i64;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown {kind} value {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Exchange {
    Nyse,
    Nasdaq,
    Tsx,
}

impl Exchange {
    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::Nyse => "NYSE",
            Exchange::Nasdaq => "NASDAQ",
            Exchange::Tsx => "TSX",
        }
    }
}

impl FromStr for Exchange {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NYSE" => Ok(Exchange::Nyse),
            "NASDAQ" => Ok(Exchange::Nasdaq),
            "TSX" => Ok(Exchange::Tsx),
            _ => Err(UnknownVariant {
                kind: "exchange",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked equity. Seeded externally; the scraper only refreshes its label,
/// activity flag and `updated_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stock {
    pub id: StockId,
    pub ticker: String,
    pub company_name: String,
    pub exchange: Exchange,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One persisted earnings instant for a stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarningsDate {
    pub id: i64,
    pub stock_id: StockId,
    pub earnings_datetime: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
        }
    }
}

impl FromStr for LogLevel {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            "FATAL" => Ok(LogLevel::Fatal),
            _ => Err(UnknownVariant {
                kind: "log level",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A log entry as handed to a sink, before the sink assigns an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLogEntry {
    pub level: LogLevel,
    pub message: String,
    /// Lookup-only back-reference; the stock may be gone by the time anyone reads it.
    pub stock_id: Option<StockId>,
    pub timestamp: DateTime<Utc>,
}

impl NewLogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>, stock_id: Option<StockId>) -> Self {
        Self {
            level,
            message: message.into(),
            stock_id,
            timestamp: Utc::now(),
        }
    }

    /// Renders the entry as one line of the local log file.
    pub fn to_line(&self) -> String {
        let entity_ref = self
            .stock_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "nil".to_string());
        format!("[{}] {} (entity_ref: {})", self.level, self.message, entity_ref)
    }
}

/// A persisted log row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub level: LogLevel,
    pub message: String,
    pub stock_id: Option<StockId>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered_by_severity() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
        assert!(LogLevel::Error < LogLevel::Fatal);
    }

    #[test]
    fn level_text_round_trips_through_storage_form() {
        for level in [
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warn,
            LogLevel::Error,
            LogLevel::Fatal,
        ] {
            assert_eq!(level.as_str().parse::<LogLevel>(), Ok(level));
        }
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn exchange_parse_is_case_insensitive() {
        assert_eq!("nasdaq".parse::<Exchange>(), Ok(Exchange::Nasdaq));
        assert_eq!(" TSX ".parse::<Exchange>(), Ok(Exchange::Tsx));
        assert!("LSE".parse::<Exchange>().is_err());
    }

    #[test]
    fn local_line_format_includes_entity_ref_or_nil() {
        let with_ref = NewLogEntry::new(LogLevel::Warn, "label missing", Some(42));
        assert_eq!(with_ref.to_line(), "[WARN] label missing (entity_ref: 42)");

        let without_ref = NewLogEntry::new(LogLevel::Info, "starting", None);
        assert_eq!(without_ref.to_line(), "[INFO] starting (entity_ref: nil)");
    }
}
