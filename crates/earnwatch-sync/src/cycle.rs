//! One scrape-and-reconcile cycle for the least recently refreshed stock.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use earnwatch_adapters::{EarningsPageSource, FetchError};
use earnwatch_core::{normalize_tokens, reconcile, Delta, EarningsDate, LogLevel, Stock, StockId};
use earnwatch_storage::{EarningsStore, HttpError, LogStore, StoreError};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

use crate::diagnostics::DiagnosticLog;

/// A cycle refuses to run while the persistent sink holds this many Error rows.
pub const ERROR_LOG_THRESHOLD: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Start,
    FetchedEntity,
    FetchedPage,
    Parsed,
    Reconciled,
    Finalized,
    Aborted,
}

impl CycleState {
    fn advance(&mut self, next: CycleState) {
        debug!(from = ?*self, to = ?next, "cycle state");
        *self = next;
    }
}

#[derive(Debug, Error)]
pub enum CycleAbort {
    #[error("Could not count errors in the logs table: {0}")]
    ErrorCountUnavailable(#[source] StoreError),
    #[error("Too many error logs exist in the logs table ({count}). Exiting until next time")]
    TooManyErrors { count: i64 },
    #[error("Could not find an active stock: {0}")]
    StorageUnavailable(#[source] StoreError),
    #[error("No active stock found")]
    NoActiveEntity,
    #[error("Could not execute the request for {ticker}: {source}")]
    Request {
        ticker: String,
        #[source]
        source: HttpError,
    },
    #[error("Yahoo returned non-success status {status} for {ticker}")]
    HttpStatus { ticker: String, status: u16 },
    #[error("Could not create new document for {ticker}: {reason}")]
    Document { ticker: String, reason: String },
    #[error("Could not find company name. Marked as inactive: {ticker}")]
    UnresolvedLabel { ticker: String },
    #[error("Could not find earnings dates for ticker: {ticker}")]
    NoDateTokens { ticker: String },
    #[error("Could not read stored earnings dates for stock {stock_id}: {source}")]
    PersistedSetUnavailable {
        stock_id: StockId,
        #[source]
        source: StoreError,
    },
}

impl CycleAbort {
    pub fn level(&self) -> LogLevel {
        match self {
            CycleAbort::ErrorCountUnavailable(_)
            | CycleAbort::StorageUnavailable(_)
            | CycleAbort::NoActiveEntity => LogLevel::Fatal,
            CycleAbort::UnresolvedLabel { .. } => LogLevel::Warn,
            CycleAbort::TooManyErrors { .. }
            | CycleAbort::Request { .. }
            | CycleAbort::HttpStatus { .. }
            | CycleAbort::Document { .. }
            | CycleAbort::NoDateTokens { .. }
            | CycleAbort::PersistedSetUnavailable { .. } => LogLevel::Error,
        }
    }

    /// Breaker aborts stay out of the persistent sink; an Error row there
    /// would keep the breaker tripped.
    pub fn persists(&self) -> bool {
        !matches!(
            self,
            CycleAbort::TooManyErrors { .. } | CycleAbort::ErrorCountUnavailable(_)
        )
    }

    fn from_fetch(ticker: &str, err: FetchError) -> Self {
        let ticker = ticker.to_string();
        match err {
            FetchError::Http(HttpError::HttpStatus { status, .. }) => {
                CycleAbort::HttpStatus { ticker, status }
            }
            FetchError::Http(source) => CycleAbort::Request { ticker, source },
            FetchError::Document(reason) => CycleAbort::Document { ticker, reason },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub run_id: Uuid,
    pub stock_id: StockId,
    pub ticker: String,
    pub company_name: String,
    pub added: usize,
    pub removed: usize,
    pub failed_operations: usize,
    pub parse_failures: usize,
}

#[derive(Debug)]
pub enum CycleOutcome {
    Aborted(CycleAbort),
    Completed(CycleReport),
    PartiallyFailed(CycleReport),
}

impl CycleOutcome {
    pub fn report(&self) -> Option<&CycleReport> {
        match self {
            CycleOutcome::Completed(report) | CycleOutcome::PartiallyFailed(report) => Some(report),
            CycleOutcome::Aborted(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Delete,
    Insert,
}

#[derive(Debug)]
pub struct OperationFailure {
    pub op: Operation,
    pub at: DateTime<Utc>,
    pub error: StoreError,
}

#[derive(Debug, Default)]
pub struct ApplyOutcome {
    pub added: usize,
    pub removed: usize,
    pub failures: Vec<OperationFailure>,
}

impl ApplyOutcome {
    pub fn failed(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Applies a delta one row at a time: every delete first, then every insert.
/// A failing operation is recorded and the rest of the batch still runs.
pub async fn apply_delta<S>(
    store: &S,
    stock_id: StockId,
    persisted: &[EarningsDate],
    delta: &Delta,
) -> ApplyOutcome
where
    S: EarningsStore + ?Sized,
{
    let mut outcome = ApplyOutcome::default();

    for at in &delta.to_delete {
        for row in persisted.iter().filter(|r| r.earnings_datetime == *at) {
            match store.delete_earnings_date(row.id).await {
                Ok(()) => outcome.removed += 1,
                Err(error) => outcome.failures.push(OperationFailure {
                    op: Operation::Delete,
                    at: *at,
                    error,
                }),
            }
        }
    }

    for at in &delta.to_insert {
        match store.insert_earnings_date(stock_id, *at).await {
            Ok(_) => outcome.added += 1,
            Err(error) => outcome.failures.push(OperationFailure {
                op: Operation::Insert,
                at: *at,
                error,
            }),
        }
    }

    outcome
}

pub struct CycleRunner<S, F> {
    store: Arc<S>,
    source: Arc<F>,
    log: DiagnosticLog<S>,
}

impl<S, F> CycleRunner<S, F>
where
    S: EarningsStore + LogStore,
    F: EarningsPageSource,
{
    pub fn new(store: Arc<S>, source: Arc<F>, log: DiagnosticLog<S>) -> Self {
        Self { store, source, log }
    }

    pub fn log(&self) -> &DiagnosticLog<S> {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut DiagnosticLog<S> {
        &mut self.log
    }

    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let run_id = Uuid::new_v4();
        let span = info_span!("cycle", %run_id);
        self.run_cycle_inner(run_id).instrument(span).await
    }

    async fn run_cycle_inner(&mut self, run_id: Uuid) -> CycleOutcome {
        let mut state = CycleState::Start;
        self.log
            .record_local(LogLevel::Info, "Starting earnings date scraping...", None);

        match self.log.db().count_at_level(LogLevel::Error).await {
            Ok(count) if count >= ERROR_LOG_THRESHOLD => {
                return self
                    .abort(&mut state, CycleAbort::TooManyErrors { count }, None)
                    .await;
            }
            Ok(_) => {}
            Err(err) => {
                return self
                    .abort(&mut state, CycleAbort::ErrorCountUnavailable(err), None)
                    .await;
            }
        }

        let stock = match self.store.next_active_stock().await {
            Ok(Some(stock)) => stock,
            Ok(None) => return self.abort(&mut state, CycleAbort::NoActiveEntity, None).await,
            Err(err) => {
                return self
                    .abort(&mut state, CycleAbort::StorageUnavailable(err), None)
                    .await;
            }
        };
        state.advance(CycleState::FetchedEntity);
        debug!(stock_id = stock.id, ticker = %stock.ticker, "selected stock");

        let page = match self.source.fetch(&stock.ticker).await {
            Ok(page) => page,
            Err(err) => {
                let abort = CycleAbort::from_fetch(&stock.ticker, err);
                return self.abort(&mut state, abort, Some(stock.id)).await;
            }
        };
        state.advance(CycleState::FetchedPage);

        if !page.has_label() {
            if let Err(err) = self.store.set_stock_active(stock.id, false).await {
                self.log
                    .record(
                        LogLevel::Error,
                        format!("Could not mark stock as inactive: {err}"),
                        Some(stock.id),
                    )
                    .await;
            }
            let abort = CycleAbort::UnresolvedLabel {
                ticker: stock.ticker.clone(),
            };
            return self.abort(&mut state, abort, Some(stock.id)).await;
        }
        let company_name = page.company_name.trim().to_string();

        if page.date_tokens.is_empty() {
            let abort = CycleAbort::NoDateTokens {
                ticker: stock.ticker.clone(),
            };
            return self.abort(&mut state, abort, Some(stock.id)).await;
        }

        let batch = normalize_tokens(&page.date_tokens);
        for (token, err) in &batch.failures {
            self.log
                .record(
                    LogLevel::Error,
                    format!("Error parsing earnings date {token:?}: {err}"),
                    Some(stock.id),
                )
                .await;
        }
        state.advance(CycleState::Parsed);

        let persisted_rows = match self.store.earnings_dates(stock.id).await {
            Ok(rows) => rows,
            Err(source) => {
                let abort = CycleAbort::PersistedSetUnavailable {
                    stock_id: stock.id,
                    source,
                };
                return self.abort(&mut state, abort, Some(stock.id)).await;
            }
        };
        let persisted: BTreeSet<DateTime<Utc>> =
            persisted_rows.iter().map(|r| r.earnings_datetime).collect();

        if batch.instants.is_empty() && !persisted.is_empty() {
            warn!(
                stock_id = stock.id,
                tokens = page.date_tokens.len(),
                persisted = persisted.len(),
                "no date token normalized; every stored date will be removed"
            );
        }

        let delta = reconcile(&persisted, &batch.instants);
        let applied = apply_delta(self.store.as_ref(), stock.id, &persisted_rows, &delta).await;
        for failure in &applied.failures {
            let message = match failure.op {
                Operation::Delete => {
                    format!("Could not delete old earnings date {}: {}", failure.at, failure.error)
                }
                Operation::Insert => {
                    format!("Could not add new earnings date {}: {}", failure.at, failure.error)
                }
            };
            self.log.record(LogLevel::Error, message, Some(stock.id)).await;
        }
        state.advance(CycleState::Reconciled);

        self.finish(&mut state, run_id, &stock, company_name, batch.failures.len(), applied)
            .await
    }

    async fn finish(
        &mut self,
        state: &mut CycleState,
        run_id: Uuid,
        stock: &Stock,
        company_name: String,
        parse_failures: usize,
        applied: ApplyOutcome,
    ) -> CycleOutcome {
        if let Err(err) = self.store.update_company_name(stock.id, &company_name).await {
            self.log
                .record(
                    LogLevel::Error,
                    format!("Could not update company name: {err}"),
                    Some(stock.id),
                )
                .await;
        }

        let report = CycleReport {
            run_id,
            stock_id: stock.id,
            ticker: stock.ticker.clone(),
            company_name,
            added: applied.added,
            removed: applied.removed,
            failed_operations: applied.failures.len(),
            parse_failures,
        };

        if applied.failed() {
            self.log
                .record_everywhere(
                    LogLevel::Error,
                    "Something went wrong while updating earnings dates",
                    Some(stock.id),
                )
                .await;
            state.advance(CycleState::Finalized);
            return CycleOutcome::PartiallyFailed(report);
        }

        if let Err(err) = self.store.touch_stock(stock.id, Utc::now()).await {
            self.log
                .record(
                    LogLevel::Error,
                    format!("Could not update stock timestamp: {err}"),
                    Some(stock.id),
                )
                .await;
        }
        self.log
            .record(
                LogLevel::Info,
                "Earnings date scraping completed successfully",
                Some(stock.id),
            )
            .await;
        state.advance(CycleState::Finalized);
        CycleOutcome::Completed(report)
    }

    async fn abort(
        &mut self,
        state: &mut CycleState,
        abort: CycleAbort,
        stock_id: Option<StockId>,
    ) -> CycleOutcome {
        state.advance(CycleState::Aborted);
        let message = abort.to_string();
        if abort.persists() {
            self.log
                .record_everywhere(abort.level(), message, stock_id)
                .await;
        } else {
            self.log.record_local(abort.level(), message, stock_id);
        }
        CycleOutcome::Aborted(abort)
    }
}
