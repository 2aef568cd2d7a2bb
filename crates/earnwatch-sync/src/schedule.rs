//! Fixed-interval driver: one cycle per cron tick, never overlapping.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use earnwatch_adapters::EarningsPageSource;
use earnwatch_core::LogLevel;
use earnwatch_storage::{EarningsStore, LogStore};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::cycle::{CycleOutcome, CycleReport, CycleRunner};

#[async_trait]
pub trait ConnectivityCheck: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Online when a well-known host resolves.
#[derive(Debug, Clone)]
pub struct DnsCheck {
    host: String,
}

impl DnsCheck {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

#[async_trait]
impl ConnectivityCheck for DnsCheck {
    async fn is_online(&self) -> bool {
        match tokio::net::lookup_host(self.host.as_str()).await {
            Ok(mut addrs) => addrs.next().is_some(),
            Err(err) => {
                warn!(host = %self.host, error = %err, "connectivity check failed");
                false
            }
        }
    }
}

#[derive(Debug)]
pub enum TickOutcome {
    /// The previous cycle was still running.
    Busy,
    Offline,
    Ran(CycleOutcome),
}

pub struct Service<S, F> {
    runner: Arc<Mutex<CycleRunner<S, F>>>,
    connectivity: Arc<dyn ConnectivityCheck>,
    debug: bool,
}

impl<S, F> Clone for Service<S, F> {
    fn clone(&self) -> Self {
        Self {
            runner: Arc::clone(&self.runner),
            connectivity: Arc::clone(&self.connectivity),
            debug: self.debug,
        }
    }
}

impl<S, F> Service<S, F>
where
    S: EarningsStore + LogStore + 'static,
    F: EarningsPageSource + 'static,
{
    pub fn new(
        runner: CycleRunner<S, F>,
        connectivity: Arc<dyn ConnectivityCheck>,
        debug: bool,
    ) -> Self {
        Self {
            runner: Arc::new(Mutex::new(runner)),
            connectivity,
            debug,
        }
    }

    pub fn runner(&self) -> Arc<Mutex<CycleRunner<S, F>>> {
        Arc::clone(&self.runner)
    }

    /// Runs one cycle unless one is already in flight or the network is down.
    pub async fn tick(&self) -> TickOutcome {
        let Ok(mut runner) = self.runner.try_lock() else {
            warn!("previous cycle still running; skipping tick");
            return TickOutcome::Busy;
        };

        if !self.connectivity.is_online().await {
            runner
                .log_mut()
                .record_local(LogLevel::Fatal, "No network connection detected", None);
            return TickOutcome::Offline;
        }

        let outcome = runner.run_cycle().await;
        if let Some(report) = outcome.report() {
            match serde_json::to_string(report) {
                Ok(json) => info!(report = %json, "cycle finished"),
                Err(err) => warn!(error = %err, "could not serialize cycle report"),
            }
            if self.debug {
                print_report(report);
            }
        }
        TickOutcome::Ran(outcome)
    }

    pub async fn build_scheduler(&self, cron: &str) -> anyhow::Result<JobScheduler> {
        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let service = self.clone();
        let job = Job::new_async(cron, move |_uuid, _l| {
            let service = service.clone();
            Box::pin(async move {
                service.tick().await;
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        Ok(sched)
    }

    /// One cycle straight away, then one per cron tick until Ctrl-C.
    pub async fn run_forever(&self, cron: &str) -> anyhow::Result<()> {
        self.tick().await;

        let mut sched = self.build_scheduler(cron).await?;
        sched.start().await.context("starting scheduler")?;
        info!(cron, "scheduler started");

        tokio::signal::ctrl_c()
            .await
            .context("waiting for shutdown signal")?;
        info!("shutdown requested");
        sched.shutdown().await.context("stopping scheduler")?;
        Ok(())
    }
}

fn print_report(report: &CycleReport) {
    println!("{}", Utc::now());
    println!("Stock ID: {}", report.stock_id);
    println!("Ticker: {}", report.ticker);
    println!("Number of added earnings dates: {}", report.added);
    println!("Number of removed earnings dates: {}", report.removed);
    println!("-----------------------------------");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};

    use earnwatch_adapters::{FetchError, ScrapedPage};
    use earnwatch_core::{Exchange, Stock, LOG_CAPACITY};
    use earnwatch_storage::{DbLogSink, LocalLogFile, MemoryStore};
    use tempfile::tempdir;

    use crate::diagnostics::DiagnosticLog;

    struct FixedConnectivity(AtomicBool);

    #[async_trait]
    impl ConnectivityCheck for FixedConnectivity {
        async fn is_online(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    struct OneDate;

    #[async_trait]
    impl EarningsPageSource for OneDate {
        fn source_id(&self) -> &'static str {
            "one-date"
        }

        async fn fetch(&self, _ticker: &str) -> Result<ScrapedPage, FetchError> {
            Ok(ScrapedPage {
                company_name: "Acme Corporation".into(),
                date_tokens: vec!["Jul 03, 2024, 5 PMEDT".into()],
            })
        }
    }

    fn build(dir: &Path, online: bool) -> (Service<MemoryStore, OneDate>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store.seed_stock(Stock {
            id: 1,
            ticker: "ACME".into(),
            company_name: String::new(),
            exchange: Exchange::Nyse,
            is_active: true,
            created_at: now,
            updated_at: now,
        });
        let local = LocalLogFile::open(dir.join("log.txt"), LOG_CAPACITY).expect("open");
        let log = DiagnosticLog::new(DbLogSink::new(Arc::clone(&store), LOG_CAPACITY), local);
        let runner = CycleRunner::new(Arc::clone(&store), Arc::new(OneDate), log);
        let connectivity = Arc::new(FixedConnectivity(AtomicBool::new(online)));
        (Service::new(runner, connectivity, false), store)
    }

    #[tokio::test]
    async fn online_tick_runs_a_cycle() {
        let dir = tempdir().expect("tempdir");
        let (service, store) = build(dir.path(), true);

        let outcome = service.tick().await;

        assert!(matches!(outcome, TickOutcome::Ran(CycleOutcome::Completed(_))));
        assert_eq!(store.all_logs().len(), 1);
    }

    #[tokio::test]
    async fn offline_tick_is_skipped_and_noted_locally() {
        let dir = tempdir().expect("tempdir");
        let (service, store) = build(dir.path(), false);

        let outcome = service.tick().await;

        assert!(matches!(outcome, TickOutcome::Offline));
        assert!(store.all_logs().is_empty());
        let text = std::fs::read_to_string(dir.path().join("log.txt")).expect("read");
        assert_eq!(text, "[FATAL] No network connection detected (entity_ref: nil)\n");
    }

    #[tokio::test]
    async fn tick_while_a_cycle_holds_the_runner_is_skipped() {
        let dir = tempdir().expect("tempdir");
        let (service, store) = build(dir.path(), true);

        let runner = service.runner();
        let _guard = runner.lock().await;
        let outcome = service.tick().await;

        assert!(matches!(outcome, TickOutcome::Busy));
        assert!(store.all_logs().is_empty());
    }

    #[tokio::test]
    async fn dns_check_reports_unresolvable_hosts_offline() {
        let connectivity = DnsCheck::new("no-such-host.invalid:443");
        assert!(!connectivity.is_online().await);
    }
}
