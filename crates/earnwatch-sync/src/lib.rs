//! Scrape cycle orchestration and the service loop that drives it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use earnwatch_adapters::YahooEarningsSource;
use earnwatch_core::{LogLevel, NewLogEntry, LOG_CAPACITY};
use earnwatch_storage::{DbLogSink, HttpClientConfig, HttpFetcher, LocalLogFile, PgStore};
use tracing::{error, info};

pub mod config;
pub mod cycle;
pub mod diagnostics;
pub mod schedule;

pub use config::{load_dotenv, load_dotenv_from, ConfigError, DatabaseSettings, SyncConfig};
pub use cycle::{
    apply_delta, ApplyOutcome, CycleAbort, CycleOutcome, CycleReport, CycleRunner, CycleState,
    Operation, OperationFailure, ERROR_LOG_THRESHOLD,
};
pub use diagnostics::DiagnosticLog;
pub use schedule::{ConnectivityCheck, DnsCheck, Service, TickOutcome};

pub const CRATE_NAME: &str = "earnwatch-sync";

/// Starts the long-running scraper: config and database first, then one
/// cycle per scheduled tick until Ctrl-C.
pub async fn run_service_from_env(debug: bool) -> anyhow::Result<()> {
    // Before anything reads the environment, so `.env` can set the log path too.
    let dotenv = config::load_dotenv();
    let log_path = SyncConfig::log_file_from_env();
    let mut local = LocalLogFile::open(&log_path, LOG_CAPACITY)
        .with_context(|| format!("opening local log {}", log_path.display()))?;
    local_or_trace(&mut local, LogLevel::Info, "Earnings scraper initialized...".to_string());

    match dotenv {
        Ok(Some(path)) => info!(path = %path.display(), "loaded .env"),
        Ok(None) => {}
        Err(err) => {
            local_or_trace(
                &mut local,
                LogLevel::Fatal,
                format!("Could not load .env file: {err}"),
            );
            return Err(err).context("loading .env");
        }
    }

    let config = match SyncConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            local_or_trace(
                &mut local,
                LogLevel::Fatal,
                format!("Could not load configuration: {err}"),
            );
            return Err(err).context("loading configuration");
        }
    };
    info!(database = ?config.database, schedule = %config.schedule, "configuration loaded");

    let store = match connect(&config).await {
        Ok(store) => Arc::new(store),
        Err(err) => {
            local_or_trace(
                &mut local,
                LogLevel::Fatal,
                format!("Could not connect to the database: {err:#}"),
            );
            return Err(err);
        }
    };

    let http = HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_secs(config.http_timeout_secs),
        ..Default::default()
    })?;
    let source = Arc::new(YahooEarningsSource::new(http));
    let log = DiagnosticLog::new(DbLogSink::new(Arc::clone(&store), LOG_CAPACITY), local);
    let runner = CycleRunner::new(store, source, log);
    let connectivity = Arc::new(DnsCheck::new(config.connectivity_host.clone()));

    Service::new(runner, connectivity, debug)
        .run_forever(&config.schedule)
        .await
}

async fn connect(config: &SyncConfig) -> anyhow::Result<PgStore> {
    let store = PgStore::connect(config.database.connect_options())
        .await
        .context("connecting to postgres")?;
    store.migrate().await.context("running migrations")?;
    Ok(store)
}

fn local_or_trace(local: &mut LocalLogFile, level: LogLevel, message: String) {
    let entry = NewLogEntry::new(level, message, None);
    if let Err(err) = local.write(&entry) {
        error!(error = %err, line = %entry.to_line(), "local log write failed");
    }
}
