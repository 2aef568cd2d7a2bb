use std::fmt;
use std::path::{Path, PathBuf};

use earnwatch_storage::PgConnectOptions;
use thiserror::Error;

pub const DEFAULT_LOG_FILE: &str = "log.txt";
/// Six-field cron (with seconds): top of every minute.
pub const DEFAULT_SCHEDULE: &str = "0 * * * * *";
pub const DEFAULT_CONNECTIVITY_HOST: &str = "google.com:443";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("{var} is not a valid port: {value:?}")]
    InvalidPort { var: &'static str, value: String },
}

#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    pub host: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub port: u16,
}

impl DatabaseSettings {
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
    }
}

impl fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("port", &self.port)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database: DatabaseSettings,
    pub log_file: PathBuf,
    pub schedule: String,
    pub http_timeout_secs: u64,
    pub connectivity_host: String,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key/value source. The five database
    /// settings are required; everything else has a default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &'static str| lookup(key).ok_or(ConfigError::Missing(key));

        let host = required("DB_HOSTNAME")?;
        let user = required("DB_USERNAME")?;
        let password = required("DB_PASSWORD")?;
        let database = required("DB_DATABASE")?;
        let port_raw = required("DB_PORT")?;
        let port = port_raw
            .trim()
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort {
                var: "DB_PORT",
                value: port_raw.clone(),
            })?;

        Ok(Self {
            database: DatabaseSettings {
                host,
                user,
                password,
                database,
                port,
            },
            log_file: log_file_from(&lookup),
            schedule: lookup("EARNWATCH_SCHEDULE").unwrap_or_else(|| DEFAULT_SCHEDULE.to_string()),
            http_timeout_secs: lookup("EARNWATCH_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            connectivity_host: lookup("EARNWATCH_CONNECTIVITY_HOST")
                .unwrap_or_else(|| DEFAULT_CONNECTIVITY_HOST.to_string()),
        })
    }

    /// The local log path is needed before the rest of the config can be
    /// validated, so it is resolvable on its own.
    pub fn log_file_from_env() -> PathBuf {
        log_file_from(&|key: &str| std::env::var(key).ok())
    }
}

/// Loads `.env` from the working directory or one of its parents into the
/// process environment. Variables already set win. A missing file is not an
/// error; a malformed or unreadable one is.
pub fn load_dotenv() -> Result<Option<PathBuf>, dotenvy::Error> {
    settle_dotenv(dotenvy::dotenv())
}

pub fn load_dotenv_from(path: &Path) -> Result<Option<PathBuf>, dotenvy::Error> {
    settle_dotenv(dotenvy::from_path(path).map(|()| path.to_path_buf()))
}

fn settle_dotenv(
    result: Result<PathBuf, dotenvy::Error>,
) -> Result<Option<PathBuf>, dotenvy::Error> {
    match result {
        Ok(path) => Ok(Some(path)),
        Err(err) if err.not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

fn log_file_from(lookup: &dyn Fn(&str) -> Option<String>) -> PathBuf {
    lookup("EARNWATCH_LOG_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE))
}
