use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use osdr_core::BoolLocale;
use osdr_storage::{HttpClientConfig, DEFAULT_USER_AGENT};
use sqlx::postgres::PgConnectOptions;
use tracing::warn;

use crate::schedule::Schedule;

pub const DEFAULT_API_URL: &str =
    "https://visualization.osdr.nasa.gov/biodata/api/v2/datasets/?format=json";

#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl DatabaseConfig {
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .finish()
    }
}

/// Process configuration, read once at startup and passed to each component.
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub database: DatabaseConfig,
    pub staging_dir: PathBuf,
    pub period: Duration,
    pub initial_delay: Duration,
    pub http_timeout: Duration,
    pub bool_locale: BoolLocale,
}

impl ExporterConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let bool_locale = match lookup("OSDR_BOOL_LOCALE") {
            Some(name) => BoolLocale::from_name(&name).unwrap_or_else(|| {
                warn!(value = %name, "unknown OSDR_BOOL_LOCALE; using ru");
                BoolLocale::RUSSIAN
            }),
            None => BoolLocale::RUSSIAN,
        };

        Self {
            api_url: text("NASA_API_URL", DEFAULT_API_URL),
            api_key: lookup("NASA_API_KEY").filter(|key| !key.trim().is_empty()),
            database: DatabaseConfig {
                host: text("PGHOST", "db"),
                port: parsed(&lookup, "PGPORT", 5432),
                user: text("PGUSER", "postgres"),
                password: text("PGPASSWORD", "postgres"),
                database: text("PGDATABASE", "iss_osdr"),
            },
            staging_dir: PathBuf::from(text("CSV_OUT_DIR", "/data/csv")),
            period: Duration::from_secs(parsed(&lookup, "GEN_PERIOD_SEC", 300)),
            initial_delay: Duration::from_secs(parsed(&lookup, "INITIAL_DELAY_SEC", 10)),
            http_timeout: Duration::from_secs(parsed(&lookup, "OSDR_HTTP_TIMEOUT_SECS", 60)),
            bool_locale,
        }
    }

    pub fn schedule(&self) -> Schedule {
        Schedule {
            initial_delay: self.initial_delay,
            period: self.period,
        }
    }

    pub fn http_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: self.http_timeout,
            user_agent: Some(DEFAULT_USER_AGENT.to_string()),
            bearer_token: self.api_key.clone(),
        }
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + fmt::Display + Copy,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, default = %default, "invalid number in environment; using default");
            default
        }),
        None => default,
    }
}
