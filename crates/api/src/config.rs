//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

/// Server and worker configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT` — `json` for JSON log lines, anything else for plain text
/// - `DATABASE_URL` — PostgreSQL connection string; unset runs everything in memory
/// - `CANCEL_GRACE_PERIOD_SECS` — unpaid order lifetime (default: `1800`)
/// - `CANCEL_WORKERS` — cancel queue consumers (default: `2`)
/// - `INGEST_WORKERS` — order queue consumers (default: `3`)
/// - `INGEST_MAX_RETRIES` — write retries before dead-lettering (default: `3`)
/// - `INGEST_RETRY_DELAY_MS` — wait before a failed write is retried (default: `5000`)
/// - `REMOTE_CALL_TIMEOUT_MS` — bound on each checkout step (default: `5000`)
/// - `BROKER_POLL_INTERVAL_MS` — idle poll interval of the Postgres broker (default: `500`)
/// - `SNOWFLAKE_NODE_ID` — node id embedded in generated ids (default: `1`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_json: bool,
    pub database_url: Option<String>,
    pub cancel_grace_period: Duration,
    pub cancel_workers: usize,
    pub ingest_workers: usize,
    pub ingest_max_retries: u32,
    pub ingest_retry_delay: Duration,
    pub remote_call_timeout: Duration,
    pub broker_poll_interval: Duration,
    pub snowflake_node_id: u16,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from any key lookup. Unparseable values fall
    /// back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_or(&lookup, "PORT", defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_json: lookup("LOG_FORMAT").is_some_and(|f| f.trim().eq_ignore_ascii_case("json")),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            cancel_grace_period: parsed("CANCEL_GRACE_PERIOD_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cancel_grace_period),
            cancel_workers: parse_or(&lookup, "CANCEL_WORKERS", defaults.cancel_workers),
            ingest_workers: parse_or(&lookup, "INGEST_WORKERS", defaults.ingest_workers),
            ingest_max_retries: parse_or(&lookup, "INGEST_MAX_RETRIES", defaults.ingest_max_retries),
            ingest_retry_delay: parsed("INGEST_RETRY_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.ingest_retry_delay),
            remote_call_timeout: parsed("REMOTE_CALL_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.remote_call_timeout),
            broker_poll_interval: parsed("BROKER_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.broker_poll_interval),
            snowflake_node_id: parse_or(&lookup, "SNOWFLAKE_NODE_ID", defaults.snowflake_node_id),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_json: false,
            database_url: None,
            cancel_grace_period: messaging::DEFAULT_GRACE_PERIOD,
            cancel_workers: 2,
            ingest_workers: 3,
            ingest_max_retries: messaging::DEFAULT_MAX_RETRIES,
            ingest_retry_delay: messaging::DEFAULT_RETRY_DELAY,
            remote_call_timeout: checkout::DEFAULT_CALL_TIMEOUT,
            broker_poll_interval: Duration::from_millis(500),
            snowflake_node_id: 1,
        }
    }
}
