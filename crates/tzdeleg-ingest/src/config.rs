//! Daemon configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::engine::EngineConfig;
use crate::source::{RetryPolicy, TzktConfig};
use crate::{Error, Result};

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database file.
    pub database_path: PathBuf,

    /// TzKT API root.
    pub tzkt_api_url: String,

    /// Time between poll ticks.
    pub polling_interval: Duration,

    /// Run a historical backfill at startup.
    pub historical_indexing: bool,

    /// Backfill start on an empty store (UTC midnight).
    pub historical_start: DateTime<Utc>,

    /// Retries after the first attempt for transient source failures.
    pub max_retries: u32,

    /// Base delay between retries.
    pub retry_delay: Duration,

    /// Per-attempt HTTP timeout.
    pub request_timeout: Duration,

    /// Per-call store timeout.
    pub store_call_timeout: Duration,

    pub rate_limit_per_second: u32,
    pub rate_limit_burst: u32,

    /// Prometheus exporter port. `None` disables the exporter.
    pub metrics_port: Option<u16>,

    /// Shell command run after a productive backfill.
    pub backup_command: Option<String>,
}

fn var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| Error::Config(format!("{key}={raw:?}: {e}"))),
        None => Ok(default),
    }
}

/// Like [`parse_var`], but zero is rejected.
fn parse_nonzero<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr + Default + PartialEq,
    T::Err: std::fmt::Display,
{
    let value = parse_var(key, default)?;
    if value == T::default() {
        return Err(Error::Config(format!("{key} must be greater than zero")));
    }
    Ok(value)
}

fn parse_bool(key: &str, default: bool) -> Result<bool> {
    match var(key).map(|v| v.to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(Error::Config(format!("{key}={v:?}: expected a boolean"))),
        },
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// All variables are optional:
    /// - `DATABASE_PATH` (default: "./data/delegations.db")
    /// - `TZKT_API_URL` (default: "https://api.tzkt.io")
    /// - `POLLING_INTERVAL_SECS` (default: 30)
    /// - `HISTORICAL_INDEXING` (default: true)
    /// - `HISTORICAL_START_DATE`: YYYY-MM-DD (default: 2021-01-01)
    /// - `MAX_RETRIES` (default: 3)
    /// - `RETRY_DELAY_MS` (default: 5000)
    /// - `REQUEST_TIMEOUT_SECS` (default: 60)
    /// - `STORE_CALL_TIMEOUT_SECS` (default: 30)
    /// - `RATE_LIMIT_PER_SECOND` (default: 10)
    /// - `RATE_LIMIT_BURST` (default: 10)
    /// - `METRICS_PORT`: 0 disables (default: 9090)
    /// - `BACKUP_COMMAND` (default: unset)
    pub fn from_env() -> Result<Self> {
        let database_path = var("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/delegations.db"));

        let tzkt_api_url = var("TZKT_API_URL")
            .unwrap_or_else(|| "https://api.tzkt.io".to_string())
            .trim_end_matches('/')
            .to_string();
        if !tzkt_api_url.starts_with("http://") && !tzkt_api_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "TZKT_API_URL={tzkt_api_url:?}: expected an http(s) URL"
            )));
        }

        let polling_secs: u64 = parse_nonzero("POLLING_INTERVAL_SECS", 30)?;

        let start_date = var("HISTORICAL_START_DATE")
            .unwrap_or_else(|| tzdeleg_core::DEFAULT_HISTORICAL_START_DATE.to_string());
        let historical_start = tzdeleg_core::parse_start_date(&start_date)
            .map_err(|e| Error::Config(format!("HISTORICAL_START_DATE: {e}")))?;
        let genesis = tzdeleg_core::parse_start_date(tzdeleg_core::TEZOS_GENESIS_DATE)?;
        if historical_start < genesis {
            return Err(Error::Config(format!(
                "HISTORICAL_START_DATE={start_date} is before mainnet genesis ({})",
                tzdeleg_core::TEZOS_GENESIS_DATE
            )));
        }

        let metrics_port: u16 = parse_var("METRICS_PORT", 9090)?;

        let config = Self {
            database_path,
            tzkt_api_url,
            polling_interval: Duration::from_secs(polling_secs),
            historical_indexing: parse_bool("HISTORICAL_INDEXING", true)?,
            historical_start,
            max_retries: parse_var("MAX_RETRIES", 3)?,
            retry_delay: Duration::from_millis(parse_var("RETRY_DELAY_MS", 5000)?),
            request_timeout: Duration::from_secs(parse_nonzero("REQUEST_TIMEOUT_SECS", 60)?),
            store_call_timeout: Duration::from_secs(parse_nonzero("STORE_CALL_TIMEOUT_SECS", 30)?),
            rate_limit_per_second: parse_nonzero("RATE_LIMIT_PER_SECOND", 10)?,
            rate_limit_burst: parse_nonzero("RATE_LIMIT_BURST", 10)?,
            metrics_port: (metrics_port != 0).then_some(metrics_port),
            backup_command: var("BACKUP_COMMAND"),
        };

        tracing::info!(
            database_path = %config.database_path.display(),
            tzkt_api_url = %config.tzkt_api_url,
            polling_interval_secs = polling_secs,
            historical_indexing = config.historical_indexing,
            historical_start = %start_date,
            max_retries = config.max_retries,
            metrics_port = ?config.metrics_port,
            backup = config.backup_command.is_some(),
            "ingestion configuration loaded"
        );

        Ok(config)
    }

    /// Source client settings.
    pub fn tzkt_config(&self) -> TzktConfig {
        TzktConfig {
            base_url: self.tzkt_api_url.clone(),
            request_timeout: self.request_timeout,
            retry: RetryPolicy::new(self.max_retries, self.retry_delay),
            rate_limit_per_second: self.rate_limit_per_second,
            rate_limit_burst: self.rate_limit_burst,
        }
    }

    /// Engine settings; tuning knobs not exposed via env keep their defaults.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            historical_indexing: self.historical_indexing,
            historical_start: self.historical_start,
            poll_interval: self.polling_interval,
            backup_command: self.backup_command.clone(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize config tests that manipulate env vars.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "DATABASE_PATH",
        "TZKT_API_URL",
        "POLLING_INTERVAL_SECS",
        "HISTORICAL_INDEXING",
        "HISTORICAL_START_DATE",
        "MAX_RETRIES",
        "RETRY_DELAY_MS",
        "REQUEST_TIMEOUT_SECS",
        "STORE_CALL_TIMEOUT_SECS",
        "RATE_LIMIT_PER_SECOND",
        "RATE_LIMIT_BURST",
        "METRICS_PORT",
        "BACKUP_COMMAND",
    ];

    /// Run `f` with only `vars` set among the config keys.
    fn with_env_vars<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());

        let saved: Vec<_> = ENV_KEYS
            .iter()
            .map(|k| (*k, std::env::var(k).ok()))
            .collect();

        // SAFETY: Serialized by mutex; only test code touches these vars.
        unsafe {
            for k in ENV_KEYS {
                std::env::remove_var(k);
            }
            for (k, v) in vars {
                std::env::set_var(k, v);
            }
        }

        f();

        // SAFETY: Restoring original env state.
        unsafe {
            for (k, v) in &saved {
                match v {
                    Some(val) => std::env::set_var(k, val),
                    None => std::env::remove_var(k),
                }
            }
        }
    }

    #[test]
    fn config_defaults() {
        with_env_vars(&[], || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.database_path, PathBuf::from("./data/delegations.db"));
            assert_eq!(config.tzkt_api_url, "https://api.tzkt.io");
            assert_eq!(config.polling_interval, Duration::from_secs(30));
            assert!(config.historical_indexing);
            assert_eq!(
                config.historical_start.to_rfc3339(),
                "2021-01-01T00:00:00+00:00"
            );
            assert_eq!(config.max_retries, 3);
            assert_eq!(config.retry_delay, Duration::from_millis(5000));
            assert_eq!(config.request_timeout, Duration::from_secs(60));
            assert_eq!(config.store_call_timeout, Duration::from_secs(30));
            assert_eq!(config.rate_limit_per_second, 10);
            assert_eq!(config.rate_limit_burst, 10);
            assert_eq!(config.metrics_port, Some(9090));
            assert!(config.backup_command.is_none());
        });
    }

    #[test]
    fn config_overrides() {
        with_env_vars(
            &[
                ("DATABASE_PATH", "/var/lib/tzdeleg/store.db"),
                ("TZKT_API_URL", "https://api.ghostnet.tzkt.io/"),
                ("POLLING_INTERVAL_SECS", "5"),
                ("HISTORICAL_INDEXING", "false"),
                ("HISTORICAL_START_DATE", "2023-06-15"),
                ("MAX_RETRIES", "0"),
                ("RETRY_DELAY_MS", "250"),
                ("METRICS_PORT", "0"),
                ("BACKUP_COMMAND", "/app/backup.sh"),
            ],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.database_path, PathBuf::from("/var/lib/tzdeleg/store.db"));
                assert_eq!(config.tzkt_api_url, "https://api.ghostnet.tzkt.io");
                assert_eq!(config.polling_interval, Duration::from_secs(5));
                assert!(!config.historical_indexing);
                assert_eq!(
                    config.historical_start.to_rfc3339(),
                    "2023-06-15T00:00:00+00:00"
                );
                assert_eq!(config.max_retries, 0);
                assert_eq!(config.metrics_port, None);
                assert_eq!(config.backup_command.as_deref(), Some("/app/backup.sh"));

                let tzkt = config.tzkt_config();
                assert_eq!(tzkt.retry.wait, Duration::from_millis(250));
                assert_eq!(tzkt.retry.max_wait, Duration::from_millis(750));

                let engine = config.engine_config();
                assert!(!engine.historical_indexing);
                assert_eq!(engine.poll_interval, Duration::from_secs(5));
                assert_eq!(engine.poll_page_size, 100);
            },
        );
    }

    #[test]
    fn config_rejects_invalid_values() {
        for (key, value) in [
            ("POLLING_INTERVAL_SECS", "soon"),
            ("POLLING_INTERVAL_SECS", "0"),
            ("HISTORICAL_INDEXING", "maybe"),
            ("HISTORICAL_START_DATE", "2021-13-01"),
            ("HISTORICAL_START_DATE", "2017-01-01"),
            ("MAX_RETRIES", "-1"),
            ("REQUEST_TIMEOUT_SECS", "0"),
            ("STORE_CALL_TIMEOUT_SECS", "0"),
            ("RATE_LIMIT_PER_SECOND", "0"),
            ("RATE_LIMIT_BURST", "0"),
            ("METRICS_PORT", "70000"),
            ("TZKT_API_URL", "api.tzkt.io"),
        ] {
            with_env_vars(&[(key, value)], || {
                let err = Config::from_env().unwrap_err();
                assert!(matches!(err, Error::Config(_)), "{key}={value}: {err}");
            });
        }
    }

    #[test]
    fn config_blank_values_use_defaults() {
        with_env_vars(&[("MAX_RETRIES", "  "), ("BACKUP_COMMAND", "")], || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.max_retries, 3);
            assert!(config.backup_command.is_none());
        });
    }
}
