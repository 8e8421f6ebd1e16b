//! Server configuration.
//!
//! All settings come from environment variables:
//! - `HOST` / `PORT` - bind address (default `127.0.0.1:8000`)
//! - `STORAGE_MODE` - `sqlite` (default) or `memory`
//! - `DATABASE_PATH` - SQLite database file (default `todos.db`)
//! - `RECONCILE_INTERVAL_SECS` - period of the background expiry pass (default 60)
//! - `REQUEST_RECONCILE_THROTTLE_SECS` - minimum gap between request-triggered
//!   passes; 0 runs one on every request (default 0)
//! - `LISTENER_BUFFER` - queued messages per real-time listener (default 256)
//! - `LISTENER_SEND_TIMEOUT_MS` - how long a full listener queue is waited on
//!   before the listener is dropped (default 5000)

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Where todos are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageMode {
    Memory,
    Sqlite(PathBuf),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub storage: StorageMode,
    /// Period of the background expiry pass.
    pub reconcile_interval: Duration,
    /// Minimum gap between passes triggered by the request interceptor.
    pub request_reconcile_throttle: Duration,
    /// Capacity of each real-time listener's queue.
    pub listener_buffer: usize,
    pub listener_send_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            storage: StorageMode::Sqlite(PathBuf::from("todos.db")),
            reconcile_interval: Duration::from_secs(60),
            request_reconcile_throttle: Duration::ZERO,
            listener_buffer: 256,
            listener_send_timeout: Duration::from_millis(5000),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let host = get("HOST").unwrap_or(defaults.host);
        let port = match get("PORT") {
            Some(value) => parse_number::<u16>("PORT", &value)?,
            None => defaults.port,
        };

        let storage = match get("STORAGE_MODE").as_deref() {
            None | Some("sqlite") => {
                StorageMode::Sqlite(get("DATABASE_PATH").map(PathBuf::from).unwrap_or_else(|| {
                    PathBuf::from("todos.db")
                }))
            }
            Some("memory") => StorageMode::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "STORAGE_MODE",
                    value: other.to_string(),
                    reason: "expected `sqlite` or `memory`".to_string(),
                })
            }
        };

        let reconcile_interval = match get("RECONCILE_INTERVAL_SECS") {
            Some(value) => {
                let secs = parse_number::<u64>("RECONCILE_INTERVAL_SECS", &value)?;
                if secs == 0 {
                    return Err(ConfigError::Invalid {
                        var: "RECONCILE_INTERVAL_SECS",
                        value,
                        reason: "must be greater than zero".to_string(),
                    });
                }
                Duration::from_secs(secs)
            }
            None => defaults.reconcile_interval,
        };

        let request_reconcile_throttle = match get("REQUEST_RECONCILE_THROTTLE_SECS") {
            Some(value) => Duration::from_secs(parse_number::<u64>(
                "REQUEST_RECONCILE_THROTTLE_SECS",
                &value,
            )?),
            None => defaults.request_reconcile_throttle,
        };

        let listener_buffer = match get("LISTENER_BUFFER") {
            Some(value) => {
                let size = parse_number::<usize>("LISTENER_BUFFER", &value)?;
                if size == 0 {
                    return Err(ConfigError::Invalid {
                        var: "LISTENER_BUFFER",
                        value,
                        reason: "must be greater than zero".to_string(),
                    });
                }
                size
            }
            None => defaults.listener_buffer,
        };

        let listener_send_timeout = match get("LISTENER_SEND_TIMEOUT_MS") {
            Some(value) => {
                let millis = parse_number::<u64>("LISTENER_SEND_TIMEOUT_MS", &value)?;
                if millis == 0 {
                    return Err(ConfigError::Invalid {
                        var: "LISTENER_SEND_TIMEOUT_MS",
                        value,
                        reason: "must be greater than zero".to_string(),
                    });
                }
                Duration::from_millis(millis)
            }
            None => defaults.listener_send_timeout,
        };

        Ok(Self {
            host,
            port,
            storage,
            reconcile_interval,
            request_reconcile_throttle,
            listener_buffer,
            listener_send_timeout,
        })
    }
}

fn parse_number<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}
