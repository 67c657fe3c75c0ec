//! Configuration loading from the process environment.
//!
//! | variable | default |
//! |----------|---------|
//! | `DATABASE_URL` | unset (in-memory log) |
//! | `COMMITLOG_PAGE_SIZE` | 256 |
//! | `COMMITLOG_POLL_INTERVAL_MS` | 1000 |
//! | `COMMITLOG_RETRY_BACKOFF_MS` | 500 |
//! | `COMMITLOG_MAX_CONNECTIONS` | 5 |

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::event_store::DEFAULT_PAGE_SIZE;
use crate::subscription::SubscriptionConfig;

pub const DATABASE_URL: &str = "DATABASE_URL";
pub const PAGE_SIZE: &str = "COMMITLOG_PAGE_SIZE";
pub const POLL_INTERVAL_MS: &str = "COMMITLOG_POLL_INTERVAL_MS";
pub const RETRY_BACKOFF_MS: &str = "COMMITLOG_RETRY_BACKOFF_MS";
pub const MAX_CONNECTIONS: &str = "COMMITLOG_MAX_CONNECTIONS";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a positive integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("{0} must be set")]
    Missing(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitLogConfig {
    pub database_url: Option<String>,
    pub page_size: usize,
    pub poll_interval: Duration,
    pub retry_backoff: Duration,
    pub max_connections: u32,
}

impl Default for CommitLogConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            page_size: DEFAULT_PAGE_SIZE,
            poll_interval: Duration::from_millis(1000),
            retry_backoff: Duration::from_millis(500),
            max_connections: 5,
        }
    }
}

impl CommitLogConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source; unset or blank values keep
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            database_url: get(DATABASE_URL),
            page_size: parse(PAGE_SIZE, get(PAGE_SIZE))?.unwrap_or(defaults.page_size),
            poll_interval: parse(POLL_INTERVAL_MS, get(POLL_INTERVAL_MS))?
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            retry_backoff: parse(RETRY_BACKOFF_MS, get(RETRY_BACKOFF_MS))?
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_backoff),
            max_connections: parse(MAX_CONNECTIONS, get(MAX_CONNECTIONS))?
                .unwrap_or(defaults.max_connections),
        })
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::Missing(DATABASE_URL))
    }

    pub fn subscription(&self) -> SubscriptionConfig {
        SubscriptionConfig {
            page_size: self.page_size,
            poll_interval: self.poll_interval,
            retry_backoff: self.retry_backoff,
        }
    }
}

fn parse<T>(name: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: FromStr + PartialEq + Default,
{
    let Some(raw) = raw else {
        return Ok(None);
    };
    match raw.trim().parse::<T>() {
        Ok(value) if value != T::default() => Ok(Some(value)),
        _ => Err(ConfigError::InvalidNumber { name, value: raw }),
    }
}
