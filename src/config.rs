use anyhow::{Context, Result, bail};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::session::{DEFAULT_COOKIE_NAME, SessionConfig};

/// Which backend stores the sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionBackend {
    /// Process-local map, lost on restart.
    Memory,
    /// The `sessions` table in PostgreSQL.
    Postgres,
    /// Redis keys plus two sorted-set indexes.
    Redis,
}

impl FromStr for SessionBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" => Ok(Self::Postgres),
            "redis" => Ok(Self::Redis),
            other => bail!("Unknown session store '{}' (expected memory, postgres or redis)", other),
        }
    }
}

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    /// The URL of the PostgreSQL database.
    pub database_url: String,
    /// The URL of the Redis server.
    pub redis_url: String,
    /// The address the server listens on.
    pub bind_addr: SocketAddr,
    /// Whether the app runs with production settings.
    pub production: bool,
    /// The backend used to store sessions.
    pub session_backend: SessionBackend,
    /// The session manager settings.
    pub session: SessionConfig,
    /// Minimum duration of a login or register response.
    pub auth_min_response: Duration,
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Creates a new `Config` reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let production = lookup("APP_ENV")
            .map(|value| value == "production")
            .unwrap_or(false);

        let cookie_secure = match lookup("SESSION_COOKIE_SECURE") {
            Some(value) => value
                .parse()
                .context("Invalid SESSION_COOKIE_SECURE (expected true or false)")?,
            None => production,
        };

        let session = SessionConfig {
            cookie_name: lookup("SESSION_COOKIE_NAME")
                .unwrap_or_else(|| DEFAULT_COOKIE_NAME.to_string()),
            gc_interval: seconds(&lookup, "SESSION_GC_INTERVAL_SECS", 30 * 60)?,
            idle_expiration: seconds(&lookup, "SESSION_IDLE_EXPIRATION_SECS", 60 * 60)?,
            absolute_expiration: seconds(&lookup, "SESSION_ABSOLUTE_EXPIRATION_SECS", 12 * 60 * 60)?,
            cookie_secure,
            store_timeout: millis(&lookup, "SESSION_STORE_TIMEOUT_MS", 5000)?,
        };

        if session.gc_interval.is_zero() {
            bail!("SESSION_GC_INTERVAL_SECS must be greater than zero");
        }

        if session.idle_expiration.is_zero() {
            bail!("SESSION_IDLE_EXPIRATION_SECS must be greater than zero");
        }

        if session.absolute_expiration.is_zero() {
            bail!("SESSION_ABSOLUTE_EXPIRATION_SECS must be greater than zero");
        }

        if production && !session.cookie_secure {
            bail!("SESSION_COOKIE_SECURE cannot be disabled in production");
        }

        Ok(Self {
            database_url: lookup("DATABASE_URL").context("DATABASE_URL must be set")?,
            redis_url: lookup("REDIS_URL")
                .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
            bind_addr: lookup("BIND_ADDR")
                .unwrap_or_else(|| "127.0.0.1:3000".to_string())
                .parse()
                .context("Invalid BIND_ADDR")?,
            production,
            session_backend: lookup("SESSION_STORE")
                .unwrap_or_else(|| "postgres".to_string())
                .parse()?,
            session,
            auth_min_response: millis(&lookup, "AUTH_MIN_RESPONSE_MS", 1000)?,
        })
    }
}

fn seconds(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<Duration> {
    number(lookup, key, default).map(Duration::from_secs)
}

fn millis(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<Duration> {
    number(lookup, key, default).map(Duration::from_millis)
}

fn number(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<u64> {
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}", key)),
        None => Ok(default),
    }
}
