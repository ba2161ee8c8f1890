//! Store connection configuration.
//!
//! Settings come from `REDIS_*` environment variables. Connection parameters
//! have no silent defaults: a missing value fails construction immediately.
//!
//! | Variable                         | Required | Default |
//! |----------------------------------|----------|---------|
//! | `REDIS_HOST`                     | yes      |         |
//! | `REDIS_PORT`                     | yes      |         |
//! | `REDIS_PASSWORD` (may be empty)  | yes      |         |
//! | `REDIS_DB`                       | yes      |         |
//! | `REDIS_KEY_PREFIX`               | yes      |         |
//! | `REDIS_READY_CHECK`              | yes      |         |
//! | `REDIS_MAX_RETRIES_PER_REQUEST`  | yes      |         |
//! | `REDIS_POOL_SIZE`                | no       | 10      |
//! | `REDIS_TIMEOUT_MS`               | no       | 5000    |

use std::fmt;
use std::time::Duration;

use config::{Config, Environment};
use serde::Deserialize;

use crate::error::ConfigError;

/// Environment variable prefix for store settings.
pub const ENV_PREFIX: &str = "REDIS";

/// Validated store settings.
#[derive(Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    /// Empty means the store does not require AUTH.
    pub password: String,
    pub db: u32,
    pub key_prefix: String,
    /// PING the store before `connect` returns.
    pub ready_check: bool,
    /// Reconnect attempts for a single command before the error surfaces.
    pub max_retries_per_request: u32,
    pub pool_size: usize,
    pub timeout_ms: u64,
}

/// Raw settings as read from the environment, before validation.
#[derive(Debug, Default, Deserialize)]
struct RawStoreSettings {
    host: Option<String>,
    port: Option<u16>,
    password: Option<String>,
    db: Option<u32>,
    key_prefix: Option<String>,
    ready_check: Option<bool>,
    max_retries_per_request: Option<u32>,
    pool_size: Option<usize>,
    timeout_ms: Option<u64>,
}

fn default_pool_size() -> usize {
    10
}

fn default_timeout_ms() -> u64 {
    5000
}

impl StoreConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_environment(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
    }

    /// Load from an explicit variable map (keys are full names, e.g. `REDIS_HOST`).
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: config::Map<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::from_environment(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .source(Some(map)),
        )
    }

    fn from_environment(env: Environment) -> Result<Self, ConfigError> {
        let raw: RawStoreSettings = Config::builder()
            .add_source(env)
            .build()?
            .try_deserialize()?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawStoreSettings) -> Result<Self, ConfigError> {
        let host = raw.host.ok_or(ConfigError::Missing("REDIS_HOST"))?;
        if host.trim().is_empty() {
            return Err(ConfigError::invalid("REDIS_HOST", "must not be empty"));
        }
        let port = raw.port.ok_or(ConfigError::Missing("REDIS_PORT"))?;
        if port == 0 {
            return Err(ConfigError::invalid("REDIS_PORT", "must be non-zero"));
        }
        let password = raw.password.ok_or(ConfigError::Missing("REDIS_PASSWORD"))?;
        let db = raw.db.ok_or(ConfigError::Missing("REDIS_DB"))?;
        let key_prefix = raw
            .key_prefix
            .ok_or(ConfigError::Missing("REDIS_KEY_PREFIX"))?;
        if key_prefix.is_empty() {
            return Err(ConfigError::invalid("REDIS_KEY_PREFIX", "must not be empty"));
        }
        let ready_check = raw
            .ready_check
            .ok_or(ConfigError::Missing("REDIS_READY_CHECK"))?;
        let max_retries_per_request = raw
            .max_retries_per_request
            .ok_or(ConfigError::Missing("REDIS_MAX_RETRIES_PER_REQUEST"))?;

        let pool_size = raw.pool_size.unwrap_or_else(default_pool_size);
        if pool_size == 0 {
            return Err(ConfigError::invalid("REDIS_POOL_SIZE", "must be at least 1"));
        }

        Ok(Self {
            host,
            port,
            password,
            db,
            key_prefix,
            ready_check,
            max_retries_per_request,
            pool_size,
            timeout_ms: raw.timeout_ms.unwrap_or_else(default_timeout_ms),
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// `host:port/db`, safe to log.
    pub fn display_addr(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.db)
    }

    pub(crate) fn connection_info(&self) -> redis::ConnectionInfo {
        redis::ConnectionInfo {
            addr: redis::ConnectionAddr::Tcp(self.host.clone(), self.port),
            redis: redis::RedisConnectionInfo {
                db: i64::from(self.db),
                password: (!self.password.is_empty()).then(|| self.password.clone()),
                ..Default::default()
            },
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .field("db", &self.db)
            .field("key_prefix", &self.key_prefix)
            .field("ready_check", &self.ready_check)
            .field("max_retries_per_request", &self.max_retries_per_request)
            .field("pool_size", &self.pool_size)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}
