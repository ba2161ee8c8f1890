//! The store client contract shared by every backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Remaining lifetime of a key, as reported by `TTL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// The key does not exist (`-2`).
    Missing,
    /// The key exists without an expiry (`-1`).
    Persistent,
    /// Seconds until expiry.
    Expires(u64),
}

impl KeyTtl {
    /// Decode the integer reply of `TTL`.
    pub fn from_reply(secs: i64) -> Self {
        match secs {
            -2 => Self::Missing,
            s if s < 0 => Self::Persistent,
            s => Self::Expires(s as u64),
        }
    }

    /// Encode back to the `TTL` integer convention.
    pub fn as_reply(&self) -> i64 {
        match self {
            Self::Missing => -2,
            Self::Persistent => -1,
            Self::Expires(s) => *s as i64,
        }
    }
}

/// A named server-side script executed with all-or-nothing visibility.
///
/// `name` identifies the script to backends that cannot run Lua.
///
/// A script is not replayed after a connection failure that may have hit it
/// mid-flight unless it is marked [`replayable`](Self::replayable).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomicScript {
    name: &'static str,
    source: &'static str,
    replayable: bool,
}

impl AtomicScript {
    pub const fn new(name: &'static str, source: &'static str) -> Self {
        Self {
            name,
            source,
            replayable: false,
        }
    }

    /// Mark the script as safe to apply twice.
    pub const fn replayable(self) -> Self {
        Self {
            replayable: true,
            ..self
        }
    }

    pub fn is_replayable(&self) -> bool {
        self.replayable
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn source(&self) -> &'static str {
        self.source
    }
}

/// Reply of a script invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptReply {
    Nil,
    Int(i64),
    Data(Vec<u8>),
    Array(Vec<ScriptReply>),
}

impl ScriptReply {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Data(bytes) => std::str::from_utf8(bytes).ok()?.parse().ok(),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[ScriptReply]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl redis::FromRedisValue for ScriptReply {
    fn from_redis_value(v: &redis::Value) -> redis::RedisResult<Self> {
        Ok(match v {
            redis::Value::Nil => Self::Nil,
            redis::Value::Int(i) => Self::Int(*i),
            redis::Value::BulkString(bytes) => Self::Data(bytes.clone()),
            redis::Value::SimpleString(s) => Self::Data(s.clone().into_bytes()),
            redis::Value::Okay => Self::Data(b"OK".to_vec()),
            redis::Value::Boolean(b) => Self::Int(i64::from(*b)),
            redis::Value::Array(items) | redis::Value::Set(items) => Self::Array(
                items
                    .iter()
                    .map(Self::from_redis_value)
                    .collect::<redis::RedisResult<_>>()?,
            ),
            other => {
                return Err(redis::RedisError::from((
                    redis::ErrorKind::TypeError,
                    "unsupported script reply",
                    format!("{other:?}"),
                )));
            }
        })
    }
}

/// Operational surface of the shared key-value store.
///
/// Implementations must be cheap to clone behind an `Arc` and safe to share
/// across tasks. Connection-level failures surface as `Err`; callers decide
/// whether to swallow them.
#[async_trait]
pub trait KvStore: Send + Sync {
    // ==================== Scalar Operations ====================

    /// `SET key value [EX ttl]`.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<()>;

    /// `SET key value NX PX ttl`. Returns `true` if the key was written.
    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<bool>;

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Delete keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> StoreResult<u64>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Set a relative expiry. Returns `false` if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl>;

    async fn incr_by(&self, key: &str, delta: i64) -> StoreResult<i64>;

    /// Full keyspace scan for a glob, batching by `count`.
    async fn scan_match(&self, pattern: &str, count: usize) -> StoreResult<Vec<String>>;

    // ==================== Hashes ====================

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StoreResult<()>;

    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>>;

    async fn hash_delete(&self, key: &str, fields: &[String]) -> StoreResult<u64>;

    async fn hash_get_all(&self, key: &str) -> StoreResult<Vec<(String, String)>>;

    // ==================== Lists ====================

    /// `RPUSH`, returning the new length.
    async fn list_push(&self, key: &str, values: &[String]) -> StoreResult<u64>;

    /// `LPOP` a single element.
    async fn list_pop(&self, key: &str) -> StoreResult<Option<String>>;

    /// `LRANGE key start stop` with inclusive, possibly negative, indices.
    async fn list_range(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>>;

    // ==================== Sets ====================

    async fn set_add(&self, key: &str, members: &[String]) -> StoreResult<u64>;

    async fn set_remove(&self, key: &str, members: &[String]) -> StoreResult<u64>;

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>>;

    // ==================== Sorted Sets ====================

    async fn zset_add(&self, key: &str, member: &str, score: f64) -> StoreResult<bool>;

    /// Ascending rank of a member.
    async fn zset_rank(&self, key: &str, member: &str) -> StoreResult<Option<u64>>;

    /// Members by ascending rank with scores.
    async fn zset_range(&self, key: &str, start: i64, stop: i64)
    -> StoreResult<Vec<(String, f64)>>;

    async fn zset_score(&self, key: &str, member: &str) -> StoreResult<Option<f64>>;

    async fn zset_incr(&self, key: &str, member: &str, delta: f64) -> StoreResult<f64>;

    // ==================== Streams ====================

    /// `XADD key * field value ...`, returning the entry id.
    async fn stream_add(&self, key: &str, fields: &[(String, String)]) -> StoreResult<String>;

    async fn stream_len(&self, key: &str) -> StoreResult<u64>;

    // ==================== Scripting ====================

    /// Execute a script atomically.
    async fn run_script(
        &self,
        script: &AtomicScript,
        keys: &[String],
        args: &[String],
    ) -> StoreResult<ScriptReply>;

    // ==================== Lifecycle ====================

    async fn ping(&self) -> StoreResult<()>;

    async fn is_healthy(&self) -> bool {
        self.ping().await.is_ok()
    }

    /// Close the store. Further operations fail with `StoreError::Unavailable`.
    async fn disconnect(&self);

    /// Backend name for logging/debugging.
    fn backend_name(&self) -> &'static str;
}

/// Shared, type-erased store handle.
pub type DynStore = Arc<dyn KvStore>;
