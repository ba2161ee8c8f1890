//! # murmur-store
//!
//! Shared key-value store client for the murmur cache layer.
//!
//! ## Overview
//!
//! - [`KeyNamespace`] builds every key the cache, lock and rate limiter use,
//!   so independent deployments sharing one Redis never collide.
//! - [`KvStore`] is the operational contract: scalar, hash, list, set, sorted
//!   set, stream, scripting and lifecycle operations.
//! - [`RedisStore`] implements it over a deadpool connection pool with
//!   reconnect and backoff; [`MemoryStore`] implements it in-process.
//! - [`scripts`] holds the atomic scripts higher layers rely on.
//!
//! ## Example
//!
//! ```ignore
//! use murmur_store::{KeyNamespace, KvStore, RedisStore, StoreConfig};
//!
//! let config = StoreConfig::from_env()?;
//! let keys = KeyNamespace::new(&config.key_prefix);
//! let store = RedisStore::connect(&config).await?;
//! store.set(&keys.cache(&["user", "42"]), b"{}", None).await?;
//! ```

mod config;
mod error;
pub mod keys;
mod memory;
mod redis_store;
mod retry;
pub mod scripts;
mod traits;

pub use config::{ENV_PREFIX, StoreConfig};
pub use error::{ConfigError, ErrorCategory, StoreError};
pub use keys::{KeyKind, KeyNamespace};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use retry::Backoff;
pub use traits::{AtomicScript, DynStore, KeyTtl, KvStore, ScriptReply, StoreResult};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        DynStore, KeyKind, KeyNamespace, KeyTtl, KvStore, MemoryStore, RedisStore, StoreConfig,
        StoreError, StoreResult,
    };
}
