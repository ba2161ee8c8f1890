//! One handle over every component sharing a store.

use std::sync::Arc;

use murmur_store::{DynStore, KeyNamespace, KvStore, RedisStore, StoreConfig, StoreError};

use crate::cache::Cache;
use crate::lock::LockManager;
use crate::rate_limit::RateLimiter;
use crate::users::UserCache;

/// The cache layer as request handlers see it.
///
/// Built once at startup and passed to whoever needs it. Every component
/// shares the same store client and key namespace.
#[derive(Clone)]
pub struct CacheLayer {
    store: DynStore,
    cache: Arc<Cache>,
    users: Arc<UserCache>,
    locks: LockManager,
    rate_limiter: RateLimiter,
}

impl CacheLayer {
    pub fn new(store: DynStore, keys: KeyNamespace) -> Self {
        let cache = Arc::new(Cache::new(store.clone(), keys.clone()));
        Self {
            users: Arc::new(UserCache::new(cache.clone())),
            locks: LockManager::new(store.clone(), keys.clone()),
            rate_limiter: RateLimiter::new(store.clone(), keys),
            cache,
            store,
        }
    }

    /// Connect to Redis with `config` and wire every component to it.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let store = RedisStore::connect(config).await?;
        Ok(Self::new(Arc::new(store), KeyNamespace::new(&config.key_prefix)))
    }

    pub fn store(&self) -> &DynStore {
        &self.store
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn users(&self) -> &UserCache {
        &self.users
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub async fn is_healthy(&self) -> bool {
        self.store.is_healthy().await
    }

    /// Close the store connection. Components fail soft afterwards.
    pub async fn shutdown(&self) {
        self.store.disconnect().await;
        tracing::info!(backend = self.store.backend_name(), "Cache layer shut down");
    }
}
