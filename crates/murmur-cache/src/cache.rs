//! Cache-aside core.
//!
//! All caching flows through [`Cache`]. Keys passed in are logical paths such
//! as `user:id:42`; they are namespaced under `{prefix}:cache:`.
//!
//! ## Failure Policy
//!
//! The cache is allowed to not have data. Store errors are logged, counted and
//! swallowed: reads return `None`, writes and invalidations report nothing
//! done. [`Cache::get_or_set`] falls back to the loader and returns its value
//! uncached. Loader errors are never cached and reach the caller unchanged.

use std::future::Future;
use std::time::Duration;

use murmur_store::{DynStore, KeyKind, KeyNamespace, KeyTtl, StoreError};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::codec::{Codec, JsonCodec};
use crate::metrics;
use crate::tags::{SWEEP_CHUNK, TagIndex};

/// SCAN batch size for pattern invalidation.
const SCAN_COUNT: usize = 500;

/// Expiry and tags applied to a cache write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryOptions {
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
}

impl EntryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            tags: Vec::new(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

/// Cache-aside orchestration over a shared store.
pub struct Cache<C = JsonCodec> {
    store: DynStore,
    keys: KeyNamespace,
    tags: TagIndex,
    codec: C,
}

impl Cache<JsonCodec> {
    pub fn new(store: DynStore, keys: KeyNamespace) -> Self {
        Self::with_codec(store, keys, JsonCodec)
    }
}

impl<C: Codec> Cache<C> {
    pub fn with_codec(store: DynStore, keys: KeyNamespace, codec: C) -> Self {
        let tags = TagIndex::new(store.clone(), keys.clone());
        Self {
            store,
            keys,
            tags,
            codec,
        }
    }

    pub fn keys(&self) -> &KeyNamespace {
        &self.keys
    }

    pub fn store(&self) -> &DynStore {
        &self.store
    }

    pub fn tag_index(&self) -> &TagIndex {
        &self.tags
    }

    /// Full store key for a logical cache key.
    pub fn full_key(&self, key: &str) -> String {
        self.keys.path(KeyKind::Cache, key)
    }

    fn swallow(&self, op: &'static str, key: &str, err: &StoreError) {
        metrics::record_store_error(op);
        tracing::warn!(op, key = %key, error = %err, "Cache store operation failed");
    }

    /// Store `value` under `key`. Returns `false` if nothing was written.
    ///
    /// Tag memberships are written before the value and confirmed after it,
    /// so a key that is present with tags stays reachable from each of them
    /// even if a tag sweep runs concurrently.
    pub async fn set<T>(&self, key: &str, value: &T, opts: &EntryOptions) -> bool
    where
        T: Serialize + ?Sized,
    {
        let bytes = match self.codec.encode(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to encode cache value");
                return false;
            }
        };
        self.set_raw(key, &bytes, opts).await
    }

    async fn set_raw(&self, key: &str, bytes: &[u8], opts: &EntryOptions) -> bool {
        let full = self.full_key(key);
        if let Err(e) = self.tags.attach(&full, &opts.tags, opts.ttl).await {
            self.swallow("set", key, &e);
            return false;
        }
        if let Err(e) = self.store.set(&full, bytes, opts.ttl).await {
            self.swallow("set", key, &e);
            return false;
        }
        if !opts.tags.is_empty() {
            if let Err(e) = self.tags.confirm(&full, &opts.tags, opts.ttl).await {
                self.swallow("set", key, &e);
            }
        }
        true
    }

    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let raw = self.store.get(&self.full_key(key)).await?;
        if raw.is_some() {
            metrics::record_cache_hit();
        } else {
            metrics::record_cache_miss();
        }
        Ok(raw)
    }

    /// Typed read. Undecodable entries are logged and reported as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.get_raw(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                self.swallow("get", key, &e);
                return None;
            }
        };
        match self.codec.decode(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to decode cached value");
                None
            }
        }
    }

    /// Tolerant read: a stored value that does not decode as structured data
    /// is returned as a string instead of failing.
    pub async fn get_json(&self, key: &str) -> Option<serde_json::Value> {
        let raw = match self.get_raw(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                self.swallow("get", key, &e);
                return None;
            }
        };
        Some(
            self.codec
                .decode::<serde_json::Value>(&raw)
                .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&raw).into_owned())),
        )
    }

    /// Return the cached value, or run `loader` once, cache its value and
    /// return it.
    ///
    /// The loader never runs on a hit. If the store fails, the loader's value
    /// is returned without being cached.
    pub async fn get_or_set<T, F, Fut, E>(
        &self,
        key: &str,
        opts: &EntryOptions,
        loader: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.get_raw(key).await {
            Ok(Some(raw)) => match self.codec.decode(&raw) {
                Ok(value) => {
                    tracing::debug!(key = %key, "Cache hit");
                    return Ok(value);
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                }
            },
            Ok(None) => tracing::debug!(key = %key, "Cache miss"),
            Err(e) => {
                self.swallow("get_or_set", key, &e);
                return loader().await;
            }
        }

        let value = loader().await?;
        self.set(key, &value, opts).await;
        Ok(value)
    }

    /// Remove `key` and detach it from its tags. Returns whether it existed.
    pub async fn delete(&self, key: &str) -> bool {
        let full = self.full_key(key);
        if let Err(e) = self.tags.detach(&full).await {
            self.swallow("delete", key, &e);
        }
        match self.store.delete(&[full]).await {
            Ok(n) => {
                metrics::record_invalidation("key", n);
                n > 0
            }
            Err(e) => {
                self.swallow("delete", key, &e);
                false
            }
        }
    }

    /// Remaining lifetime of `key`, `None` if the store is unreachable.
    pub async fn ttl(&self, key: &str) -> Option<KeyTtl> {
        match self.store.ttl(&self.full_key(key)).await {
            Ok(ttl) => Some(ttl),
            Err(e) => {
                self.swallow("ttl", key, &e);
                None
            }
        }
    }

    /// Delete every entry carrying any of `tags`. Returns keys deleted.
    ///
    /// Not atomic across tags or members; safe to retry. A tag that fails
    /// is logged and the remaining tags are still processed.
    pub async fn invalidate_by_tags<S: AsRef<str>>(&self, tags: &[S]) -> u64 {
        let mut deleted = 0;
        for tag in tags {
            let tag = tag.as_ref();
            match self.tags.invalidate(tag).await {
                Ok(n) => deleted += n,
                Err(e) => {
                    metrics::record_store_error("invalidate_by_tags");
                    tracing::warn!(tag = %tag, error = %e, "Tag invalidation failed");
                }
            }
        }
        metrics::record_invalidation("tag", deleted);
        deleted
    }

    /// Delete every entry whose logical key matches `glob`.
    ///
    /// Walks the keyspace with SCAN; meant for operator-triggered
    /// invalidation, not request paths.
    pub async fn invalidate_by_pattern(&self, glob: &str) -> u64 {
        let pattern = self.keys.pattern(KeyKind::Cache, glob);
        let matched = match self.store.scan_match(&pattern, SCAN_COUNT).await {
            Ok(keys) => keys,
            Err(e) => {
                self.swallow("invalidate_by_pattern", glob, &e);
                return 0;
            }
        };

        let mut deleted = 0;
        for chunk in matched.chunks(SWEEP_CHUNK) {
            match self.store.delete(chunk).await {
                Ok(n) => deleted += n,
                Err(e) => {
                    self.swallow("invalidate_by_pattern", glob, &e);
                    break;
                }
            }
            let meta: Vec<String> = chunk.iter().map(|k| self.keys.tag_meta(k)).collect();
            if let Err(e) = self.store.delete(&meta).await {
                self.swallow("invalidate_by_pattern", glob, &e);
            }
        }
        tracing::info!(pattern = %pattern, deleted, "Invalidated by pattern");
        metrics::record_invalidation("pattern", deleted);
        deleted
    }
}
