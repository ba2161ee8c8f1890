//! Entity caching facade.
//!
//! An entity is cached under its id and under every alternate unique key it
//! exposes (username, email, ...). All copies share two tags, the entity kind
//! and `{kind}:{id}`, so one tag invalidation clears every copy together.
//!
//! ## Key Format
//!
//! - by id: `{kind}:id:{id}`, e.g. `user:id:42`
//! - by alternate key: `{kind}:{lookup}:{value}`, e.g. `user:username:alice`
//!
//! Nothing here returns a cache error. When the store is down every read is a
//! miss and every loader result is returned uncached.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::cache::{Cache, EntryOptions};
use crate::codec::{Codec, JsonCodec};

/// Lookup name for the primary id.
pub const ID_LOOKUP: &str = "id";

/// Default lifetime of a cached entity.
pub const DEFAULT_ENTITY_TTL: Duration = Duration::from_secs(300);

/// A domain object that can be cached by the facade.
pub trait CacheableEntity: Serialize + DeserializeOwned + Send + Sync {
    /// Kind segment of every key and tag, e.g. `"user"`.
    const KIND: &'static str;

    fn id(&self) -> String;

    /// `(lookup, value)` pairs under which the entity is also cached. Pairs
    /// are only listed when the attribute is present.
    fn alternate_keys(&self) -> Vec<(&'static str, String)> {
        Vec::new()
    }
}

/// Per-write options for entity caching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityOptions {
    pub ttl: Duration,
    /// Tags added on top of the kind and id tags.
    pub extra_tags: Vec<String>,
}

impl Default for EntityOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_ENTITY_TTL,
            extra_tags: Vec::new(),
        }
    }
}

impl EntityOptions {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.extra_tags.push(tag.into());
        self
    }
}

/// Facade over [`Cache`] for one entity type.
pub struct EntityCache<E, C = JsonCodec> {
    cache: Arc<Cache<C>>,
    _entity: PhantomData<fn() -> E>,
}

impl<E, C> Clone for EntityCache<E, C> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            _entity: PhantomData,
        }
    }
}

impl<E: CacheableEntity, C: Codec> EntityCache<E, C> {
    pub fn new(cache: Arc<Cache<C>>) -> Self {
        Self {
            cache,
            _entity: PhantomData,
        }
    }

    pub fn cache(&self) -> &Cache<C> {
        &self.cache
    }

    /// Logical cache key for a lookup.
    pub fn lookup_key(lookup: &str, value: &str) -> String {
        format!("{}:{lookup}:{value}", E::KIND)
    }

    /// Tag shared by every copy of one entity.
    pub fn entity_tag(id: &str) -> String {
        format!("{}:{id}", E::KIND)
    }

    fn entry_options(entity: &E, opts: &EntityOptions) -> EntryOptions {
        EntryOptions::ttl(opts.ttl)
            .with_tags([E::KIND.to_string(), Self::entity_tag(&entity.id())])
            .with_tags(opts.extra_tags.iter().cloned())
    }

    /// Write `entity` under its id and every alternate key. Returns how many
    /// copies were stored.
    pub async fn cache_entity(&self, entity: &E, opts: &EntityOptions) -> usize {
        let entry = Self::entry_options(entity, opts);
        let mut keys = vec![Self::lookup_key(ID_LOOKUP, &entity.id())];
        keys.extend(
            entity
                .alternate_keys()
                .into_iter()
                .map(|(lookup, value)| Self::lookup_key(lookup, &value)),
        );

        let mut stored = 0;
        for key in &keys {
            if self.cache.set(key, entity, &entry).await {
                stored += 1;
            }
        }
        tracing::debug!(kind = E::KIND, id = %entity.id(), stored, "Cached entity");
        stored
    }

    pub async fn get_entity(&self, lookup: &str, value: &str) -> Option<E> {
        self.cache.get(&Self::lookup_key(lookup, value)).await
    }

    /// Cached entity for `lookup = value`, or the loader's result.
    ///
    /// On a miss the loader runs once; a found entity is re-cached under all
    /// of its keys, not just the one looked up. `Ok(None)` from the loader is
    /// not cached.
    pub async fn get_or_set_entity<F, Fut, Err>(
        &self,
        lookup: &str,
        value: &str,
        opts: &EntityOptions,
        loader: F,
    ) -> Result<Option<E>, Err>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<E>, Err>>,
    {
        if let Some(hit) = self.get_entity(lookup, value).await {
            return Ok(Some(hit));
        }
        let loaded = loader().await?;
        if let Some(entity) = &loaded {
            self.cache_entity(entity, opts).await;
        }
        Ok(loaded)
    }

    /// Drop every cached copy of the entity with `id`.
    pub async fn invalidate_entity(&self, id: &str) -> u64 {
        self.cache.invalidate_by_tags(&[Self::entity_tag(id)]).await
    }

    /// Drop every cached copy of the entity reachable through
    /// `lookup = value`.
    ///
    /// If the entity is cached, all of its copies go; otherwise only the
    /// lookup key is removed.
    pub async fn invalidate_lookup(&self, lookup: &str, value: &str) -> u64 {
        match self.get_entity(lookup, value).await {
            Some(entity) => self.invalidate_entity(&entity.id()).await,
            None => u64::from(self.cache.delete(&Self::lookup_key(lookup, value)).await),
        }
    }

    /// Drop every cached entity of this kind.
    pub async fn invalidate_kind(&self) -> u64 {
        self.cache.invalidate_by_tags(&[E::KIND]).await
    }
}
