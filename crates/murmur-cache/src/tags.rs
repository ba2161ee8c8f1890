//! Reverse index from invalidation tags to cache keys.
//!
//! ## Layout
//!
//! - `{prefix}:tag:{tag}` is a set of full cache keys carrying `tag`.
//! - `{prefix}:tagmeta:{cache_key}` is a set of the tags applied to that key,
//!   so an explicit delete can detach the key from its tags.
//!
//! Both sets are written with the `tag_attach` script, which never shortens
//! an existing expiry. A tag set therefore lives at least as long as the
//! longest-lived entry ever attached to it, and an entry without TTL makes
//! the set persistent.
//!
//! ## Crash Consistency
//!
//! [`TagIndex::invalidate`] is a sweep, not a transaction: it reads the member
//! set, then handles it in chunks with the `tag_sweep` script, which deletes
//! each member, its metadata and its membership in one atomic step. If it
//! stops half way, the remaining members are still listed and a retry
//! finishes the job. Running it again on an empty tag is a no-op.
//!
//! A writer links tags both before and after writing the value (see
//! [`TagIndex::attach`] and [`TagIndex::confirm`]). A sweep step lands either
//! before the value write, and the confirm re-lists the key, or after it, and
//! deletes the value together with its membership. Either way a live tagged
//! key stays listed under each of its tags. The worst case is a membership
//! without a value, which is harmless.
//!
//! Entries that expire naturally leave their membership behind; readers
//! tolerate that, and [`TagIndex::prune`] cleans it up.

use std::time::Duration;

use murmur_store::{DynStore, KeyNamespace, StoreResult, scripts};

/// Keys deleted per `DEL` round trip during a sweep.
pub const SWEEP_CHUNK: usize = 256;

/// Tag index over a shared store.
#[derive(Clone)]
pub struct TagIndex {
    store: DynStore,
    keys: KeyNamespace,
}

/// Expiry argument for `tag_attach`: whole seconds rounded up, `0` = none.
fn ttl_arg(ttl: Option<Duration>) -> String {
    match ttl {
        None => "0".to_string(),
        Some(ttl) => {
            let secs = ttl
                .as_secs()
                .saturating_add(u64::from(ttl.subsec_nanos() > 0));
            secs.max(1).to_string()
        }
    }
}

impl TagIndex {
    pub fn new(store: DynStore, keys: KeyNamespace) -> Self {
        Self { store, keys }
    }

    /// Record that `cache_key` carries `tags`.
    ///
    /// Tags the key carried before but no longer does are detached first, so
    /// an overwrite with a different tag set leaves no stale membership.
    pub async fn attach(
        &self,
        cache_key: &str,
        tags: &[String],
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        let meta_key = self.keys.tag_meta(cache_key);
        let previous = self.store.set_members(&meta_key).await?;
        let stale: Vec<String> = previous
            .into_iter()
            .filter(|t| !tags.contains(t))
            .collect();
        if !stale.is_empty() {
            for tag in &stale {
                self.store
                    .set_remove(&self.keys.tag(tag), &[cache_key.to_string()])
                    .await?;
            }
            self.store.set_remove(&meta_key, &stale).await?;
        }

        self.link(cache_key, tags, ttl).await
    }

    /// Re-link `cache_key` to `tags` after its value was written.
    ///
    /// Restores memberships a concurrent sweep removed between
    /// [`attach`](Self::attach) and the write. Idempotent.
    pub async fn confirm(
        &self,
        cache_key: &str,
        tags: &[String],
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        self.link(cache_key, tags, ttl).await
    }

    async fn link(&self, cache_key: &str, tags: &[String], ttl: Option<Duration>) -> StoreResult<()> {
        let meta_key = self.keys.tag_meta(cache_key);
        let ttl = ttl_arg(ttl);
        for tag in tags {
            self.store
                .run_script(
                    &scripts::TAG_ATTACH,
                    &[self.keys.tag(tag)],
                    &[cache_key.to_string(), ttl.clone()],
                )
                .await?;
            self.store
                .run_script(
                    &scripts::TAG_ATTACH,
                    &[meta_key.clone()],
                    &[tag.clone(), ttl.clone()],
                )
                .await?;
        }
        Ok(())
    }

    /// Remove `cache_key` from every tag it carries and drop its metadata.
    pub async fn detach(&self, cache_key: &str) -> StoreResult<()> {
        let meta_key = self.keys.tag_meta(cache_key);
        for tag in self.store.set_members(&meta_key).await? {
            self.store
                .set_remove(&self.keys.tag(&tag), &[cache_key.to_string()])
                .await?;
        }
        self.store.delete(&[meta_key]).await?;
        Ok(())
    }

    /// Full cache keys currently listed under `tag`.
    pub async fn members(&self, tag: &str) -> StoreResult<Vec<String>> {
        self.store.set_members(&self.keys.tag(tag)).await
    }

    /// Tags recorded for `cache_key`.
    pub async fn tags_of(&self, cache_key: &str) -> StoreResult<Vec<String>> {
        self.store.set_members(&self.keys.tag_meta(cache_key)).await
    }

    /// Delete every key listed under `tag`, returning how many existed.
    pub async fn invalidate(&self, tag: &str) -> StoreResult<u64> {
        let tag_key = self.keys.tag(tag);
        let members = self.store.set_members(&tag_key).await?;
        let mut deleted = 0;
        for chunk in members.chunks(SWEEP_CHUNK) {
            let mut keys = Vec::with_capacity(1 + chunk.len() * 2);
            keys.push(tag_key.clone());
            for member in chunk {
                keys.push(member.clone());
                keys.push(self.keys.tag_meta(member));
            }
            let reply = self.store.run_script(&scripts::TAG_SWEEP, &keys, &[]).await?;
            deleted += reply.as_int().unwrap_or(0).max(0) as u64;
        }
        tracing::debug!(tag = %tag, members = members.len(), deleted, "Swept tag");
        Ok(deleted)
    }

    /// Drop memberships whose cache key no longer exists.
    pub async fn prune(&self, tag: &str) -> StoreResult<u64> {
        let tag_key = self.keys.tag(tag);
        let mut dangling = Vec::new();
        for member in self.store.set_members(&tag_key).await? {
            if !self.store.exists(&member).await? {
                dangling.push(member);
            }
        }
        if dangling.is_empty() {
            return Ok(0);
        }
        let meta: Vec<String> = dangling.iter().map(|k| self.keys.tag_meta(k)).collect();
        self.store.delete(&meta).await?;
        let removed = self.store.set_remove(&tag_key, &dangling).await?;
        tracing::debug!(tag = %tag, removed, "Pruned dangling tag members");
        Ok(removed)
    }
}
