//! User profile caching.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::Cache;
use crate::codec::{Codec, JsonCodec};
use crate::entity::{CacheableEntity, EntityCache, EntityOptions, ID_LOOKUP};

pub const USERNAME_LOOKUP: &str = "username";
pub const EMAIL_LOOKUP: &str = "email";
pub const SOCKET_LOOKUP: &str = "socket";

/// The slice of a user record request handlers read on hot paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedUser {
    pub id: u64,
    pub username: String,
    pub email: Option<String>,
    /// Realtime connection currently bound to the user, if any.
    pub socket_id: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl CacheableEntity for CachedUser {
    const KIND: &'static str = "user";

    fn id(&self) -> String {
        self.id.to_string()
    }

    fn alternate_keys(&self) -> Vec<(&'static str, String)> {
        let mut keys = vec![(USERNAME_LOOKUP, normalize(&self.username))];
        if let Some(email) = &self.email {
            keys.push((EMAIL_LOOKUP, normalize(email)));
        }
        if let Some(socket) = &self.socket_id {
            keys.push((SOCKET_LOOKUP, socket.clone()));
        }
        keys
    }
}

/// Usernames and emails are unique case-insensitively.
fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// User lookups by id, username, email and socket id.
pub struct UserCache<C = JsonCodec> {
    entities: EntityCache<CachedUser, C>,
    options: EntityOptions,
}

impl<C: Codec> UserCache<C> {
    pub fn new(cache: Arc<Cache<C>>) -> Self {
        Self {
            entities: EntityCache::new(cache),
            options: EntityOptions::default(),
        }
    }

    pub fn with_options(mut self, options: EntityOptions) -> Self {
        self.options = options;
        self
    }

    pub fn entities(&self) -> &EntityCache<CachedUser, C> {
        &self.entities
    }

    pub async fn cache_user(&self, user: &CachedUser) -> usize {
        self.entities.cache_entity(user, &self.options).await
    }

    pub async fn get_by_id(&self, id: u64) -> Option<CachedUser> {
        self.entities.get_entity(ID_LOOKUP, &id.to_string()).await
    }

    pub async fn get_by_username(&self, username: &str) -> Option<CachedUser> {
        self.entities
            .get_entity(USERNAME_LOOKUP, &normalize(username))
            .await
    }

    pub async fn get_by_email(&self, email: &str) -> Option<CachedUser> {
        self.entities
            .get_entity(EMAIL_LOOKUP, &normalize(email))
            .await
    }

    pub async fn get_by_socket_id(&self, socket_id: &str) -> Option<CachedUser> {
        self.entities.get_entity(SOCKET_LOOKUP, socket_id).await
    }

    pub async fn get_or_load_by_id<F, Fut, E>(&self, id: u64, loader: F) -> Result<Option<CachedUser>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<CachedUser>, E>>,
    {
        self.entities
            .get_or_set_entity(ID_LOOKUP, &id.to_string(), &self.options, loader)
            .await
    }

    pub async fn get_or_load_by_username<F, Fut, E>(
        &self,
        username: &str,
        loader: F,
    ) -> Result<Option<CachedUser>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<CachedUser>, E>>,
    {
        self.entities
            .get_or_set_entity(USERNAME_LOOKUP, &normalize(username), &self.options, loader)
            .await
    }

    pub async fn invalidate_by_id(&self, id: u64) -> u64 {
        self.entities.invalidate_entity(&id.to_string()).await
    }

    pub async fn invalidate_by_username(&self, username: &str) -> u64 {
        self.entities
            .invalidate_lookup(USERNAME_LOOKUP, &normalize(username))
            .await
    }

    pub async fn invalidate_by_email(&self, email: &str) -> u64 {
        self.entities
            .invalidate_lookup(EMAIL_LOOKUP, &normalize(email))
            .await
    }

    pub async fn invalidate_by_socket_id(&self, socket_id: &str) -> u64 {
        self.entities
            .invalidate_lookup(SOCKET_LOOKUP, socket_id)
            .await
    }

    /// Drop every cached user.
    pub async fn invalidate_all(&self) -> u64 {
        self.entities.invalidate_kind().await
    }
}
