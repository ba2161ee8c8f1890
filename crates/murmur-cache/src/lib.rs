//! # murmur-cache
//!
//! Cache and coordination primitives layered on [`murmur_store`].
//!
//! ## Components
//!
//! - [`Cache`]: cache-aside reads and writes with tag-based invalidation.
//! - [`TagIndex`]: the tag → keys reverse index behind it.
//! - [`EntityCache`] / [`UserCache`]: entity lookups by id and alternate keys.
//! - [`LockManager`]: owner-token locks with atomic release.
//! - [`RateLimiter`]: fixed-window counters that fail open.
//!
//! [`CacheLayer`] wires them all to one store.
//!
//! ## Example
//!
//! ```ignore
//! use murmur_cache::{CacheLayer, EntryOptions};
//! use murmur_store::StoreConfig;
//!
//! let layer = CacheLayer::connect(&StoreConfig::from_env()?).await?;
//! let feed: Vec<Post> = layer
//!     .cache()
//!     .get_or_set("feed:home:42", &EntryOptions::ttl(Duration::from_secs(30)), || async {
//!         load_home_feed(42).await
//!     })
//!     .await?;
//! ```

pub mod cache;
pub mod codec;
pub mod entity;
mod layer;
pub mod lock;
pub mod metrics;
pub mod rate_limit;
pub mod tags;
pub mod users;

pub use cache::{Cache, EntryOptions};
pub use codec::{Codec, CodecError, JsonCodec, MsgPackCodec};
pub use entity::{CacheableEntity, DEFAULT_ENTITY_TTL, EntityCache, EntityOptions, ID_LOOKUP};
pub use layer::CacheLayer;
pub use lock::{LockError, LockManager, LockOptions, LockToken};
pub use rate_limit::{RateLimitDecision, RateLimiter};
pub use tags::TagIndex;
pub use users::{CachedUser, UserCache};
