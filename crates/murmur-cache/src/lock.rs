//! Distributed lock manager.
//!
//! A lock is a key holding its owner's random token, written with
//! `SET NX PX` so it disappears on its own if the holder dies. Release and
//! extension are compare-and-act scripts: only the holder whose token matches
//! the stored value can delete or extend the record.
//!
//! The TTL bounds how long a stalled holder can block others. It also means a
//! body that outlives the TTL silently loses the lock; callers with variable
//! critical sections should renew through [`LockManager::extend`].

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;
use murmur_store::{Backoff, DynStore, KeyNamespace, StoreError, scripts};
use thiserror::Error;
use tokio::time::Instant;

use crate::metrics;

/// Upper bound of a retry sleep, as a multiple of `retry_delay`.
const MAX_BACKOFF_FACTOR: u32 = 8;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("could not acquire lock '{key}' within {waited:?}")]
    NotAcquired { key: String, waited: Duration },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Lifetime of the lock record.
    pub ttl: Duration,
    /// Overall time `acquire` keeps trying.
    pub timeout: Duration,
    /// First retry sleep; later sleeps back off from here.
    pub retry_delay: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(10),
            timeout: Duration::from_secs(5),
            retry_delay: Duration::from_millis(50),
        }
    }
}

impl LockOptions {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }
}

/// Proof of ownership returned by a successful acquire.
#[derive(Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LockToken").field(&self.0).finish()
    }
}

/// Mutual exclusion across processes sharing one store.
#[derive(Clone)]
pub struct LockManager {
    store: DynStore,
    keys: KeyNamespace,
}

impl LockManager {
    pub fn new(store: DynStore, keys: KeyNamespace) -> Self {
        Self { store, keys }
    }

    fn lock_key(&self, name: &str) -> String {
        self.keys.lock(&[name])
    }

    /// Try to take the lock `name` until `opts.timeout` elapses.
    ///
    /// `Ok(None)` means the lock stayed held by someone else. At least one
    /// attempt is made even with a zero timeout. Between attempts the task
    /// sleeps with jittered exponential backoff starting at
    /// `opts.retry_delay`.
    pub async fn acquire(
        &self,
        name: &str,
        opts: &LockOptions,
    ) -> Result<Option<LockToken>, LockError> {
        let key = self.lock_key(name);
        let token = LockToken::generate();
        let backoff = Backoff::new(
            opts.retry_delay,
            opts.retry_delay.saturating_mul(MAX_BACKOFF_FACTOR),
        );
        // A timeout too large to represent waits forever.
        let deadline = Instant::now().checked_add(opts.timeout);
        let mut attempt = 0;

        loop {
            let acquired = self
                .store
                .set_if_absent(&key, token.as_str().as_bytes(), opts.ttl)
                .await
                .inspect_err(|e| {
                    metrics::record_lock_acquire("error");
                    tracing::warn!(lock = %name, error = %e, "Lock acquire failed");
                })?;
            if acquired {
                metrics::record_lock_acquire("acquired");
                tracing::debug!(lock = %name, attempts = attempt + 1, "Lock acquired");
                return Ok(Some(token));
            }

            let now = Instant::now();
            let remaining = match deadline {
                Some(deadline) if now >= deadline => {
                    metrics::record_lock_acquire("timeout");
                    tracing::debug!(lock = %name, attempts = attempt + 1, "Lock acquire timed out");
                    return Ok(None);
                }
                Some(deadline) => deadline - now,
                None => Duration::MAX,
            };
            let sleep = backoff.jittered(attempt).min(remaining);
            tokio::time::sleep(sleep).await;
            attempt += 1;
        }
    }

    /// Release the lock if `token` still owns it.
    ///
    /// Returns `false` when the lock was taken over, already expired, or the
    /// store could not be reached; in the last case the record expires with
    /// its TTL.
    pub async fn release(&self, name: &str, token: &LockToken) -> bool {
        let reply = self
            .store
            .run_script(
                &scripts::COMPARE_AND_DELETE,
                &[self.lock_key(name)],
                &[token.as_str().to_string()],
            )
            .await;
        match reply {
            Ok(reply) => {
                let released = reply.as_int() == Some(1);
                if !released {
                    tracing::debug!(lock = %name, "Lock not released: owner changed or expired");
                }
                released
            }
            Err(e) => {
                tracing::warn!(lock = %name, error = %e, "Lock release failed, leaving it to expire");
                false
            }
        }
    }

    /// Reset the lock's TTL if `token` still owns it.
    pub async fn extend(&self, name: &str, token: &LockToken, ttl: Duration) -> bool {
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let reply = self
            .store
            .run_script(
                &scripts::COMPARE_AND_PEXPIRE,
                &[self.lock_key(name)],
                &[token.as_str().to_string(), millis.to_string()],
            )
            .await;
        match reply {
            Ok(reply) => reply.as_int() == Some(1),
            Err(e) => {
                tracing::warn!(lock = %name, error = %e, "Lock extend failed");
                false
            }
        }
    }

    /// Run `body` while holding the lock `name`.
    ///
    /// The lock is released however `body` ends: success, error or panic (the
    /// panic resumes after release). If the returned future is dropped before
    /// it completes, the release runs on a spawned task. Fails with
    /// [`LockError::NotAcquired`] without running `body` if the lock cannot be
    /// taken in time.
    pub async fn with_lock<T, E, F, Fut>(
        &self,
        name: &str,
        opts: &LockOptions,
        body: F,
    ) -> Result<T, E>
    where
        E: From<LockError>,
        F: FnOnce(LockToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(token) = self.acquire(name, opts).await? else {
            return Err(LockError::NotAcquired {
                key: name.to_string(),
                waited: opts.timeout,
            }
            .into());
        };

        let guard = ReleaseGuard {
            locks: self.clone(),
            name: name.to_string(),
            token: Some(token.clone()),
        };
        let outcome = AssertUnwindSafe(async move { body(token).await })
            .catch_unwind()
            .await;
        guard.release().await;
        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

/// Releases a held lock when dropped while still armed.
struct ReleaseGuard {
    locks: LockManager,
    name: String,
    token: Option<LockToken>,
}

impl ReleaseGuard {
    async fn release(mut self) -> bool {
        let released = match &self.token {
            Some(token) => self.locks.release(&self.name, token).await,
            None => false,
        };
        self.token = None;
        released
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(lock = %self.name, "No runtime to release abandoned lock, leaving it to expire");
            return;
        };
        let locks = self.locks.clone();
        let name = std::mem::take(&mut self.name);
        tracing::debug!(lock = %name, "Lock holder dropped, releasing in background");
        handle.spawn(async move {
            locks.release(&name, &token).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use murmur_store::{KvStore, MemoryStore};

    use super::*;

    fn setup() -> (Arc<MemoryStore>, LockManager) {
        let store = Arc::new(MemoryStore::new());
        let locks = LockManager::new(store.clone(), KeyNamespace::new("l"));
        (store, locks)
    }

    fn quick() -> LockOptions {
        LockOptions::default()
            .with_timeout(Duration::from_millis(100))
            .with_retry_delay(Duration::from_millis(10))
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_acquire_times_out() {
        let (_, locks) = setup();
        let first = locks.acquire("job", &quick()).await.unwrap();
        assert!(first.is_some());
        let second = locks.acquire("job", &quick()).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_release_requires_owner() {
        let (store, locks) = setup();
        let token = locks.acquire("job", &quick()).await.unwrap().unwrap();
        let stranger = LockToken::generate();

        assert!(!locks.release("job", &stranger).await);
        assert!(store.exists("l:lock:job").await.unwrap());
        assert!(locks.release("job", &token).await);
        assert!(!store.exists("l:lock:job").await.unwrap());
        assert!(!locks.release("job", &token).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_release_keeps_new_owner() {
        let (_, locks) = setup();
        let opts = quick().with_ttl(Duration::from_secs(1));
        let stale = locks.acquire("job", &opts).await.unwrap().unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        let fresh = locks.acquire("job", &opts).await.unwrap().unwrap();
        assert!(!locks.release("job", &stale).await);
        assert!(locks.release("job", &fresh).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_only_by_owner() {
        let (store, locks) = setup();
        let opts = quick().with_ttl(Duration::from_secs(5));
        let token = locks.acquire("job", &opts).await.unwrap().unwrap();

        assert!(locks.extend("job", &token, Duration::from_secs(30)).await);
        assert_eq!(
            store.ttl("l:lock:job").await.unwrap(),
            murmur_store::KeyTtl::Expires(30)
        );
        assert!(!locks.extend("job", &LockToken::generate(), Duration::from_secs(60)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_with_lock_releases() {
        let (_, locks) = setup();
        let opts = quick().with_ttl(Duration::from_secs(30));
        let outcome = tokio::time::timeout(
            Duration::from_secs(1),
            locks.with_lock("job", &opts, |_| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, LockError>(())
            }),
        )
        .await;
        assert!(outcome.is_err());

        let retry = quick().with_timeout(Duration::from_secs(5));
        assert!(locks.acquire("job", &retry).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_panic_before_first_poll_releases() {
        let (_, locks) = setup();
        let outcome = AssertUnwindSafe(locks.with_lock(
            "job",
            &quick(),
            |_| -> std::future::Ready<Result<(), LockError>> { panic!("body construction failed") },
        ))
        .catch_unwind()
        .await;
        assert!(outcome.is_err());
        assert!(locks.acquire("job", &quick()).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_timeout_waits_without_overflow() {
        let (_, locks) = setup();
        let forever = LockOptions::default()
            .with_ttl(Duration::MAX)
            .with_timeout(Duration::MAX)
            .with_retry_delay(Duration::MAX);
        assert!(locks.acquire("job", &forever).await.unwrap().is_some());

        let waiting =
            tokio::time::timeout(Duration::from_secs(60), locks.acquire("job", &forever)).await;
        assert!(waiting.is_err());

        let patient = forever.with_retry_delay(Duration::from_millis(50));
        let waiting =
            tokio::time::timeout(Duration::from_secs(60), locks.acquire("job", &patient)).await;
        assert!(waiting.is_err());
    }

    #[tokio::test]
    async fn test_store_error_surfaces_from_acquire() {
        let (store, locks) = setup();
        store.set_unavailable(true);
        let err = locks.acquire("job", &quick()).await.unwrap_err();
        assert!(matches!(err, LockError::Store(StoreError::Unavailable)));
    }
}
