//! Fixed-window rate limiter.
//!
//! Each `(action, identifier)` pair has one counter per window. The counter's
//! expiry is set only by the increment that creates it, so the window does
//! not slide with traffic; a burst straddling two windows can see up to twice
//! the limit. Any store failure allows the request.

use std::time::Duration;

use murmur_store::{DynStore, KeyNamespace, ScriptReply, StoreError, scripts};
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::metrics;

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests left in the current window.
    pub remaining: u64,
    /// When the current window ends.
    pub reset_at: OffsetDateTime,
}

impl RateLimitDecision {
    fn fail_open(limit: u64, window: Duration) -> Self {
        Self {
            allowed: true,
            remaining: limit,
            reset_at: reset_in(window),
        }
    }
}

/// Now plus `left`, clamped to the largest representable timestamp.
fn reset_in(left: Duration) -> OffsetDateTime {
    time::Duration::try_from(left)
        .ok()
        .and_then(|left| OffsetDateTime::now_utc().checked_add(left))
        .unwrap_or_else(|| PrimitiveDateTime::MAX.assume_utc())
}

/// Whole seconds, rounded up, never zero.
fn window_secs(window: Duration) -> u64 {
    window
        .as_secs()
        .saturating_add(u64::from(window.subsec_nanos() > 0))
        .max(1)
}

fn parse_reply(reply: &ScriptReply) -> Option<(u64, i64)> {
    let items = reply.as_array()?;
    let count = u64::try_from(items.first()?.as_int()?).ok()?;
    let ttl = items.get(1)?.as_int()?;
    Some((count, ttl))
}

#[derive(Clone)]
pub struct RateLimiter {
    store: DynStore,
    keys: KeyNamespace,
}

impl RateLimiter {
    pub fn new(store: DynStore, keys: KeyNamespace) -> Self {
        Self { store, keys }
    }

    /// Count one request by `identifier` for `action` and decide whether it
    /// is within `limit` per `window`.
    pub async fn check_rate_limit(
        &self,
        identifier: &str,
        action: &str,
        window: Duration,
        limit: u64,
    ) -> RateLimitDecision {
        let key = self.keys.rate_limit(action, identifier);
        let secs = window_secs(window);
        let reply = self
            .store
            .run_script(&scripts::FIXED_WINDOW_INCR, &[key], &[secs.to_string()])
            .await;

        let decision = match reply.map(|r| parse_reply(&r)) {
            Ok(Some((count, ttl))) => {
                let ttl = if ttl < 0 { secs } else { ttl as u64 };
                RateLimitDecision {
                    allowed: count <= limit,
                    remaining: limit.saturating_sub(count),
                    reset_at: reset_in(Duration::from_secs(ttl)),
                }
            }
            Ok(None) => {
                tracing::warn!(action, identifier, "Unexpected rate limit reply, allowing");
                RateLimitDecision::fail_open(limit, window)
            }
            Err(e) => {
                metrics::record_store_error("rate_limit");
                tracing::warn!(action, identifier, error = %e, "Rate limit check failed, allowing");
                RateLimitDecision::fail_open(limit, window)
            }
        };

        metrics::record_rate_limit(decision.allowed);
        if !decision.allowed {
            tracing::debug!(action, identifier, limit, "Rate limit exceeded");
        }
        decision
    }

    /// Clear the current window for `identifier`, e.g. after a successful
    /// login.
    pub async fn reset(&self, identifier: &str, action: &str) -> Result<bool, StoreError> {
        let removed = self
            .store
            .delete(&[self.keys.rate_limit(action, identifier)])
            .await?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use murmur_store::MemoryStore;

    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    fn setup() -> (Arc<MemoryStore>, RateLimiter) {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::new(store.clone(), KeyNamespace::new("r"));
        (store, limiter)
    }

    #[test]
    fn test_window_secs() {
        assert_eq!(window_secs(Duration::from_secs(60)), 60);
        assert_eq!(window_secs(Duration::from_millis(1)), 1);
        assert_eq!(window_secs(Duration::from_millis(2500)), 3);
        assert_eq!(window_secs(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn test_unbounded_window_does_not_overflow() {
        let (store, limiter) = setup();
        let decision = limiter
            .check_rate_limit("alice", "login", Duration::MAX, 5)
            .await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);

        store.set_unavailable(true);
        let decision = limiter
            .check_rate_limit("alice", "login", Duration::MAX, 5)
            .await;
        assert!(decision.allowed);
        assert_eq!(decision.reset_at, PrimitiveDateTime::MAX.assume_utc());
    }

    #[tokio::test]
    async fn test_identifiers_and_actions_are_independent() {
        let (_, limiter) = setup();
        for _ in 0..2 {
            limiter.check_rate_limit("ip-1", "login", WINDOW, 2).await;
        }
        assert!(!limiter.check_rate_limit("ip-1", "login", WINDOW, 2).await.allowed);
        assert!(limiter.check_rate_limit("ip-2", "login", WINDOW, 2).await.allowed);
        assert!(limiter.check_rate_limit("ip-1", "post", WINDOW, 2).await.allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_is_fixed() {
        let (_, limiter) = setup();
        let first = limiter.check_rate_limit("u", "a", WINDOW, 3).await;
        tokio::time::advance(Duration::from_secs(45)).await;
        limiter.check_rate_limit("u", "a", WINDOW, 3).await;
        limiter.check_rate_limit("u", "a", WINDOW, 3).await;
        assert!(!limiter.check_rate_limit("u", "a", WINDOW, 3).await.allowed);

        // 60s after the first request the window resets, not 60s after the last.
        tokio::time::advance(Duration::from_secs(16)).await;
        let fresh = limiter.check_rate_limit("u", "a", WINDOW, 3).await;
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 2);
        assert!(first.allowed);
    }

    #[tokio::test]
    async fn test_reset_clears_window() {
        let (_, limiter) = setup();
        limiter.check_rate_limit("u", "a", WINDOW, 1).await;
        assert!(!limiter.check_rate_limit("u", "a", WINDOW, 1).await.allowed);
        assert!(limiter.reset("u", "a").await.unwrap());
        assert!(limiter.check_rate_limit("u", "a", WINDOW, 1).await.allowed);
    }

    #[tokio::test]
    async fn test_fails_open() {
        let (store, limiter) = setup();
        store.set_unavailable(true);
        let decision = limiter.check_rate_limit("u", "a", WINDOW, 5).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 5);
    }
}
