//! Cache layer metrics.
//!
//! Recorded through the `metrics` facade; they are no-ops unless the host
//! process installs a recorder.

use metrics::counter;

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_INVALIDATIONS_TOTAL: &str = "cache_invalidations_total";
    pub const CACHE_STORE_ERRORS_TOTAL: &str = "cache_store_errors_total";

    pub const LOCK_ACQUIRE_TOTAL: &str = "lock_acquire_total";

    pub const RATE_LIMIT_DECISIONS_TOTAL: &str = "rate_limit_decisions_total";
}

pub fn record_cache_hit() {
    counter!(names::CACHE_HITS_TOTAL).increment(1);
}

pub fn record_cache_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

/// Record keys removed by an invalidation path (`key`, `tag`, `pattern`).
pub fn record_invalidation(via: &'static str, count: u64) {
    if count > 0 {
        counter!(names::CACHE_INVALIDATIONS_TOTAL, "via" => via).increment(count);
    }
}

/// Record a store error the cache swallowed.
pub fn record_store_error(op: &'static str) {
    counter!(names::CACHE_STORE_ERRORS_TOTAL, "op" => op).increment(1);
}

/// Record a lock acquisition outcome (`acquired`, `timeout`, `error`).
pub fn record_lock_acquire(outcome: &'static str) {
    counter!(names::LOCK_ACQUIRE_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_rate_limit(allowed: bool) {
    let allowed = if allowed { "true" } else { "false" };
    counter!(names::RATE_LIMIT_DECISIONS_TOTAL, "allowed" => allowed).increment(1);
}
