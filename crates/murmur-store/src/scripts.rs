//! Built-in atomic scripts.
//!
//! Each script runs as Lua on Redis. [`MemoryStore`](crate::MemoryStore)
//! recognises them by name and executes an equivalent with the same
//! atomicity.

use crate::traits::AtomicScript;

/// Delete `KEYS[1]` only if its value equals `ARGV[1]`.
///
/// Returns `1` if deleted, `0` otherwise.
pub const COMPARE_AND_DELETE: AtomicScript = AtomicScript::new(
    "compare_and_delete",
    r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
",
)
.replayable();

/// Reset the expiry of `KEYS[1]` to `ARGV[2]` milliseconds only if its value
/// equals `ARGV[1]`.
///
/// Returns `1` if extended, `0` otherwise.
pub const COMPARE_AND_PEXPIRE: AtomicScript = AtomicScript::new(
    "compare_and_pexpire",
    r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
",
)
.replayable();

/// Increment the window counter `KEYS[1]`; the expiry `ARGV[1]` (seconds) is
/// applied only when the increment created the counter.
///
/// A counter that somehow lost its expiry gets it back, otherwise it would
/// throttle forever. Returns `{count, ttl_seconds}`.
pub const FIXED_WINDOW_INCR: AtomicScript = AtomicScript::new(
    "fixed_window_incr",
    r"
local count = redis.call('INCR', KEYS[1])
local window = tonumber(ARGV[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], window)
end
local ttl = redis.call('TTL', KEYS[1])
if ttl < 0 then
    redis.call('EXPIRE', KEYS[1], window)
    ttl = window
end
return {count, ttl}
",
);

/// Add `ARGV[1]` to the set `KEYS[1]` and make sure the set lives at least
/// `ARGV[2]` seconds. `ARGV[2] == 0` means the member never expires, so the
/// set is made persistent. An existing expiry is never shortened.
///
/// Returns the number of members added (`0` or `1`).
pub const TAG_ATTACH: AtomicScript = AtomicScript::new(
    "tag_attach",
    r"
local existed = redis.call('EXISTS', KEYS[1])
local current = redis.call('TTL', KEYS[1])
local added = redis.call('SADD', KEYS[1], ARGV[1])
local ttl = tonumber(ARGV[2])
if ttl <= 0 then
    redis.call('PERSIST', KEYS[1])
elseif existed == 0 or (current >= 0 and current < ttl) then
    redis.call('EXPIRE', KEYS[1], ttl)
end
return added
",
)
.replayable();

/// Sweep one chunk of the tag set `KEYS[1]`.
///
/// `KEYS[2..]` come in pairs of member key and its tag-meta key. Each member
/// is deleted, its meta dropped and its membership removed in the same atomic
/// step, so no write can land between the delete and the removal.
///
/// Returns the number of member keys that existed.
pub const TAG_SWEEP: AtomicScript = AtomicScript::new(
    "tag_sweep",
    r"
local deleted = 0
for i = 2, #KEYS, 2 do
    deleted = deleted + redis.call('DEL', KEYS[i])
    redis.call('DEL', KEYS[i + 1])
    redis.call('SREM', KEYS[1], KEYS[i])
end
return deleted
",
)
.replayable();

/// All scripts shipped with the store client.
pub const BUILTIN: [AtomicScript; 5] = [
    COMPARE_AND_DELETE,
    COMPARE_AND_PEXPIRE,
    FIXED_WINDOW_INCR,
    TAG_ATTACH,
    TAG_SWEEP,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names_are_unique() {
        let mut names: Vec<_> = BUILTIN.iter().map(|s| s.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), BUILTIN.len());
    }

    #[test]
    fn test_window_expiry_only_on_creation() {
        let src = FIXED_WINDOW_INCR.source();
        assert!(src.contains("if count == 1 then"));
        assert!(src.contains("redis.call('EXPIRE', KEYS[1], window)"));
    }

    #[test]
    fn test_only_counters_are_not_replayed() {
        assert!(!FIXED_WINDOW_INCR.is_replayable());
        assert!(COMPARE_AND_DELETE.is_replayable());
        assert!(COMPARE_AND_PEXPIRE.is_replayable());
        assert!(TAG_ATTACH.is_replayable());
        assert!(TAG_SWEEP.is_replayable());
    }

    #[test]
    fn test_release_is_compare_then_delete() {
        let src = COMPARE_AND_DELETE.source();
        let get = src.find("GET").unwrap();
        let del = src.find("DEL").unwrap();
        assert!(get < del);
    }
}
