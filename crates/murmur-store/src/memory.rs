//! In-process store backed by DashMap.
//!
//! Used for single-instance development and as the store in tests. Commands
//! and single-key scripts rely on the per-shard lock DashMap takes for an
//! entry. They also hold a shared gate, which the multi-key `tag_sweep`
//! script takes exclusively, so the sweep is atomic against every other
//! command.
//! Expiry is lazy: an expired key is purged by the next command that sees it.
//!
//! Time comes from `tokio::time::Instant`, so paused-clock tests can move
//! expiries forward with `tokio::time::advance`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::one::RefMut;
use tokio::time::Instant;

use crate::error::StoreError;
use crate::scripts;
use crate::traits::{AtomicScript, KeyTtl, KvStore, ScriptReply, StoreResult};

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Bytes(Vec<u8>),
    Hash(HashMap<String, String>),
    List(VecDeque<String>),
    Set(HashSet<String>),
    ZSet(HashMap<String, f64>),
    Stream(Vec<(String, Vec<(String, String)>)>),
}

impl Value {
    fn is_empty_collection(&self) -> bool {
        match self {
            Self::Bytes(_) | Self::Stream(_) => false,
            Self::Hash(h) => h.is_empty(),
            Self::List(l) => l.is_empty(),
            Self::Set(s) => s.is_empty(),
            Self::ZSet(z) => z.is_empty(),
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn ttl(&self, now: Instant) -> KeyTtl {
        match self.expires_at {
            None => KeyTtl::Persistent,
            Some(at) => {
                let left = at.saturating_duration_since(now);
                // Round up like Redis does for keys with sub-second precision left.
                let secs = left
                    .as_secs()
                    .saturating_add(u64::from(left.subsec_nanos() > 0));
                KeyTtl::Expires(secs)
            }
        }
    }
}

fn wrong_type() -> StoreError {
    StoreError::command("WRONGTYPE Operation against a key holding the wrong kind of value")
}

/// Resolve Redis-style inclusive, possibly negative, range bounds.
fn normalize_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

fn sorted_zset(z: &HashMap<String, f64>) -> Vec<(String, f64)> {
    let mut items: Vec<(String, f64)> = z.iter().map(|(m, s)| (m.clone(), *s)).collect();
    items.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    items
}

/// DashMap-backed [`KvStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    map: DashMap<String, Slot>,
    gate: RwLock<()>,
    unavailable: AtomicBool,
    stream_seq: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a store outage: while set, every command fails with
    /// [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Release);
    }

    /// Number of live (non-expired) keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.map.iter().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> StoreResult<RwLockReadGuard<'_, ()>> {
        if self.unavailable.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable);
        }
        Ok(self.gate.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn check_exclusive(&self) -> StoreResult<RwLockWriteGuard<'_, ()>> {
        if self.unavailable.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable);
        }
        Ok(self.gate.write().unwrap_or_else(PoisonError::into_inner))
    }

    fn purge(&self, key: &str) {
        let now = Instant::now();
        self.map.remove_if(key, |_, slot| slot.is_expired(now));
    }

    fn live(&self, key: &str) -> Option<RefMut<'_, String, Slot>> {
        self.purge(key);
        self.map.get_mut(key)
    }

    fn live_or_insert(&self, key: &str, init: impl FnOnce() -> Value) -> RefMut<'_, String, Slot> {
        self.purge(key);
        self.map
            .entry(key.to_string())
            .or_insert_with(|| Slot::new(init()))
    }

    fn drop_if_empty(&self, key: &str) {
        self.map.remove_if(key, |_, slot| slot.value.is_empty_collection());
    }

    fn script_compare_and_delete(&self, keys: &[String], args: &[String]) -> StoreResult<ScriptReply> {
        let (key, token) = script_key_arg(keys, args)?;
        self.purge(key);
        let removed = self
            .map
            .remove_if(key, |_, slot| slot.value == Value::Bytes(token.as_bytes().to_vec()));
        Ok(ScriptReply::Int(i64::from(removed.is_some())))
    }

    fn script_compare_and_pexpire(&self, keys: &[String], args: &[String]) -> StoreResult<ScriptReply> {
        let (key, token) = script_key_arg(keys, args)?;
        let millis: u64 = parse_arg(args, 1)?;
        let Some(mut slot) = self.live(key) else {
            return Ok(ScriptReply::Int(0));
        };
        if slot.value != Value::Bytes(token.as_bytes().to_vec()) {
            return Ok(ScriptReply::Int(0));
        }
        slot.expires_at = deadline(Duration::from_millis(millis));
        Ok(ScriptReply::Int(1))
    }

    fn script_fixed_window_incr(&self, keys: &[String], args: &[String]) -> StoreResult<ScriptReply> {
        let key = script_key(keys)?;
        let window: u64 = parse_arg(args, 0)?;
        let now = Instant::now();
        let mut slot = self.live_or_insert(key, || Value::Bytes(b"0".to_vec()));
        let Value::Bytes(raw) = &slot.value else {
            return Err(wrong_type());
        };
        let count = parse_counter(raw)? + 1;
        slot.value = Value::Bytes(count.to_string().into_bytes());
        if count == 1 || slot.expires_at.is_none() {
            slot.expires_at = now.checked_add(Duration::from_secs(window));
        }
        let ttl = slot.ttl(now).as_reply();
        Ok(ScriptReply::Array(vec![ScriptReply::Int(count), ScriptReply::Int(ttl)]))
    }

    fn script_tag_attach(&self, keys: &[String], args: &[String]) -> StoreResult<ScriptReply> {
        let key = script_key(keys)?;
        let member = args
            .first()
            .ok_or_else(|| StoreError::command("tag_attach: missing member"))?;
        let ttl: u64 = parse_arg(args, 1)?;
        let now = Instant::now();

        self.purge(key);
        let existed = self.map.contains_key(key);
        let mut slot = self
            .map
            .entry(key.to_string())
            .or_insert_with(|| Slot::new(Value::Set(HashSet::new())));
        let Value::Set(members) = &mut slot.value else {
            return Err(wrong_type());
        };
        let added = members.insert(member.clone());

        match now.checked_add(Duration::from_secs(ttl)) {
            Some(wanted) if ttl > 0 => match (existed, slot.expires_at) {
                (false, _) => slot.expires_at = Some(wanted),
                (true, Some(current)) if current < wanted => slot.expires_at = Some(wanted),
                _ => {}
            },
            _ => slot.expires_at = None,
        }
        Ok(ScriptReply::Int(i64::from(added)))
    }

    /// Caller holds the exclusive gate.
    fn script_tag_sweep(&self, keys: &[String]) -> StoreResult<ScriptReply> {
        let (tag_key, pairs) = keys
            .split_first()
            .ok_or_else(|| StoreError::command("tag_sweep: missing tag key"))?;
        if pairs.len() % 2 != 0 {
            return Err(StoreError::command(
                "tag_sweep: keys must come in member/meta pairs",
            ));
        }

        let now = Instant::now();
        let mut deleted = 0;
        for pair in pairs.chunks_exact(2) {
            if let Some((_, slot)) = self.map.remove(&pair[0]) {
                if !slot.is_expired(now) {
                    deleted += 1;
                }
            }
            self.map.remove(&pair[1]);
        }
        if let Some(mut slot) = self.live(tag_key) {
            let Value::Set(members) = &mut slot.value else {
                return Err(wrong_type());
            };
            for pair in pairs.chunks_exact(2) {
                members.remove(&pair[0]);
            }
        }
        self.drop_if_empty(tag_key);
        Ok(ScriptReply::Int(deleted))
    }
}

/// Expiry instant `ttl` from now; `None` (never) when it does not fit.
fn deadline(ttl: Duration) -> Option<Instant> {
    Instant::now().checked_add(ttl)
}

/// Compile a SCAN MATCH pattern. Redis escapes with a backslash while the
/// glob crate uses brackets, so escaped characters are rewritten.
fn redis_pattern(pattern: &str) -> StoreResult<glob::Pattern> {
    let mut translated = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            let literal = chars.next().unwrap_or('\\');
            translated.push_str(&glob::Pattern::escape(&literal.to_string()));
        } else {
            translated.push(c);
        }
    }
    glob::Pattern::new(&translated)
        .map_err(|e| StoreError::command(format!("invalid pattern {pattern}: {e}")))
}

fn script_key(keys: &[String]) -> StoreResult<&str> {
    keys.first()
        .map(String::as_str)
        .ok_or_else(|| StoreError::command("script requires one key"))
}

fn script_key_arg<'a>(keys: &'a [String], args: &'a [String]) -> StoreResult<(&'a str, &'a str)> {
    let key = script_key(keys)?;
    let arg = args
        .first()
        .ok_or_else(|| StoreError::command("script requires one argument"))?;
    Ok((key, arg))
}

fn parse_arg<T: std::str::FromStr>(args: &[String], idx: usize) -> StoreResult<T> {
    args.get(idx)
        .and_then(|a| a.parse().ok())
        .ok_or_else(|| StoreError::command(format!("script argument {} is not a number", idx + 1)))
}

fn parse_counter(raw: &[u8]) -> StoreResult<i64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| StoreError::command("ERR value is not an integer or out of range"))
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<()> {
        let _gate = self.check()?;
        let mut slot = Slot::new(Value::Bytes(value.to_vec()));
        slot.expires_at = ttl.and_then(deadline);
        self.map.insert(key.to_string(), slot);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<bool> {
        let _gate = self.check()?;
        self.purge(key);
        let mut inserted = false;
        self.map.entry(key.to_string()).or_insert_with(|| {
            inserted = true;
            Slot {
                value: Value::Bytes(value.to_vec()),
                expires_at: deadline(ttl),
            }
        });
        Ok(inserted)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let _gate = self.check()?;
        match self.live(key) {
            None => Ok(None),
            Some(slot) => match &slot.value {
                Value::Bytes(b) => Ok(Some(b.clone())),
                _ => Err(wrong_type()),
            },
        }
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        let _gate = self.check()?;
        let now = Instant::now();
        let mut removed = 0;
        for key in keys {
            if let Some((_, slot)) = self.map.remove(key) {
                if !slot.is_expired(now) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let _gate = self.check()?;
        Ok(self.live(key).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let _gate = self.check()?;
        match self.live(key) {
            Some(mut slot) => {
                slot.expires_at = deadline(ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        let _gate = self.check()?;
        Ok(self
            .live(key)
            .map_or(KeyTtl::Missing, |slot| slot.ttl(Instant::now())))
    }

    async fn incr_by(&self, key: &str, delta: i64) -> StoreResult<i64> {
        let _gate = self.check()?;
        let mut slot = self.live_or_insert(key, || Value::Bytes(b"0".to_vec()));
        let Value::Bytes(raw) = &slot.value else {
            return Err(wrong_type());
        };
        let next = parse_counter(raw)?
            .checked_add(delta)
            .ok_or_else(|| StoreError::command("ERR increment or decrement would overflow"))?;
        slot.value = Value::Bytes(next.to_string().into_bytes());
        Ok(next)
    }

    async fn scan_match(&self, pattern: &str, _count: usize) -> StoreResult<Vec<String>> {
        let _gate = self.check()?;
        let matcher = redis_pattern(pattern)?;
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .map
            .iter()
            .filter(|e| !e.is_expired(now) && matcher.matches(e.key()))
            .map(|e| e.key().clone())
            .collect();
        keys.sort_unstable();
        Ok(keys)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        let _gate = self.check()?;
        let mut slot = self.live_or_insert(key, || Value::Hash(HashMap::new()));
        let Value::Hash(h) = &mut slot.value else {
            return Err(wrong_type());
        };
        h.insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        let _gate = self.check()?;
        match self.live(key) {
            None => Ok(None),
            Some(slot) => match &slot.value {
                Value::Hash(h) => Ok(h.get(field).cloned()),
                _ => Err(wrong_type()),
            },
        }
    }

    async fn hash_delete(&self, key: &str, fields: &[String]) -> StoreResult<u64> {
        let _gate = self.check()?;
        let removed = match self.live(key) {
            None => 0,
            Some(mut slot) => match &mut slot.value {
                Value::Hash(h) => fields.iter().filter(|f| h.remove(*f).is_some()).count() as u64,
                _ => return Err(wrong_type()),
            },
        };
        self.drop_if_empty(key);
        Ok(removed)
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<Vec<(String, String)>> {
        let _gate = self.check()?;
        match self.live(key) {
            None => Ok(Vec::new()),
            Some(slot) => match &slot.value {
                Value::Hash(h) => {
                    let mut pairs: Vec<_> = h.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                    pairs.sort();
                    Ok(pairs)
                }
                _ => Err(wrong_type()),
            },
        }
    }

    async fn list_push(&self, key: &str, values: &[String]) -> StoreResult<u64> {
        let _gate = self.check()?;
        if values.is_empty() {
            return Ok(match self.live(key) {
                Some(slot) => match &slot.value {
                    Value::List(l) => l.len() as u64,
                    _ => return Err(wrong_type()),
                },
                None => 0,
            });
        }
        let mut slot = self.live_or_insert(key, || Value::List(VecDeque::new()));
        let Value::List(l) = &mut slot.value else {
            return Err(wrong_type());
        };
        l.extend(values.iter().cloned());
        Ok(l.len() as u64)
    }

    async fn list_pop(&self, key: &str) -> StoreResult<Option<String>> {
        let _gate = self.check()?;
        let popped = match self.live(key) {
            None => None,
            Some(mut slot) => match &mut slot.value {
                Value::List(l) => l.pop_front(),
                _ => return Err(wrong_type()),
            },
        };
        self.drop_if_empty(key);
        Ok(popped)
    }

    async fn list_range(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        let _gate = self.check()?;
        match self.live(key) {
            None => Ok(Vec::new()),
            Some(slot) => match &slot.value {
                Value::List(l) => Ok(normalize_range(l.len(), start, stop)
                    .map(|(s, e)| l.range(s..=e).cloned().collect())
                    .unwrap_or_default()),
                _ => Err(wrong_type()),
            },
        }
    }

    async fn set_add(&self, key: &str, members: &[String]) -> StoreResult<u64> {
        let _gate = self.check()?;
        if members.is_empty() {
            return Ok(0);
        }
        let mut slot = self.live_or_insert(key, || Value::Set(HashSet::new()));
        let Value::Set(s) = &mut slot.value else {
            return Err(wrong_type());
        };
        Ok(members.iter().filter(|m| s.insert((*m).clone())).count() as u64)
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> StoreResult<u64> {
        let _gate = self.check()?;
        let removed = match self.live(key) {
            None => 0,
            Some(mut slot) => match &mut slot.value {
                Value::Set(s) => members.iter().filter(|m| s.remove(*m)).count() as u64,
                _ => return Err(wrong_type()),
            },
        };
        self.drop_if_empty(key);
        Ok(removed)
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let _gate = self.check()?;
        match self.live(key) {
            None => Ok(Vec::new()),
            Some(slot) => match &slot.value {
                Value::Set(s) => {
                    let mut members: Vec<_> = s.iter().cloned().collect();
                    members.sort_unstable();
                    Ok(members)
                }
                _ => Err(wrong_type()),
            },
        }
    }

    async fn zset_add(&self, key: &str, member: &str, score: f64) -> StoreResult<bool> {
        let _gate = self.check()?;
        let mut slot = self.live_or_insert(key, || Value::ZSet(HashMap::new()));
        let Value::ZSet(z) = &mut slot.value else {
            return Err(wrong_type());
        };
        Ok(z.insert(member.to_string(), score).is_none())
    }

    async fn zset_rank(&self, key: &str, member: &str) -> StoreResult<Option<u64>> {
        let _gate = self.check()?;
        match self.live(key) {
            None => Ok(None),
            Some(slot) => match &slot.value {
                Value::ZSet(z) => Ok(sorted_zset(z)
                    .iter()
                    .position(|(m, _)| m == member)
                    .map(|p| p as u64)),
                _ => Err(wrong_type()),
            },
        }
    }

    async fn zset_range(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> StoreResult<Vec<(String, f64)>> {
        let _gate = self.check()?;
        match self.live(key) {
            None => Ok(Vec::new()),
            Some(slot) => match &slot.value {
                Value::ZSet(z) => {
                    let sorted = sorted_zset(z);
                    Ok(normalize_range(sorted.len(), start, stop)
                        .map(|(s, e)| sorted[s..=e].to_vec())
                        .unwrap_or_default())
                }
                _ => Err(wrong_type()),
            },
        }
    }

    async fn zset_score(&self, key: &str, member: &str) -> StoreResult<Option<f64>> {
        let _gate = self.check()?;
        match self.live(key) {
            None => Ok(None),
            Some(slot) => match &slot.value {
                Value::ZSet(z) => Ok(z.get(member).copied()),
                _ => Err(wrong_type()),
            },
        }
    }

    async fn zset_incr(&self, key: &str, member: &str, delta: f64) -> StoreResult<f64> {
        let _gate = self.check()?;
        let mut slot = self.live_or_insert(key, || Value::ZSet(HashMap::new()));
        let Value::ZSet(z) = &mut slot.value else {
            return Err(wrong_type());
        };
        let score = z.entry(member.to_string()).or_insert(0.0);
        *score += delta;
        Ok(*score)
    }

    async fn stream_add(&self, key: &str, fields: &[(String, String)]) -> StoreResult<String> {
        let _gate = self.check()?;
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let id = format!("{millis}-{}", self.stream_seq.fetch_add(1, Ordering::Relaxed));
        let mut slot = self.live_or_insert(key, || Value::Stream(Vec::new()));
        let Value::Stream(entries) = &mut slot.value else {
            return Err(wrong_type());
        };
        entries.push((id.clone(), fields.to_vec()));
        Ok(id)
    }

    async fn stream_len(&self, key: &str) -> StoreResult<u64> {
        let _gate = self.check()?;
        match self.live(key) {
            None => Ok(0),
            Some(slot) => match &slot.value {
                Value::Stream(entries) => Ok(entries.len() as u64),
                _ => Err(wrong_type()),
            },
        }
    }

    async fn run_script(
        &self,
        script: &AtomicScript,
        keys: &[String],
        args: &[String],
    ) -> StoreResult<ScriptReply> {
        if script.name() == scripts::TAG_SWEEP.name() {
            let _gate = self.check_exclusive()?;
            return self.script_tag_sweep(keys);
        }
        let _gate = self.check()?;
        match script.name() {
            n if n == scripts::COMPARE_AND_DELETE.name() => self.script_compare_and_delete(keys, args),
            n if n == scripts::COMPARE_AND_PEXPIRE.name() => {
                self.script_compare_and_pexpire(keys, args)
            }
            n if n == scripts::FIXED_WINDOW_INCR.name() => self.script_fixed_window_incr(keys, args),
            n if n == scripts::TAG_ATTACH.name() => self.script_tag_attach(keys, args),
            other => Err(StoreError::UnsupportedScript {
                name: other.to_string(),
            }),
        }
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check().map(|_| ())
    }

    async fn disconnect(&self) {
        self.set_unavailable(true);
        self.map.clear();
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(k: &str) -> Vec<String> {
        vec![k.to_string()]
    }

    fn args(a: &[&str]) -> Vec<String> {
        a.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_get_with_expiry() {
        let store = MemoryStore::new();
        store
            .set("k", b"v", Some(Duration::from_secs(10)))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.ttl("k").await.unwrap(), KeyTtl::Expires(10));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.ttl("k").await.unwrap(), KeyTtl::Missing);
    }

    #[test]
    fn test_persistent_ttl_and_delete_count() {
        tokio_test::block_on(async {
            let store = MemoryStore::new();
            store.set("a", b"1", None).await.unwrap();
            store.set("b", b"2", None).await.unwrap();
            assert_eq!(store.ttl("a").await.unwrap(), KeyTtl::Persistent);
            let deleted = store
                .delete(&["a".into(), "b".into(), "missing".into()])
                .await
                .unwrap();
            assert_eq!(deleted, 2);
            assert!(store.is_empty());
        });
    }

    #[tokio::test]
    async fn test_set_if_absent() {
        let store = MemoryStore::new();
        assert!(store.set_if_absent("lock", b"a", Duration::from_secs(5)).await.unwrap());
        assert!(!store.set_if_absent("lock", b"b", Duration::from_secs(5)).await.unwrap());
        assert_eq!(store.get("lock").await.unwrap(), Some(b"a".to_vec()));
    }

    #[tokio::test]
    async fn test_wrong_type_is_command_error() {
        let store = MemoryStore::new();
        store.set("k", b"v", None).await.unwrap();
        let err = store.set_add("k", &args(&["m"])).await.unwrap_err();
        assert!(err.to_string().contains("WRONGTYPE"));
    }

    #[tokio::test]
    async fn test_empty_set_disappears() {
        let store = MemoryStore::new();
        store.set_add("s", &args(&["a", "b"])).await.unwrap();
        assert_eq!(store.set_remove("s", &args(&["a", "b"])).await.unwrap(), 2);
        assert!(!store.exists("s").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_and_zset_ranges() {
        let store = MemoryStore::new();
        store.list_push("l", &args(&["a", "b", "c"])).await.unwrap();
        assert_eq!(store.list_range("l", 0, -1).await.unwrap(), args(&["a", "b", "c"]));
        assert_eq!(store.list_range("l", -2, 10).await.unwrap(), args(&["b", "c"]));
        assert_eq!(store.list_pop("l").await.unwrap(), Some("a".to_string()));

        store.zset_add("z", "alice", 3.0).await.unwrap();
        store.zset_add("z", "bob", 1.0).await.unwrap();
        assert_eq!(store.zset_incr("z", "bob", 5.0).await.unwrap(), 6.0);
        assert_eq!(store.zset_rank("z", "alice").await.unwrap(), Some(0));
        let range = store.zset_range("z", 0, -1).await.unwrap();
        assert_eq!(range, vec![("alice".to_string(), 3.0), ("bob".to_string(), 6.0)]);
    }

    #[tokio::test]
    async fn test_scan_match_glob() {
        let store = MemoryStore::new();
        store.set("p:cache:user:1", b"x", None).await.unwrap();
        store.set("p:cache:user:2", b"x", None).await.unwrap();
        store.set("p:cache:post:1", b"x", None).await.unwrap();
        let keys = store.scan_match("p:cache:user:*", 100).await.unwrap();
        assert_eq!(keys, args(&["p:cache:user:1", "p:cache:user:2"]));
    }

    #[tokio::test]
    async fn test_compare_and_delete_script() {
        let store = MemoryStore::new();
        store.set("lock", b"owner-a", None).await.unwrap();
        let reply = store
            .run_script(&scripts::COMPARE_AND_DELETE, &keys("lock"), &args(&["owner-b"]))
            .await
            .unwrap();
        assert_eq!(reply.as_int(), Some(0));
        assert!(store.exists("lock").await.unwrap());

        let reply = store
            .run_script(&scripts::COMPARE_AND_DELETE, &keys("lock"), &args(&["owner-a"]))
            .await
            .unwrap();
        assert_eq!(reply.as_int(), Some(1));
        assert!(!store.exists("lock").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_window_expiry_set_once() {
        let store = MemoryStore::new();
        let (k, a) = (keys("c"), args(&["60"]));

        let first = store
            .run_script(&scripts::FIXED_WINDOW_INCR, &k, &a)
            .await
            .unwrap();
        assert_eq!(first.as_array().unwrap()[0].as_int(), Some(1));
        tokio::time::advance(Duration::from_secs(20)).await;
        let second = store
            .run_script(&scripts::FIXED_WINDOW_INCR, &k, &a)
            .await
            .unwrap();
        let items = second.as_array().unwrap();
        assert_eq!(items[0].as_int(), Some(2));
        // Not refreshed by the second increment.
        assert_eq!(items[1].as_int(), Some(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tag_attach_never_shortens() {
        let store = MemoryStore::new();
        store
            .run_script(&scripts::TAG_ATTACH, &keys("t"), &args(&["k1", "100"]))
            .await
            .unwrap();
        store
            .run_script(&scripts::TAG_ATTACH, &keys("t"), &args(&["k2", "10"]))
            .await
            .unwrap();
        assert_eq!(store.ttl("t").await.unwrap(), KeyTtl::Expires(100));

        store
            .run_script(&scripts::TAG_ATTACH, &keys("t"), &args(&["k3", "500"]))
            .await
            .unwrap();
        assert_eq!(store.ttl("t").await.unwrap(), KeyTtl::Expires(500));

        store
            .run_script(&scripts::TAG_ATTACH, &keys("t"), &args(&["k4", "0"]))
            .await
            .unwrap();
        assert_eq!(store.ttl("t").await.unwrap(), KeyTtl::Persistent);
        assert_eq!(store.set_members("t").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_tag_sweep_removes_members_with_their_membership() {
        let store = MemoryStore::new();
        for k in ["a", "b", "c"] {
            store.set(k, b"v", None).await.unwrap();
            store.set_add(&format!("meta:{k}"), &args(&["t"])).await.unwrap();
        }
        store.set_add("t", &args(&["a", "b", "c", "gone"])).await.unwrap();

        let reply = store
            .run_script(
                &scripts::TAG_SWEEP,
                &args(&["t", "a", "meta:a", "b", "meta:b", "gone", "meta:gone"]),
                &[],
            )
            .await
            .unwrap();
        assert_eq!(reply.as_int(), Some(2));
        assert!(!store.exists("a").await.unwrap());
        assert!(!store.exists("meta:b").await.unwrap());
        assert_eq!(store.set_members("t").await.unwrap(), vec!["c"]);
        assert!(store.exists("c").await.unwrap());

        let err = store
            .run_script(&scripts::TAG_SWEEP, &args(&["t", "c"]), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Command { .. }));
    }

    #[tokio::test]
    async fn test_scan_match_honours_backslash_escapes() {
        let store = MemoryStore::new();
        store.set("t*:cache:a", b"x", None).await.unwrap();
        store.set("tx:cache:a", b"x", None).await.unwrap();
        let keys = store.scan_match(r"t\*:cache:*", 100).await.unwrap();
        assert_eq!(keys, args(&["t*:cache:a"]));
        assert_eq!(store.scan_match("t*:cache:*", 100).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unbounded_ttl_never_expires() {
        let store = MemoryStore::new();
        store.set("a", b"v", Some(Duration::MAX)).await.unwrap();
        assert!(store.set_if_absent("b", b"v", Duration::MAX).await.unwrap());
        assert!(store.expire("b", Duration::MAX).await.unwrap());
        assert_eq!(store.ttl("a").await.unwrap(), KeyTtl::Persistent);
        assert_eq!(store.ttl("b").await.unwrap(), KeyTtl::Persistent);
    }

    #[tokio::test]
    async fn test_unknown_script_rejected() {
        let store = MemoryStore::new();
        let script = AtomicScript::new("custom", "return 1");
        let err = store.run_script(&script, &[], &[]).await.unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedScript { .. }));
    }

    #[tokio::test]
    async fn test_unavailable_fails_everything() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(store.get("k").await, Err(StoreError::Unavailable)));
        assert!(!store.is_healthy().await);
        store.set_unavailable(false);
        assert!(store.is_healthy().await);
    }
}
