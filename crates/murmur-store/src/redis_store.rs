//! Redis-backed store client over a deadpool connection pool.
//!
//! ## Reconnect Policy
//!
//! - **Connection failures** (I/O, refused, dropped, timeout, pool exhaustion):
//!   the broken connection is detached from the pool and the command is
//!   retried with capped, jittered exponential backoff, at most
//!   `max_retries_per_request` times. A command that is not safe to apply
//!   twice (`INCRBY`, `SET NX`, pushes, pops, counter scripts) is only retried
//!   if it never left the client, i.e. the pool checkout failed.
//! - **`READONLY` replies**: the connection points at a demoted primary. It is
//!   detached and the command retried immediately, since the next checkout
//!   resolves the new topology.
//! - **Command errors** surface at once.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool, PoolConfig, Runtime};
use redis::{FromRedisValue, RedisResult};

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::retry::Backoff;
use crate::traits::{AtomicScript, KeyTtl, KvStore, ScriptReply, StoreResult};

/// Store client for a single logical Redis deployment.
///
/// The pool is closed on [`disconnect`](KvStore::disconnect) or when the last
/// owner drops the client, whichever comes first.
pub struct RedisStore {
    pool: Pool,
    max_retries: u32,
    backoff: Backoff,
    closed: AtomicBool,
}

impl RedisStore {
    /// Build the pool and, if `ready_check` is on, wait for a PING reply.
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let mut redis_config = deadpool_redis::Config::from_connection_info(config.connection_info());
        let mut pool_config = PoolConfig::new(config.pool_size);
        pool_config.timeouts.wait = Some(config.timeout());
        pool_config.timeouts.create = Some(config.timeout());
        pool_config.timeouts.recycle = Some(config.timeout());
        redis_config.pool = Some(pool_config);

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StoreError::pool(format!("failed to create Redis pool: {e}")))?;

        let store = Self {
            pool,
            max_retries: config.max_retries_per_request,
            backoff: Backoff::default(),
            closed: AtomicBool::new(false),
        };

        if config.ready_check {
            store.ping().await?;
        }

        tracing::info!(
            addr = %config.display_addr(),
            pool_size = config.pool_size,
            ready_check = config.ready_check,
            "Connected to Redis"
        );
        Ok(store)
    }

    /// Override the reconnect backoff schedule.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(StoreError::Unavailable)
        } else {
            Ok(())
        }
    }

    fn classify(conn: Connection, e: redis::RedisError) -> StoreError {
        let err = StoreError::from(e);
        if err.is_connection() {
            // Detach so the pool opens a fresh connection on next checkout.
            drop(Connection::take(conn));
        }
        err
    }

    /// Run an idempotent command.
    async fn exec<T: FromRedisValue + Send>(&self, cmd: &redis::Cmd) -> StoreResult<T> {
        self.exec_with(cmd, true).await
    }

    /// Run a command that must not be applied twice.
    async fn exec_once<T: FromRedisValue + Send>(&self, cmd: &redis::Cmd) -> StoreResult<T> {
        self.exec_with(cmd, false).await
    }

    async fn exec_with<T: FromRedisValue + Send>(
        &self,
        cmd: &redis::Cmd,
        idempotent: bool,
    ) -> StoreResult<T> {
        self.ensure_open()?;
        let mut attempt = 0;
        loop {
            let (err, sent) = match self.pool.get().await {
                Ok(mut conn) => {
                    let reply: RedisResult<T> = cmd.query_async(&mut conn).await;
                    match reply {
                        Ok(value) => return Ok(value),
                        Err(e) => (Self::classify(conn, e), true),
                    }
                }
                Err(e) => (StoreError::from(e), false),
            };
            let replayable = idempotent || !sent;
            let Some(delay) = retry_delay(&err, attempt, self.max_retries, replayable, &self.backoff)
            else {
                return Err(err);
            };
            tracing::warn!(error = %err, attempt, delay_ms = delay.as_millis() as u64, "Redis command failed, retrying");
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }

    async fn exec_script(
        &self,
        script: &redis::Script,
        idempotent: bool,
        keys: &[String],
        args: &[String],
    ) -> StoreResult<ScriptReply> {
        self.ensure_open()?;
        let mut attempt = 0;
        loop {
            let (err, sent) = match self.pool.get().await {
                Ok(mut conn) => {
                    let mut invocation = script.prepare_invoke();
                    for key in keys {
                        invocation.key(key);
                    }
                    for arg in args {
                        invocation.arg(arg);
                    }
                    let reply: RedisResult<ScriptReply> = invocation.invoke_async(&mut conn).await;
                    match reply {
                        Ok(value) => return Ok(value),
                        Err(e) => (Self::classify(conn, e), true),
                    }
                }
                Err(e) => (StoreError::from(e), false),
            };
            let replayable = idempotent || !sent;
            let Some(delay) = retry_delay(&err, attempt, self.max_retries, replayable, &self.backoff)
            else {
                return Err(err);
            };
            tracing::warn!(error = %err, attempt, "Redis script failed, retrying");
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }
}

/// Decide whether a failed attempt is retried and after how long.
///
/// `replayable` is false when the command may already have been applied and
/// applying it again would change the result.
fn retry_delay(
    err: &StoreError,
    attempt: u32,
    max_retries: u32,
    replayable: bool,
    backoff: &Backoff,
) -> Option<Duration> {
    if attempt >= max_retries {
        return None;
    }
    match err {
        // Rejected before execution.
        StoreError::ReadOnly { .. } => Some(Duration::ZERO),
        e if e.is_connection() && replayable => Some(backoff.jittered(attempt)),
        _ => None,
    }
}

/// Milliseconds for `PX`/`PEXPIRE`, at least 1.
fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl KvStore for RedisStore {
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(millis(ttl));
        }
        self.exec::<()>(&cmd).await
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX").arg("PX").arg(millis(ttl));
        let reply: Option<String> = self.exec_once(&cmd).await?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.exec(redis::cmd("GET").arg(key)).await
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.exec(redis::cmd("DEL").arg(keys)).await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.exec(redis::cmd("EXISTS").arg(key)).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.exec(redis::cmd("PEXPIRE").arg(key).arg(millis(ttl))).await
    }

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        let secs: i64 = self.exec(redis::cmd("TTL").arg(key)).await?;
        Ok(KeyTtl::from_reply(secs))
    }

    async fn incr_by(&self, key: &str, delta: i64) -> StoreResult<i64> {
        self.exec_once(redis::cmd("INCRBY").arg(key).arg(delta)).await
    }

    async fn scan_match(&self, pattern: &str, count: usize) -> StoreResult<Vec<String>> {
        // SCAN may return a key more than once.
        let mut found = BTreeSet::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = self
                .exec(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(count.max(1)),
                )
                .await?;
            found.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(found.into_iter().collect())
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.exec::<()>(redis::cmd("HSET").arg(key).arg(field).arg(value))
            .await
    }

    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        self.exec(redis::cmd("HGET").arg(key).arg(field)).await
    }

    async fn hash_delete(&self, key: &str, fields: &[String]) -> StoreResult<u64> {
        if fields.is_empty() {
            return Ok(0);
        }
        self.exec(redis::cmd("HDEL").arg(key).arg(fields)).await
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<Vec<(String, String)>> {
        self.exec(redis::cmd("HGETALL").arg(key)).await
    }

    async fn list_push(&self, key: &str, values: &[String]) -> StoreResult<u64> {
        if values.is_empty() {
            return self.exec(redis::cmd("LLEN").arg(key)).await;
        }
        self.exec_once(redis::cmd("RPUSH").arg(key).arg(values)).await
    }

    async fn list_pop(&self, key: &str) -> StoreResult<Option<String>> {
        self.exec_once(redis::cmd("LPOP").arg(key)).await
    }

    async fn list_range(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        self.exec(redis::cmd("LRANGE").arg(key).arg(start).arg(stop))
            .await
    }

    async fn set_add(&self, key: &str, members: &[String]) -> StoreResult<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        self.exec(redis::cmd("SADD").arg(key).arg(members)).await
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> StoreResult<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        self.exec(redis::cmd("SREM").arg(key).arg(members)).await
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        self.exec(redis::cmd("SMEMBERS").arg(key)).await
    }

    async fn zset_add(&self, key: &str, member: &str, score: f64) -> StoreResult<bool> {
        let added: u64 = self
            .exec(redis::cmd("ZADD").arg(key).arg(score).arg(member))
            .await?;
        Ok(added > 0)
    }

    async fn zset_rank(&self, key: &str, member: &str) -> StoreResult<Option<u64>> {
        self.exec(redis::cmd("ZRANK").arg(key).arg(member)).await
    }

    async fn zset_range(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> StoreResult<Vec<(String, f64)>> {
        self.exec(
            redis::cmd("ZRANGE")
                .arg(key)
                .arg(start)
                .arg(stop)
                .arg("WITHSCORES"),
        )
        .await
    }

    async fn zset_score(&self, key: &str, member: &str) -> StoreResult<Option<f64>> {
        self.exec(redis::cmd("ZSCORE").arg(key).arg(member)).await
    }

    async fn zset_incr(&self, key: &str, member: &str, delta: f64) -> StoreResult<f64> {
        self.exec_once(redis::cmd("ZINCRBY").arg(key).arg(delta).arg(member))
            .await
    }

    async fn stream_add(&self, key: &str, fields: &[(String, String)]) -> StoreResult<String> {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(key).arg("*");
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }
        self.exec_once(&cmd).await
    }

    async fn stream_len(&self, key: &str) -> StoreResult<u64> {
        self.exec(redis::cmd("XLEN").arg(key)).await
    }

    async fn run_script(
        &self,
        script: &AtomicScript,
        keys: &[String],
        args: &[String],
    ) -> StoreResult<ScriptReply> {
        let lua = redis::Script::new(script.source());
        self.exec_script(&lua, script.is_replayable(), keys, args)
            .await
            .inspect_err(|e| {
            tracing::debug!(script = script.name(), error = %e, "script failed");
        })
    }

    async fn ping(&self) -> StoreResult<()> {
        let reply: String = self.exec(&redis::cmd("PING")).await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(StoreError::command(format!("unexpected PING reply: {reply}")))
        }
    }

    async fn disconnect(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.pool.close();
            tracing::info!("Disconnected from Redis");
        }
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

impl Drop for RedisStore {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.pool.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> Backoff {
        Backoff::new(Duration::from_millis(10), Duration::from_millis(80))
    }

    #[test]
    fn test_readonly_retries_immediately() {
        let err = StoreError::ReadOnly {
            message: "READONLY You can't write against a read only replica.".into(),
        };
        assert_eq!(retry_delay(&err, 0, 3, true, &backoff()), Some(Duration::ZERO));
        assert_eq!(retry_delay(&err, 2, 3, false, &backoff()), Some(Duration::ZERO));
        assert_eq!(retry_delay(&err, 3, 3, true, &backoff()), None);
    }

    #[test]
    fn test_connection_errors_back_off_until_limit() {
        let err = StoreError::connection("broken pipe");
        for attempt in 0..3 {
            let delay = retry_delay(&err, attempt, 3, true, &backoff()).unwrap();
            assert!(delay > Duration::ZERO);
            assert!(delay <= Duration::from_millis(80));
        }
        assert_eq!(retry_delay(&err, 3, 3, true, &backoff()), None);
        assert_eq!(retry_delay(&err, 0, 0, true, &backoff()), None);
    }

    #[test]
    fn test_sent_non_idempotent_command_is_not_replayed() {
        let err = StoreError::connection("connection reset");
        assert_eq!(retry_delay(&err, 0, 3, false, &backoff()), None);

        // A failed checkout never reached the server.
        let err = StoreError::pool("timed out waiting for connection");
        assert!(retry_delay(&err, 0, 3, true, &backoff()).is_some());
    }

    #[test]
    fn test_command_errors_are_final() {
        let err = StoreError::command("WRONGTYPE Operation against a key");
        assert_eq!(retry_delay(&err, 0, 3, true, &backoff()), None);
        assert_eq!(retry_delay(&StoreError::Unavailable, 0, 3, true, &backoff()), None);
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::ZERO), 1);
        assert_eq!(millis(Duration::from_secs(2)), 2000);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }
}
