//! Redis-backed shared store
//!
//! Uses a `deadpool-redis` connection pool. The three correctness-critical
//! primitives run as Lua scripts so that the read and the write happen in one
//! server-side step.

use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::{AsyncCommands, Script};
use std::time::Duration;

use super::{ttl_millis, KvStore, StoreError, StoreResult, SCORE_MAX, SCORE_MIN};
use crate::config::StoreConfig;

const COMPARE_AND_DELETE: &str = r"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end";

const COMPARE_AND_EXTEND: &str = r"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('pexpire', KEYS[1], ARGV[2])
else
    return 0
end";

// ZREM is chunked to stay under Lua's unpack() stack limit.
const RANGE_AND_REMOVE: &str = r"
local elements = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
for i = 1, #elements, 500 do
    redis.call('ZREM', KEYS[1], unpack(elements, i, math.min(i + 499, #elements)))
end
return elements";

/// Redis implementation of [`KvStore`]
pub struct RedisStore {
    pool: Pool,
    key_prefix: String,
    compare_and_delete: Script,
    compare_and_extend: Script,
    range_and_remove: Script,
}

impl RedisStore {
    /// Build the pool and verify connectivity with a PING
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let store = Self::from_config(config)?;
        store.ping().await?;

        tracing::info!(url = %config.url, prefix = %config.key_prefix, "Connected to Redis");
        Ok(store)
    }

    /// Build the pool without touching the network.
    ///
    /// Connections are opened lazily, so a store created this way can be
    /// handed to the scheduler, which decides on degraded mode itself.
    pub fn from_config(config: &StoreConfig) -> StoreResult<Self> {
        let pool = PoolConfig::from_url(&config.url)
            .builder()
            .map_err(|e| StoreError::PoolCreate(e.to_string()))?
            .max_size(config.pool_size)
            .wait_timeout(Some(config.connect_timeout()))
            .create_timeout(Some(config.connect_timeout()))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| StoreError::PoolCreate(e.to_string()))?;

        Ok(Self {
            pool,
            key_prefix: config.key_prefix.clone(),
            compare_and_delete: Script::new(COMPARE_AND_DELETE),
            compare_and_extend: Script::new(COMPARE_AND_EXTEND),
            range_and_remove: Script::new(RANGE_AND_REMOVE),
        })
    }

    fn key(&self, key: &str) -> String {
        if self.key_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.key_prefix, key)
        }
    }

    async fn conn(&self) -> StoreResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }
}

fn score_arg(score: i64) -> String {
    match score {
        SCORE_MIN => "-inf".to_string(),
        SCORE_MAX => "+inf".to_string(),
        s => s.to_string(),
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let reply: String = redis::cmd("PING").query_async(&mut *conn).await?;
        if reply != "PONG" {
            return Err(StoreError::unexpected_reply("PING", reply));
        }
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let millis = ttl_millis(ttl)?;
        let mut conn = self.conn().await?;

        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(key))
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(millis)
            .query_async(&mut *conn)
            .await?;

        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn().await?;
        let value: Option<String> = conn.get(self.key(key)).await?;
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let millis = ttl_millis(ttl)?;
        let mut conn = self.conn().await?;
        let updated: bool = conn.pexpire(self.key(key), millis as i64).await?;
        Ok(updated)
    }

    async fn increment(&self, key: &str) -> StoreResult<i64> {
        let mut conn = self.conn().await?;
        let value: i64 = conn.incr(self.key(key), 1).await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let removed: u64 = conn.del(self.key(key)).await?;
        Ok(removed > 0)
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let mut conn = self.conn().await?;
        // -2: missing key, -1: no expiry
        let millis: i64 = conn.pttl(self.key(key)).await?;
        Ok(u64::try_from(millis).ok().map(Duration::from_millis))
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = self
            .compare_and_delete
            .key(self.key(key))
            .arg(expected)
            .invoke_async(&mut *conn)
            .await?;
        Ok(removed == 1)
    }

    async fn compare_and_extend(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let millis = ttl_millis(ttl)?;
        let mut conn = self.conn().await?;
        let extended: i64 = self
            .compare_and_extend
            .key(self.key(key))
            .arg(expected)
            .arg(millis)
            .invoke_async(&mut *conn)
            .await?;
        Ok(extended == 1)
    }

    async fn zadd(
        &self,
        set: &str,
        members: &[String],
        score: i64,
        overwrite: bool,
    ) -> StoreResult<u64> {
        if members.is_empty() {
            return Ok(0);
        }

        let mut cmd = redis::cmd("ZADD");
        cmd.arg(self.key(set));
        if !overwrite {
            cmd.arg("NX");
        }
        for member in members {
            cmd.arg(score).arg(member);
        }

        let mut conn = self.conn().await?;
        let added: u64 = cmd.query_async(&mut *conn).await?;
        Ok(added)
    }

    async fn zrange_by_score_and_remove(
        &self,
        set: &str,
        max_score: i64,
        limit: usize,
    ) -> StoreResult<Vec<String>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.conn().await?;
        let members: Vec<String> = self
            .range_and_remove
            .key(self.key(set))
            .arg(score_arg(max_score))
            .arg(limit)
            .invoke_async(&mut *conn)
            .await?;
        Ok(members)
    }

    async fn zcard(&self, set: &str) -> StoreResult<u64> {
        let mut conn = self.conn().await?;
        let count: u64 = conn.zcard(self.key(set)).await?;
        Ok(count)
    }

    async fn zcount(&self, set: &str, min: i64, max: i64) -> StoreResult<u64> {
        let mut conn = self.conn().await?;
        let count: u64 = conn
            .zcount(self.key(set), score_arg(min), score_arg(max))
            .await?;
        Ok(count)
    }

    async fn zrange_by_score(
        &self,
        set: &str,
        min: i64,
        max: i64,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<(String, i64)>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.conn().await?;
        let raw: Vec<(String, f64)> = redis::cmd("ZRANGEBYSCORE")
            .arg(self.key(set))
            .arg(score_arg(min))
            .arg(score_arg(max))
            .arg("WITHSCORES")
            .arg("LIMIT")
            .arg(offset)
            .arg(limit)
            .query_async(&mut *conn)
            .await?;

        Ok(raw
            .into_iter()
            .map(|(member, score)| (member, score as i64))
            .collect())
    }

    async fn zrem(&self, set: &str, members: &[String]) -> StoreResult<u64> {
        if members.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn().await?;
        let removed: u64 = conn.zrem(self.key(set), members).await?;
        Ok(removed)
    }
}
