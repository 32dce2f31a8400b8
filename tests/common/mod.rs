//! Common test utilities

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use baton::config::SchedulerConfig;
use baton::scheduler::JobContext;
use baton::store::{KvStore, MemoryStore, StoreError, StoreResult};

/// Scheduler config with a fixed pod id and no start jitter
pub fn test_config(pod: &str) -> SchedulerConfig {
    SchedulerConfig {
        pod_id: Some(pod.to_string()),
        max_initial_jitter_secs: 0,
        ..SchedulerConfig::default()
    }
}

/// Job body that counts its invocations
pub fn counting_job(
    counter: Arc<AtomicU64>,
) -> impl Fn(JobContext) -> futures::future::Ready<anyhow::Result<()>> + Send + Sync + 'static {
    move |_ctx| {
        counter.fetch_add(1, Ordering::SeqCst);
        futures::future::ready(Ok(()))
    }
}

/// Memory store that can be switched off to simulate an outage
#[derive(Default)]
pub struct SwitchableStore {
    inner: MemoryStore,
    down: AtomicBool,
}

impl SwitchableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that is down from the start
    pub fn unreachable() -> Self {
        let store = Self::new();
        store.set_down(true);
        store
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.down.load(Ordering::SeqCst) {
            let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "store is down");
            return Err(StoreError::Command(io.into()));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for SwitchableStore {
    async fn ping(&self) -> StoreResult<()> {
        self.check()?;
        self.inner.ping().await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        self.check()?;
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.check()?;
        self.inner.expire(key, ttl).await
    }

    async fn increment(&self, key: &str) -> StoreResult<i64> {
        self.check()?;
        self.inner.increment(key).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        self.check()?;
        self.inner.ttl(key).await
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        self.check()?;
        self.inner.compare_and_delete(key, expected).await
    }

    async fn compare_and_extend(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        self.check()?;
        self.inner.compare_and_extend(key, expected, ttl).await
    }

    async fn zadd(
        &self,
        set: &str,
        members: &[String],
        score: i64,
        overwrite: bool,
    ) -> StoreResult<u64> {
        self.check()?;
        self.inner.zadd(set, members, score, overwrite).await
    }

    async fn zrange_by_score_and_remove(
        &self,
        set: &str,
        max_score: i64,
        limit: usize,
    ) -> StoreResult<Vec<String>> {
        self.check()?;
        self.inner
            .zrange_by_score_and_remove(set, max_score, limit)
            .await
    }

    async fn zcard(&self, set: &str) -> StoreResult<u64> {
        self.check()?;
        self.inner.zcard(set).await
    }

    async fn zcount(&self, set: &str, min: i64, max: i64) -> StoreResult<u64> {
        self.check()?;
        self.inner.zcount(set, min, max).await
    }

    async fn zrange_by_score(
        &self,
        set: &str,
        min: i64,
        max: i64,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<(String, i64)>> {
        self.check()?;
        self.inner.zrange_by_score(set, min, max, offset, limit).await
    }

    async fn zrem(&self, set: &str, members: &[String]) -> StoreResult<u64> {
        self.check()?;
        self.inner.zrem(set, members).await
    }
}
