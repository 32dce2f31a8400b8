//! Lease-based distributed lock
//!
//! A lease is a single store key `lock:{name}` whose value is a random holder
//! token and whose TTL is the lease duration. Only the holder of the matching
//! token can release or extend it; both go through atomic compare-and-*
//! primitives. A holder that dies simply stops renewing and the key expires.
//!
//! # Example
//!
//! ```rust,ignore
//! use baton::lock::{AcquireOptions, LeaseLock};
//! use baton::shutdown::Shutdown;
//!
//! let locks = LeaseLock::new(store.clone());
//!
//! // Non-blocking
//! if let Some(lease) = locks.try_acquire("report", Duration::from_secs(30)).await? {
//!     do_work().await;
//!     locks.release(lease).await?;
//! }
//!
//! // Wait up to 10s, renewing in the background once held
//! let options = AcquireOptions::default().max_wait(Duration::from_secs(10));
//! if let Some(lease) = locks.acquire("report", Duration::from_secs(30), &options, &Shutdown::never()).await? {
//!     // ...
//! }
//! ```

mod watchdog;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::clock::deadline_after;
use crate::metrics;
use crate::shutdown::Shutdown;
use crate::store::{KvStore, StoreResult};

use self::watchdog::Watchdog;

/// Prefix applied to every lock name
pub const LOCK_PREFIX: &str = "lock:";

/// Default pause between attempts in [`LeaseLock::acquire`]
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A held lease.
///
/// Dropping a `Lease` stops its watchdog but does not delete the key; the
/// lease then expires on its TTL. Call [`LeaseLock::release`] to hand it back
/// immediately.
#[derive(Debug)]
pub struct Lease {
    name: String,
    key: String,
    token: String,
    duration: Duration,
    acquired_at: DateTime<Utc>,
    watchdog: Option<Watchdog>,
}

impl Lease {
    /// Lock name as passed by the caller
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store key (`lock:{name}`)
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Random holder token stored as the key's value
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Lease duration (TTL written on acquire and on every renewal)
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// When the lease was acquired
    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// Expiry as of acquisition; a running watchdog keeps pushing it forward
    pub fn expires_at(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.duration)
            .ok()
            .and_then(|d| self.acquired_at.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whether a watchdog is attached and still renewing
    pub fn is_renewing(&self) -> bool {
        self.watchdog.as_ref().is_some_and(Watchdog::is_running)
    }

    fn stop_watchdog(&mut self) {
        if let Some(dog) = self.watchdog.take() {
            dog.stop();
        }
    }
}

/// Options for [`LeaseLock::acquire`]
#[derive(Debug, Clone)]
pub struct AcquireOptions {
    /// Give up after this long; defaults to the lease duration
    pub max_wait: Option<Duration>,

    /// Pause between attempts
    pub poll_interval: Duration,

    /// Attach a renewal watchdog once acquired
    pub watchdog: bool,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self {
            max_wait: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            watchdog: true,
        }
    }
}

impl AcquireOptions {
    /// Set the maximum wait
    pub fn max_wait(mut self, wait: Duration) -> Self {
        self.max_wait = Some(wait);
        self
    }

    /// Set the poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Enable or disable the watchdog
    pub fn watchdog(mut self, enabled: bool) -> Self {
        self.watchdog = enabled;
        self
    }
}

/// Snapshot of a lock key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockStatus {
    /// Lock name
    pub name: String,
    /// Whether any holder currently owns it
    pub locked: bool,
    /// Remaining TTL when locked
    pub remaining_ttl: Option<Duration>,
}

/// Acquires, renews and releases leases in the shared store
#[derive(Clone)]
pub struct LeaseLock {
    store: Arc<dyn KvStore>,
}

impl LeaseLock {
    /// Create a lock client over an injected store
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Store key for a lock name
    pub fn key_for(name: &str) -> String {
        format!("{LOCK_PREFIX}{name}")
    }

    /// Single non-blocking attempt, without watchdog
    pub async fn try_acquire(&self, name: &str, lease: Duration) -> StoreResult<Option<Lease>> {
        self.try_acquire_with(name, lease, false).await
    }

    /// Single non-blocking attempt, optionally attaching a watchdog
    pub async fn try_acquire_with(
        &self,
        name: &str,
        lease: Duration,
        watchdog: bool,
    ) -> StoreResult<Option<Lease>> {
        let key = Self::key_for(name);
        let token = uuid::Uuid::new_v4().simple().to_string();

        if !self.store.set_if_absent(&key, &token, lease).await? {
            tracing::debug!(key = %key, "Lock held elsewhere");
            metrics::record_lock_attempt(name, false);
            return Ok(None);
        }

        tracing::debug!(key = %key, lease_ms = lease.as_millis() as u64, watchdog, "Lock acquired");
        metrics::record_lock_attempt(name, true);

        let watchdog = watchdog
            .then(|| Watchdog::spawn(self.store.clone(), key.clone(), token.clone(), lease));

        Ok(Some(Lease {
            name: name.to_string(),
            key,
            token,
            duration: lease,
            acquired_at: Utc::now(),
            watchdog,
        }))
    }

    /// Retry [`try_acquire`](Self::try_acquire) every `poll_interval` until
    /// success, `max_wait` elapses, or `cancel` fires.
    ///
    /// Returns `Ok(None)` on timeout or cancellation. Cancellation is observed
    /// immediately, not at the next poll.
    pub async fn acquire(
        &self,
        name: &str,
        lease: Duration,
        options: &AcquireOptions,
        cancel: &Shutdown,
    ) -> StoreResult<Option<Lease>> {
        let max_wait = options.max_wait.unwrap_or(lease);
        let deadline = deadline_after(max_wait);

        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            if let Some(held) = self.try_acquire_with(name, lease, options.watchdog).await? {
                return Ok(Some(held));
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::debug!(lock = %name, waited_ms = max_wait.as_millis() as u64, "Lock wait timed out");
                return Ok(None);
            }

            let pause = options.poll_interval.min(deadline - now);
            if !cancel.sleep(pause).await {
                tracing::debug!(lock = %name, "Lock wait cancelled");
                return Ok(None);
            }
        }
    }

    /// Release a lease if this holder still owns it.
    ///
    /// Returns false if the lease had already expired or been taken over.
    pub async fn release(&self, mut lease: Lease) -> StoreResult<bool> {
        lease.stop_watchdog();
        let released = self
            .store
            .compare_and_delete(&lease.key, &lease.token)
            .await?;

        if released {
            tracing::debug!(key = %lease.key, "Lock released");
        } else {
            tracing::warn!(key = %lease.key, "Lock was no longer held at release");
        }
        Ok(released)
    }

    /// Extend a lease by hand. Returns false if it is no longer held.
    pub async fn renew(&self, lease: &Lease) -> StoreResult<bool> {
        self.store
            .compare_and_extend(&lease.key, &lease.token, lease.duration)
            .await
    }

    /// Inspect a lock
    pub async fn status(&self, name: &str) -> StoreResult<LockStatus> {
        let key = Self::key_for(name);
        let holder = self.store.get(&key).await?;
        let remaining_ttl = match holder {
            Some(_) => self.store.ttl(&key).await?,
            None => None,
        };

        Ok(LockStatus {
            name: name.to_string(),
            locked: holder.is_some(),
            remaining_ttl,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown;
    use crate::store::MemoryStore;

    fn locks() -> (Arc<MemoryStore>, LeaseLock) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), LeaseLock::new(store))
    }

    #[tokio::test]
    async fn test_try_acquire_is_exclusive() {
        let (_, locks) = locks();
        let lease = Duration::from_secs(30);

        let first = locks.try_acquire("job", lease).await.unwrap();
        assert!(first.is_some());
        assert!(locks.try_acquire("job", lease).await.unwrap().is_none());
        assert!(locks.try_acquire("other", lease).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_release_frees_the_key() {
        let (store, locks) = locks();
        let lease = locks
            .try_acquire("job", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lease.key(), "lock:job");
        assert_eq!(store.get("lock:job").await.unwrap().as_deref(), Some(lease.token()));

        assert!(locks.release(lease).await.unwrap());
        assert!(store.get("lock:job").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_after_takeover_is_noop() {
        let (store, locks) = locks();
        let stale = locks
            .try_acquire("job", Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        let fresh = locks
            .try_acquire("job", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();

        assert!(!locks.release(stale).await.unwrap());
        assert_eq!(store.get("lock:job").await.unwrap().as_deref(), Some(fresh.token()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_release() {
        let (_, locks) = locks();
        let held = locks
            .try_acquire("job", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let options = AcquireOptions::default()
                    .max_wait(Duration::from_secs(10))
                    .poll_interval(Duration::from_millis(200));
                locks
                    .acquire("job", Duration::from_secs(30), &options, &Shutdown::never())
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(2)).await;
        locks.release(held).await.unwrap();

        let lease = waiter.await.unwrap().unwrap();
        assert!(lease.is_some());
        assert!(lease.unwrap().is_renewing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_times_out() {
        let (_, locks) = locks();
        let _held = locks
            .try_acquire("job", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();

        let start = Instant::now();
        let options = AcquireOptions::default().max_wait(Duration::from_secs(3));
        let lease = locks
            .acquire("job", Duration::from_secs(60), &options, &Shutdown::never())
            .await
            .unwrap();

        assert!(lease.is_none());
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_cancellation_is_prompt() {
        let (_, locks) = locks();
        let _held = locks
            .try_acquire("job", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();

        let (trigger, cancel) = shutdown::channel();
        let start = Instant::now();
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let options = AcquireOptions::default()
                    .max_wait(Duration::from_secs(60))
                    .poll_interval(Duration::from_secs(10));
                locks
                    .acquire("job", Duration::from_secs(60), &options, &cancel)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.trigger();

        assert!(waiter.await.unwrap().unwrap().is_none());
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_ttl() {
        let (_, locks) = locks();
        let status = locks.status("job").await.unwrap();
        assert!(!status.locked);
        assert_eq!(status.remaining_ttl, None);

        let _lease = locks
            .try_acquire("job", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;

        let status = locks.status("job").await.unwrap();
        assert!(status.locked);
        assert_eq!(status.remaining_ttl, Some(Duration::from_secs(20)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_renew() {
        let (_, locks) = locks();
        let lease = locks
            .try_acquire("job", Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(locks.renew(&lease).await.unwrap());
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(locks.status("job").await.unwrap().locked);
        assert!(!lease.is_renewing());
        assert!(lease.expires_at() > lease.acquired_at());
    }
}
