//! Lease renewal task
//!
//! One task per held lease. Every `lease / 3` it re-extends the TTL with an
//! atomic compare-and-extend. If the stored token no longer matches, the lease
//! is lost and the task exits; nothing else is notified.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};

use crate::clock::deadline_after;
use crate::metrics;
use crate::shutdown::{self, ShutdownTrigger};
use crate::store::KvStore;

/// Handle to a running renewal task. Dropping it stops renewal.
#[derive(Debug)]
pub(crate) struct Watchdog {
    stop: ShutdownTrigger,
    handle: JoinHandle<()>,
}

impl Watchdog {
    /// Spawn a renewal task for `key`/`token`
    pub(crate) fn spawn(
        store: Arc<dyn KvStore>,
        key: String,
        token: String,
        lease: Duration,
    ) -> Self {
        let (stop, signal) = shutdown::channel();
        let period = renew_period(lease);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(deadline_after(period), period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = signal.cancelled() => break,
                }

                match store.compare_and_extend(&key, &token, lease).await {
                    Ok(true) => {
                        tracing::trace!(key = %key, lease_ms = lease.as_millis() as u64, "Lease renewed");
                    }
                    Ok(false) => {
                        tracing::warn!(key = %key, "Lease lost before renewal, watchdog stopping");
                        metrics::record_watchdog_lost(&key);
                        break;
                    }
                    Err(e) => {
                        // Transient; the lease may still outlive the next attempt.
                        tracing::warn!(key = %key, error = %e, "Lease renewal failed");
                    }
                }
            }
        });

        Self { stop, handle }
    }

    /// Whether the task is still renewing
    pub(crate) fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Ask the task to stop. Does not wait.
    pub(crate) fn stop(&self) {
        self.stop.trigger();
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Renewal period for a lease: one third of its duration, at least 1ms
pub(crate) fn renew_period(lease: Duration) -> Duration {
    (lease / 3).max(Duration::from_millis(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_renew_period() {
        assert_eq!(renew_period(Duration::from_secs(30)), Duration::from_secs(10));
        assert_eq!(renew_period(Duration::from_nanos(1)), Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_keeps_key_alive() {
        let store = Arc::new(MemoryStore::new());
        let lease = Duration::from_secs(3);
        store.set_if_absent("lock:k", "t", lease).await.unwrap();

        let dog = Watchdog::spawn(store.clone(), "lock:k".into(), "t".into(), lease);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(dog.is_running());
        assert_eq!(store.get("lock:k").await.unwrap().as_deref(), Some("t"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_exits_when_token_stolen() {
        let store = Arc::new(MemoryStore::new());
        let lease = Duration::from_secs(3);
        store.set_if_absent("lock:k", "t", lease).await.unwrap();

        let dog = Watchdog::spawn(store.clone(), "lock:k".into(), "t".into(), lease);
        store.delete("lock:k").await.unwrap();
        store.set_if_absent("lock:k", "thief", lease).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(!dog.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_watchdog_lets_lease_expire() {
        let store = Arc::new(MemoryStore::new());
        let lease = Duration::from_secs(3);
        store.set_if_absent("lock:k", "t", lease).await.unwrap();

        let dog = Watchdog::spawn(store.clone(), "lock:k".into(), "t".into(), lease);
        tokio::time::sleep(Duration::from_secs(2)).await;
        drop(dog);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(store.get("lock:k").await.unwrap().is_none());
    }
}
