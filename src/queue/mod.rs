//! Time-ordered delay queue
//!
//! A delay queue is an ordered set keyed by queue name. Each member is a
//! payload string; its score is the due time in epoch milliseconds. Producers
//! insert with a future due time, consumers atomically pull and remove
//! everything that is due.
//!
//! Delivery is at-least-once from the producer's point of view and at-most-once
//! per consumer call: selection and removal happen in one atomic store
//! operation, so two consumers never receive the same item. An item removed by
//! a consumer that then crashes is lost.
//!
//! # Example
//!
//! ```rust,ignore
//! use baton::queue::DelayQueue;
//!
//! let queue = DelayQueue::new(store.clone());
//! queue.publish("orders:expire", "order-42", Duration::from_secs(900), true).await?;
//!
//! // In a long-running job:
//! for payload in queue.consume("orders:expire", 20).await? {
//!     expire_order(&payload).await?;
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{self, Clock, SystemClock};
use crate::metrics;
use crate::store::{KvStore, StoreResult, SCORE_MAX, SCORE_MIN};

/// Default batch size for [`DelayQueue::consume`]
pub const DEFAULT_CONSUME_BATCH: usize = 20;

/// Snapshot of a delay queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    /// Number of items in the queue
    pub total: u64,
    /// Items whose due time has passed
    pub ready: u64,
    /// Items not yet due
    pub pending: u64,
    /// Earliest due time among pending items
    pub next_fire_at: Option<DateTime<Utc>>,
}

/// Producer/consumer API over an ordered set in the shared store
#[derive(Clone)]
pub struct DelayQueue {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
}

impl DelayQueue {
    /// Create a queue client using the system clock
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    /// Create a queue client with an injected clock
    pub fn with_clock(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    fn due_at(&self, delay: Duration) -> i64 {
        let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
        self.clock.now_millis().saturating_add(delay_ms)
    }

    /// Publish one payload, due after `delay`.
    ///
    /// With `overwrite` an already-queued payload is re-delayed to the new due
    /// time; without it the existing entry wins and this call is a no-op.
    /// Returns true if the payload was not queued before.
    pub async fn publish(
        &self,
        queue: &str,
        payload: &str,
        delay: Duration,
        overwrite: bool,
    ) -> StoreResult<bool> {
        let added = self
            .publish_batch(queue, &[payload.to_string()], delay, overwrite)
            .await?;
        Ok(added == 1)
    }

    /// Publish many payloads sharing one due time, in one store round trip.
    ///
    /// Conflicts follow the same `overwrite` rule per payload. Returns how many
    /// payloads were newly queued.
    pub async fn publish_batch(
        &self,
        queue: &str,
        payloads: &[String],
        delay: Duration,
        overwrite: bool,
    ) -> StoreResult<u64> {
        if payloads.is_empty() {
            return Ok(0);
        }

        let due_at = self.due_at(delay);
        let added = self.store.zadd(queue, payloads, due_at, overwrite).await?;

        tracing::debug!(
            queue = %queue,
            count = payloads.len(),
            added,
            due_at,
            overwrite,
            "Published delayed items"
        );
        metrics::record_queue_published(queue, payloads.len() as u64);

        Ok(added)
    }

    /// Atomically take up to `max_count` due payloads, earliest first
    pub async fn consume(&self, queue: &str, max_count: usize) -> StoreResult<Vec<String>> {
        if max_count == 0 {
            return Ok(Vec::new());
        }

        let now = self.clock.now_millis();
        let items = self
            .store
            .zrange_by_score_and_remove(queue, now, max_count)
            .await?;

        if !items.is_empty() {
            tracing::debug!(queue = %queue, count = items.len(), "Consumed due items");
            metrics::record_queue_consumed(queue, items.len() as u64);
        }
        Ok(items)
    }

    /// Counts and next due time.
    ///
    /// Informational only: the counts are read in separate round trips and
    /// may be mutually inconsistent under concurrent traffic.
    pub async fn status(&self, queue: &str) -> StoreResult<QueueStatus> {
        let now = self.clock.now_millis();
        let total = self.store.zcard(queue).await?;
        let ready = self.store.zcount(queue, SCORE_MIN, now).await?;
        let next = self
            .store
            .zrange_by_score(queue, now.saturating_add(1), SCORE_MAX, 0, 1)
            .await?;

        Ok(QueueStatus {
            total,
            ready,
            pending: total.saturating_sub(ready),
            next_fire_at: next
                .first()
                .and_then(|(_, score)| clock::from_millis(*score)),
        })
    }

    /// Cancel payloads that have not been delivered yet.
    ///
    /// Returns how many were actually removed.
    pub async fn remove(&self, queue: &str, payloads: &[String]) -> StoreResult<u64> {
        let removed = self.store.zrem(queue, payloads).await?;
        tracing::debug!(queue = %queue, requested = payloads.len(), removed, "Removed delayed items");
        Ok(removed)
    }
}
