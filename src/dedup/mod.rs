//! Run-once deduplication gate
//!
//! A dedup marker is a key `dedup:{name}` written with set-if-absent and a TTL
//! equal to the window. Whoever creates it first, on any replica, wins the
//! window; everyone else sees `false` until it expires. There is no release:
//! expiry is the only way a marker goes away.

use std::sync::Arc;
use std::time::Duration;

use crate::metrics;
use crate::store::{KvStore, StoreResult};

/// Prefix applied to every dedup marker
pub const DEDUP_PREFIX: &str = "dedup:";

/// One-shot idempotency check over the shared store
#[derive(Clone)]
pub struct DedupGate {
    store: Arc<dyn KvStore>,
    owner: String,
}

impl DedupGate {
    /// Create a gate; `owner` is written as the marker value (usually the pod id)
    pub fn new(store: Arc<dyn KvStore>, owner: impl Into<String>) -> Self {
        Self {
            store,
            owner: owner.into(),
        }
    }

    /// Store key for a dedup name
    pub fn key_for(name: &str) -> String {
        format!("{DEDUP_PREFIX}{name}")
    }

    /// Claim `name` for `window`. True iff this call created the marker.
    pub async fn try_claim(&self, name: &str, window: Duration) -> StoreResult<bool> {
        let key = Self::key_for(name);
        let claimed = self.store.set_if_absent(&key, &self.owner, window).await?;

        tracing::debug!(
            key = %key,
            owner = %self.owner,
            window_secs = window.as_secs(),
            claimed,
            "Dedup claim"
        );
        metrics::record_dedup_claim(name, claimed);

        Ok(claimed)
    }

    /// Owner tag of the current marker, if any
    pub async fn holder(&self, name: &str) -> StoreResult<Option<String>> {
        self.store.get(&Self::key_for(name)).await
    }
}
