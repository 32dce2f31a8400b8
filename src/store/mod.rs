//! Shared key-value store abstraction
//!
//! Every cross-replica decision in this crate (lock ownership, dedup claims,
//! delayed-item delivery) is made by a single atomic operation against the
//! shared store. This module defines the primitives the rest of the crate
//! relies on and provides two implementations:
//!
//! - [`RedisStore`] - production store backed by a `deadpool-redis` pool, with
//!   compare-and-delete, compare-and-extend and range-and-remove as Lua scripts
//! - [`MemoryStore`] - in-process store with the same atomicity guarantees,
//!   used for tests and single-node deployments
//!
//! # Example
//!
//! ```rust,ignore
//! use baton::store::{KvStore, RedisStore};
//! use baton::config::StoreConfig;
//!
//! let store = RedisStore::connect(&StoreConfig::from_env()).await?;
//! let created = store.set_if_absent("lock:report", "token", Duration::from_secs(30)).await?;
//! ```

pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::error::{BatonErrorTrait, ErrorCategory};

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by store implementations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Connection pool could not be built
    #[error("Failed to create store pool: {0}")]
    PoolCreate(String),

    /// No connection could be checked out of the pool
    #[error("Failed to get store connection: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// Command or script failed on the server
    #[error("Store command failed: {0}")]
    Command(#[from] ::redis::RedisError),

    /// Operation against a key holding another kind of value
    #[error("Operation against a key holding the wrong kind of value: {0}")]
    WrongType(String),

    /// Caller supplied an argument the store cannot accept
    #[error("Invalid store argument: {0}")]
    InvalidArgument(String),

    /// Store replied with something the client did not expect
    #[error("Unexpected reply for '{operation}': {reason}")]
    UnexpectedReply { operation: String, reason: String },
}

impl StoreError {
    /// Create an invalid argument error
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument(reason.into())
    }

    /// Create an unexpected reply error
    pub fn unexpected_reply(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnexpectedReply {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

impl BatonErrorTrait for StoreError {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Pool(_) => true,
            Self::Command(e) => {
                e.is_io_error() || e.is_timeout() || e.is_connection_dropped()
            }
            Self::PoolCreate(_)
            | Self::WrongType(_)
            | Self::InvalidArgument(_)
            | Self::UnexpectedReply { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidArgument(_) => ErrorCategory::Config,
            _ => ErrorCategory::Store,
        }
    }
}

/// Lowest possible score, rendered as `-inf` by the Redis store
pub const SCORE_MIN: i64 = i64::MIN;

/// Highest possible score, rendered as `+inf` by the Redis store
pub const SCORE_MAX: i64 = i64::MAX;

/// Primitives of the shared key-value store
///
/// Implementations must execute each method as a single atomic operation.
/// In particular `compare_and_delete`, `compare_and_extend` and
/// `zrange_by_score_and_remove` must never be split into a read followed by a
/// separate write.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Check that the store is reachable
    async fn ping(&self) -> StoreResult<()>;

    /// Write `value` under `key` with a TTL, only if the key does not exist.
    /// Returns true iff this call created the key.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    /// Read a string value
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Reset the TTL of an existing key. Returns false if the key is missing.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Increment an integer value, creating it at 0 first if missing
    async fn increment(&self, key: &str) -> StoreResult<i64>;

    /// Delete a key unconditionally. Returns true if it existed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Remaining TTL of a key; `None` if the key is missing or has no TTL
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    /// Delete `key` only if its value equals `expected`
    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool>;

    /// Reset the TTL of `key` only if its value equals `expected`
    async fn compare_and_extend(&self, key: &str, expected: &str, ttl: Duration)
        -> StoreResult<bool>;

    /// Add members to an ordered set, all with the same score.
    ///
    /// With `overwrite` an existing member gets the new score; without it
    /// existing members are left untouched. Returns the number of members
    /// that were not present before.
    async fn zadd(&self, set: &str, members: &[String], score: i64, overwrite: bool)
        -> StoreResult<u64>;

    /// Atomically select up to `limit` members with score `<= max_score`,
    /// ascending by score, remove them and return them
    async fn zrange_by_score_and_remove(
        &self,
        set: &str,
        max_score: i64,
        limit: usize,
    ) -> StoreResult<Vec<String>>;

    /// Number of members in an ordered set
    async fn zcard(&self, set: &str) -> StoreResult<u64>;

    /// Number of members with `min <= score <= max`
    async fn zcount(&self, set: &str, min: i64, max: i64) -> StoreResult<u64>;

    /// Members with `min <= score <= max`, ascending, with their scores
    async fn zrange_by_score(
        &self,
        set: &str,
        min: i64,
        max: i64,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<(String, i64)>>;

    /// Remove members from an ordered set. Returns how many were removed.
    async fn zrem(&self, set: &str, members: &[String]) -> StoreResult<u64>;
}

/// Convert a TTL to whole milliseconds, rejecting zero
pub(crate) fn ttl_millis(ttl: Duration) -> StoreResult<u64> {
    let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
    if millis == 0 {
        return Err(StoreError::invalid_argument(format!(
            "TTL must be at least 1ms, got {ttl:?}"
        )));
    }
    Ok(millis)
}
