//! baton - Distributed coordination core
//!
//! Runs recurring and long-running jobs across identical replicas that share
//! nothing but a key-value store.
//!
//! # Architecture
//!
//! The library is organized into several modules, leaves first:
//!
//! - [`store`] - Shared store abstraction with Redis and in-memory backends
//! - [`lock`] - Lease-based mutual exclusion with watchdog renewal
//! - [`dedup`] - Run-once markers with a time window
//! - [`queue`] - Time-ordered delay queue with atomic consume
//! - [`scheduler`] - Per-job polling loops, gating and graceful shutdown
//! - [`workers`] - Demo jobs bundled with the binary
//! - [`config`] - Configuration management
//! - [`metrics`] - Prometheus metrics
//! - [`clock`] / [`shutdown`] - Injected time source and cancellation signal
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use baton::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = Arc::new(RedisStore::from_config(&config.store)?);
//!
//!     let mut scheduler = TaskScheduler::new(config.scheduler).with_store(store);
//!     scheduler.add_recurring_task(
//!         |ctx: JobContext| async move {
//!             tracing::info!(pod = %ctx.pod_id(), "hello");
//!             Ok(())
//!         },
//!         Duration::from_secs(60),
//!         RecurringOptions::default().named("hello"),
//!     )?;
//!
//!     scheduler.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     scheduler.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod dedup;
pub mod error;
pub mod lock;
pub mod metrics;
pub mod queue;
pub mod scheduler;
pub mod shutdown;
pub mod store;
pub mod workers;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::Config;
    pub use crate::dedup::DedupGate;
    pub use crate::error::{BatonErrorTrait, Error, ErrorCategory, Result};
    pub use crate::lock::{AcquireOptions, Lease, LeaseLock, LockStatus};
    pub use crate::queue::{DelayQueue, QueueStatus};
    pub use crate::scheduler::{
        JobContext, JobOutcome, JobProvider, LongRunningOptions, RecurringOptions,
        ShutdownReport, TaskScheduler,
    };
    pub use crate::shutdown::Shutdown;
    pub use crate::store::{KvStore, MemoryStore, RedisStore};
}

pub use lock::{Lease, LeaseLock};
pub use queue::DelayQueue;
pub use scheduler::TaskScheduler;
