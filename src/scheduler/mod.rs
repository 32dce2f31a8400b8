//! Distributed task scheduling
//!
//! The scheduler runs one independent loop per registered job on every
//! replica. Replicas do not talk to each other; they meet only in the shared
//! store, where a dedup marker and a job lock decide which replica runs a
//! given tick.
//!
//! # Job kinds
//!
//! - **Recurring**: every `interval` the loop checks the hour gate, claims
//!   the dedup window, takes the job lock and runs the body once.
//! - **Long-running**: every `interval` the loop takes the job lock and then
//!   invokes the body repeatedly, `processing_interval` apart, until
//!   `run_duration` has elapsed. Releasing the lock at the end of each window
//!   gives other replicas a chance to take over.
//!
//! # Tick flow
//!
//! ```text
//!   tick ──► hour gate ──► dedup claim ──► lock ──► body ──► release
//!              │              │             │
//!              ▼              ▼             ▼
//!           skipped         gated         gated
//! ```
//!
//! # Cancellation
//!
//! Stopping the scheduler cancels the loop-control signal. It interrupts the
//! start jitter, the wait for the next tick and the pause between
//! long-running iterations. A body that has started is never interrupted;
//! `stop` waits for it up to the configured grace period.
//!
//! # Degraded mode
//!
//! When no store is configured or the store does not answer at start-up,
//! every job runs on every replica with dedup and locking disabled.
//!
//! # Modules
//!
//! - [`error`] - Registration and lifecycle errors
//! - [`job`] - Job descriptors, options and the provider callback
//! - [`stats`] - Per-job outcome counters
//! - [`timing`] - Start jitter, lease derivation and hour gating

pub mod error;
pub mod job;
mod runner;
mod service;
pub mod stats;
pub mod timing;

pub use error::{SchedulerError, SchedulerResult};
pub use job::{
    JobContext, JobDescriptor, JobKind, JobProvider, LongRunningOptions, RecurringOptions,
    DEFAULT_PROCESSING_INTERVAL, DEFAULT_RUN_DURATION, MAX_INTERVAL,
};
pub use service::{ShutdownReport, TaskScheduler};
pub use stats::{GateReason, JobOutcome, JobStatsSnapshot};
