//! Per-job tick outcomes and counters

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use super::job::JobKind;

/// Why a tick did not run the body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateReason {
    /// Another replica already ran within the dedup window
    Deduplicated,
    /// Another replica holds the job lock
    LockHeld,
    /// The store failed during the tick
    StoreUnavailable,
}

/// Result of one scheduler tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "reason")]
pub enum JobOutcome {
    /// Outside the allowed hours
    Skipped,
    /// Stopped by dedup or lock
    Gated(GateReason),
    /// Body ran and succeeded
    Executed,
    /// Body returned an error or panicked
    Failed,
}

impl JobOutcome {
    /// Log/metric label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Gated(_) => "gated",
            Self::Executed => "executed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gated(reason) => write!(f, "gated ({reason:?})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Live counters for one job
#[derive(Debug, Default)]
pub(crate) struct JobStats {
    ticks: AtomicU64,
    executed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    gated: AtomicU64,
    invocations: AtomicU64,
    last: Mutex<Option<(JobOutcome, DateTime<Utc>)>>,
}

impl JobStats {
    pub(crate) fn record(&self, outcome: JobOutcome) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            JobOutcome::Skipped => &self.skipped,
            JobOutcome::Gated(_) => &self.gated,
            JobOutcome::Executed => &self.executed,
            JobOutcome::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some((outcome, Utc::now()));
    }

    /// Count body invocations, including every long-running iteration
    pub(crate) fn record_invocation(&self) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, job: &str, kind: JobKind) -> JobStatsSnapshot {
        let last = *self.last.lock().unwrap_or_else(PoisonError::into_inner);
        JobStatsSnapshot {
            job: job.to_string(),
            kind,
            ticks: self.ticks.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            gated: self.gated.load(Ordering::Relaxed),
            invocations: self.invocations.load(Ordering::Relaxed),
            last_outcome: last.map(|(outcome, _)| outcome),
            last_tick_at: last.map(|(_, at)| at),
        }
    }
}

/// Point-in-time copy of a job's counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatsSnapshot {
    pub job: String,
    pub kind: JobKind,
    /// Ticks that reached the gates
    pub ticks: u64,
    pub executed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub gated: u64,
    /// Body invocations; for long-running jobs one per iteration
    pub invocations: u64,
    pub last_outcome: Option<JobOutcome>,
    pub last_tick_at: Option<DateTime<Utc>>,
}
