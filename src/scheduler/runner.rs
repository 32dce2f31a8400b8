//! Per-job polling loop
//!
//! Each registered job gets one task running [`JobRunner::run`]. The loop
//! waits out the start jitter, then on every tick passes the hour gate, the
//! dedup gate and the job lock, in that order, before invoking the body.
//! Only the waits between bodies observe the loop-control signal.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::clock::{deadline_after, Clock};
use crate::dedup::DedupGate;
use crate::lock::LeaseLock;
use crate::metrics;
use crate::shutdown::Shutdown;
use crate::store::KvStore;

use super::job::{task_key, Cadence, JobContext, JobDescriptor};
use super::stats::{GateReason, JobOutcome, JobStats};
use super::timing::{hour_allowed, initial_delay};

/// Store-backed gates. Absent in degraded mode.
#[derive(Clone)]
pub(crate) struct Coordination {
    locks: LeaseLock,
    dedup: DedupGate,
}

impl Coordination {
    pub(crate) fn new(store: Arc<dyn KvStore>, pod_id: &str) -> Self {
        Self {
            locks: LeaseLock::new(store.clone()),
            dedup: DedupGate::new(store, pod_id),
        }
    }
}

pub(crate) struct JobRunner {
    pub(crate) job: JobDescriptor,
    pub(crate) pod_id: Arc<str>,
    pub(crate) coordination: Option<Coordination>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) stats: Arc<JobStats>,
    pub(crate) max_jitter_secs: u64,
}

impl JobRunner {
    /// Loop until `shutdown` fires
    pub(crate) async fn run(self, shutdown: Shutdown) {
        let job = self.job.name.clone();
        let delay = initial_delay(&job, &self.pod_id, self.max_jitter_secs);
        tracing::info!(
            job = %job,
            kind = %self.job.kind(),
            interval_ms = self.job.interval.as_millis() as u64,
            delay_secs = delay.as_secs(),
            "Job loop starting"
        );

        if !shutdown.sleep(delay).await {
            tracing::info!(job = %job, "Job cancelled during initial delay");
            return;
        }

        let period = self.job.interval;
        let mut ticker = interval_at(deadline_after(period), period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            self.tick(&shutdown).await;
        }

        tracing::info!(job = %job, "Job loop stopped");
    }

    /// One pass through the gates and, if they all pass, the body
    pub(crate) async fn tick(&self, shutdown: &Shutdown) -> JobOutcome {
        let started = Instant::now();
        let outcome = self.gate_and_execute(shutdown).await;
        let elapsed = started.elapsed();

        self.stats.record(outcome);
        let duration_ms = elapsed.as_millis() as u64;
        match outcome {
            JobOutcome::Skipped => {
                tracing::trace!(job = %self.job.name, outcome = outcome.as_str(), "Outside allowed hours");
            }
            JobOutcome::Gated(reason) => {
                tracing::debug!(job = %self.job.name, outcome = outcome.as_str(), ?reason, "Tick gated");
            }
            JobOutcome::Executed | JobOutcome::Failed => {
                tracing::info!(
                    job = %self.job.name,
                    pod = %self.pod_id,
                    outcome = outcome.as_str(),
                    duration_ms,
                    "Tick finished"
                );
            }
        }

        let body_secs = matches!(outcome, JobOutcome::Executed | JobOutcome::Failed)
            .then(|| elapsed.as_secs_f64());
        metrics::record_job_outcome(&self.job.name, outcome.as_str(), body_secs);

        outcome
    }

    async fn gate_and_execute(&self, shutdown: &Shutdown) -> JobOutcome {
        if let Cadence::Recurring {
            allowed_hours: Some(hours),
            ..
        } = &self.job.cadence
        {
            if !hour_allowed(Some(hours), self.clock.local_hour()) {
                return JobOutcome::Skipped;
            }
        }

        let Some(coordination) = &self.coordination else {
            return self.execute(shutdown).await;
        };

        if let Cadence::Recurring {
            dedup_window: Some(window),
            ..
        } = &self.job.cadence
        {
            match coordination
                .dedup
                .try_claim(&task_key(&self.job.name), *window)
                .await
            {
                Ok(true) => {}
                Ok(false) => return JobOutcome::Gated(GateReason::Deduplicated),
                Err(e) => {
                    tracing::warn!(job = %self.job.name, error = %e, "Dedup check failed, skipping this tick");
                    return JobOutcome::Gated(GateReason::StoreUnavailable);
                }
            }
        }

        if !self.job.use_lock {
            return self.execute(shutdown).await;
        }

        let lease = match coordination
            .locks
            .try_acquire_with(&self.job.lock_name(), self.job.lock_lease, true)
            .await
        {
            Ok(Some(lease)) => lease,
            Ok(None) => return JobOutcome::Gated(GateReason::LockHeld),
            Err(e) => {
                tracing::warn!(job = %self.job.name, error = %e, "Lock attempt failed, skipping this tick");
                return JobOutcome::Gated(GateReason::StoreUnavailable);
            }
        };

        let outcome = self.execute(shutdown).await;

        if let Err(e) = coordination.locks.release(lease).await {
            tracing::warn!(
                job = %self.job.name,
                error = %e,
                "Failed to release job lock, it will expire on its lease"
            );
        }
        outcome
    }

    async fn execute(&self, shutdown: &Shutdown) -> JobOutcome {
        match self.job.cadence {
            Cadence::Recurring { .. } => {
                if self.invoke(0).await {
                    JobOutcome::Executed
                } else {
                    JobOutcome::Failed
                }
            }
            Cadence::LongRunning {
                processing_interval,
                run_duration,
            } => {
                self.run_window(processing_interval, run_duration, shutdown)
                    .await
            }
        }
    }

    /// Invoke the body repeatedly until the window closes or shutdown.
    ///
    /// Failed iterations are logged and the window continues. The window
    /// counts as failed only when every iteration failed.
    async fn run_window(
        &self,
        processing_interval: Duration,
        run_duration: Duration,
        shutdown: &Shutdown,
    ) -> JobOutcome {
        let stop_at = deadline_after(run_duration);
        let mut iterations = 0u64;
        let mut failures = 0u64;

        while Instant::now() < stop_at && !shutdown.is_cancelled() {
            if !self.invoke(iterations).await {
                failures += 1;
            }
            iterations += 1;

            if processing_interval.is_zero() {
                tokio::task::yield_now().await;
            } else if !shutdown.sleep(processing_interval).await {
                break;
            }
        }

        if shutdown.is_cancelled() {
            tracing::info!(job = %self.job.name, iterations, failures, "Run window cut short by shutdown");
        } else {
            tracing::debug!(job = %self.job.name, iterations, failures, "Run window closed");
        }

        if iterations > 0 && failures == iterations {
            JobOutcome::Failed
        } else {
            JobOutcome::Executed
        }
    }

    /// Run the body once. Errors and panics are logged, never propagated.
    async fn invoke(&self, iteration: u64) -> bool {
        let ctx = JobContext::new(self.job.name.clone(), self.pod_id.clone(), iteration);
        let action = self.job.action.clone();
        self.stats.record_invocation();

        let body = async move { action(ctx).await };
        match AssertUnwindSafe(body).catch_unwind().await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::error!(job = %self.job.name, iteration, error = ?e, "Job body failed");
                false
            }
            Err(panic) => {
                tracing::error!(
                    job = %self.job.name,
                    iteration,
                    panic = %panic_message(panic.as_ref()),
                    "Job body panicked"
                );
                false
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
