//! The task scheduler: registration, start-up and graceful stop

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::clock::{Clock, SystemClock};
use crate::config::SchedulerConfig;
use crate::metrics;
use crate::shutdown::{self, ShutdownTrigger};
use crate::store::KvStore;

use super::error::{SchedulerError, SchedulerResult};
use super::job::{
    boxed_action, Cadence, JobContext, JobDescriptor, JobProvider, LongRunningOptions,
    RecurringOptions, MAX_INTERVAL,
};
use super::runner::{Coordination, JobRunner};
use super::stats::{JobStats, JobStatsSnapshot};
use super::timing::lease_duration_for;

/// Upper bound on the start-up store probe
const STARTUP_PING_TIMEOUT: Duration = Duration::from_secs(5);

/// How `stop` went
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Every job loop exited normally within the grace period
    pub clean: bool,
    /// Time spent waiting
    pub elapsed: Duration,
    /// Jobs still running when the grace period ran out
    pub unfinished: Vec<String>,
    /// Jobs whose loop had died from a panic
    pub aborted: Vec<String>,
}

struct RegisteredJob {
    descriptor: JobDescriptor,
    stats: Arc<JobStats>,
}

struct Running {
    trigger: ShutdownTrigger,
    handles: Vec<(Arc<str>, JoinHandle<()>)>,
}

impl Drop for Running {
    fn drop(&mut self) {
        // Loops must not outlive a scheduler dropped without `stop`.
        self.trigger.trigger();
    }
}

/// Runs registered jobs on independent loops, coordinated through an
/// optional shared store.
///
/// # Example
///
/// ```rust,ignore
/// let mut scheduler = TaskScheduler::new(config.scheduler.clone()).with_store(store);
/// scheduler.add_recurring_task(
///     cleanup,
///     Duration::from_secs(21 * 60),
///     RecurringOptions::default()
///         .allowed_hours([2, 3])
///         .dedup_window(Duration::from_secs(12 * 3600)),
/// )?;
/// scheduler.start().await?;
/// // ...
/// let report = scheduler.stop().await?;
/// ```
pub struct TaskScheduler {
    config: SchedulerConfig,
    pod_id: Arc<str>,
    store: Option<Arc<dyn KvStore>>,
    clock: Arc<dyn Clock>,
    jobs: Vec<RegisteredJob>,
    providers: Vec<Arc<dyn JobProvider>>,
    running: Option<Running>,
    degraded: bool,
}

impl TaskScheduler {
    /// Create a scheduler with no store (every job runs locally) and the
    /// system clock
    pub fn new(config: SchedulerConfig) -> Self {
        let pod_id: Arc<str> = config.resolve_pod_id().into();
        Self {
            config,
            pod_id,
            store: None,
            clock: Arc::new(SystemClock),
            jobs: Vec::new(),
            providers: Vec::new(),
            running: None,
            degraded: false,
        }
    }

    /// Coordinate through `store`
    pub fn with_store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Read hours of day from `clock`
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Identity of this replica
    pub fn pod_id(&self) -> &str {
        &self.pod_id
    }

    /// Whether the last `start` fell back to running without the store
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Whether job loops are running
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Registered jobs, in registration order
    pub fn jobs(&self) -> impl Iterator<Item = &JobDescriptor> {
        self.jobs.iter().map(|j| &j.descriptor)
    }

    /// Add a provider consulted by `start` when no job was added directly
    pub fn register_provider(&mut self, provider: impl JobProvider + 'static) {
        self.providers.push(Arc::new(provider));
    }

    /// Register a job that runs its body once per tick.
    ///
    /// The lock lease is derived from `interval`. Without a name the job is
    /// named after the action's type path.
    pub fn add_recurring_task<F, Fut>(
        &mut self,
        action: F,
        interval: Duration,
        options: RecurringOptions,
    ) -> SchedulerResult<()>
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = resolve_name::<F>(options.name)?;
        SchedulerError::require_interval(&name, interval, MAX_INTERVAL)?;
        if let Some(window) = options.dedup_window {
            SchedulerError::require_nonzero(&name, "dedup_window", window)?;
        }

        let allowed_hours = match options.allowed_hours {
            Some(hours) => {
                if let Some(&bad) = hours.iter().find(|&&h| h > 23) {
                    return Err(SchedulerError::invalid_hour(name, bad));
                }
                Some(hours.into_iter().collect::<BTreeSet<_>>())
            }
            None => None,
        };

        let lock_lease = self.lease_for(interval);
        self.register(JobDescriptor {
            name: name.into(),
            interval,
            use_lock: options.use_lock,
            lock_lease,
            cadence: Cadence::Recurring {
                allowed_hours,
                dedup_window: options.dedup_window,
            },
            action: boxed_action(action),
        })
    }

    /// Register a job that, once per tick, runs a bounded window of
    /// repeated body invocations.
    ///
    /// The lock lease is derived from the run duration.
    pub fn add_long_running_task<F, Fut>(
        &mut self,
        action: F,
        interval: Duration,
        options: LongRunningOptions,
    ) -> SchedulerResult<()>
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = resolve_name::<F>(options.name)?;
        SchedulerError::require_interval(&name, interval, MAX_INTERVAL)?;
        SchedulerError::require_nonzero(&name, "run_duration", options.run_duration)?;

        let lock_lease = self.lease_for(options.run_duration);
        self.register(JobDescriptor {
            name: name.into(),
            interval,
            use_lock: options.use_lock,
            lock_lease,
            cadence: Cadence::LongRunning {
                processing_interval: options.processing_interval,
                run_duration: options.run_duration,
            },
            action: boxed_action(action),
        })
    }

    fn lease_for(&self, expected: Duration) -> Duration {
        lease_duration_for(
            expected,
            Duration::from_secs(self.config.min_lock_lease_secs),
            Duration::from_secs(self.config.max_lock_lease_secs),
        )
    }

    fn register(&mut self, descriptor: JobDescriptor) -> SchedulerResult<()> {
        if self.running.is_some() {
            return Err(SchedulerError::AlreadyStarted);
        }
        if self.jobs.iter().any(|j| j.descriptor.name == descriptor.name) {
            return Err(SchedulerError::duplicate_job(descriptor.name.as_ref()));
        }

        tracing::debug!(
            job = %descriptor.name,
            kind = %descriptor.kind(),
            lock_lease_secs = descriptor.lock_lease.as_secs(),
            "Job registered"
        );
        self.jobs.push(RegisteredJob {
            descriptor,
            stats: Arc::new(JobStats::default()),
        });
        Ok(())
    }

    fn configure_from_providers(&mut self) {
        if !self.jobs.is_empty() {
            return;
        }

        for provider in std::mem::take(&mut self.providers) {
            if let Err(e) = provider.configure(self) {
                tracing::error!(error = %e, "Job provider failed");
            }
        }
        tracing::info!(jobs = self.jobs.len(), "Jobs configured");
    }

    async fn connect(&self) -> Option<Coordination> {
        let Some(store) = &self.store else {
            tracing::warn!(pod = %self.pod_id, "No shared store configured, running without distributed locking");
            return None;
        };

        match tokio::time::timeout(STARTUP_PING_TIMEOUT, store.ping()).await {
            Ok(Ok(())) => Some(Coordination::new(store.clone(), &self.pod_id)),
            Ok(Err(e)) => {
                tracing::warn!(pod = %self.pod_id, error = %e, "Shared store unreachable, running without distributed locking or dedup");
                None
            }
            Err(_) => {
                tracing::warn!(pod = %self.pod_id, "Shared store ping timed out, running without distributed locking or dedup");
                None
            }
        }
    }

    /// Spawn one loop per job.
    ///
    /// If the store is missing or unreachable, jobs still run on every
    /// replica without dedup or locking.
    pub async fn start(&mut self) -> SchedulerResult<()> {
        if self.running.is_some() {
            return Err(SchedulerError::AlreadyStarted);
        }

        self.configure_from_providers();

        let coordination = self.connect().await;
        self.degraded = coordination.is_none();
        metrics::set_degraded(self.degraded);

        let (trigger, _) = shutdown::channel();
        let handles = self
            .jobs
            .iter()
            .map(|job| {
                let runner = JobRunner {
                    job: job.descriptor.clone(),
                    pod_id: self.pod_id.clone(),
                    coordination: coordination.clone(),
                    clock: self.clock.clone(),
                    stats: job.stats.clone(),
                    max_jitter_secs: self.config.max_initial_jitter_secs,
                };
                let name = job.descriptor.name.clone();
                (name, tokio::spawn(runner.run(trigger.subscribe())))
            })
            .collect();

        tracing::info!(
            pod = %self.pod_id,
            jobs = self.jobs.len(),
            degraded = self.degraded,
            "Scheduler started"
        );
        self.running = Some(Running { trigger, handles });
        Ok(())
    }

    /// Stop scheduling and wait up to the grace period for running bodies.
    ///
    /// A timeout is reported, not raised. Bodies still running afterwards
    /// are left to finish on their own.
    pub async fn stop(&mut self) -> SchedulerResult<ShutdownReport> {
        let mut running = self.running.take().ok_or(SchedulerError::NotStarted)?;
        running.trigger.trigger();

        let grace = self.config.shutdown_grace();
        let started = Instant::now();
        tracing::info!(pod = %self.pod_id, grace_secs = grace.as_secs(), "Scheduler stopping");

        let handles = std::mem::take(&mut running.handles);
        let names: Vec<Arc<str>> = handles.iter().map(|(name, _)| name.clone()).collect();
        let mut pending: FuturesUnordered<_> = handles
            .into_iter()
            .map(|(name, handle)| async move { (name, handle.await) })
            .collect();

        let mut exited: Vec<Arc<str>> = Vec::with_capacity(names.len());
        let mut aborted = Vec::new();
        let drained = tokio::time::timeout(grace, async {
            while let Some((name, result)) = pending.next().await {
                if let Err(e) = result {
                    tracing::error!(job = %name, error = %e, "Job loop terminated abnormally");
                    aborted.push(name.to_string());
                }
                exited.push(name);
            }
        })
        .await;
        // Dropping the remaining handles detaches their tasks.
        drop(pending);

        let unfinished: Vec<String> = names
            .iter()
            .filter(|name| !exited.contains(name))
            .map(|name| name.to_string())
            .collect();
        let report = ShutdownReport {
            clean: drained.is_ok() && aborted.is_empty(),
            elapsed: started.elapsed(),
            unfinished,
            aborted,
        };

        if report.clean {
            tracing::info!(elapsed_ms = report.elapsed.as_millis() as u64, "All jobs stopped");
        } else if report.unfinished.is_empty() {
            tracing::warn!(aborted = ?report.aborted, "Some job loops had died before shutdown");
        } else {
            tracing::warn!(
                unfinished = ?report.unfinished,
                "Shutdown grace period elapsed, leaving unfinished jobs behind"
            );
        }
        Ok(report)
    }

    /// Counters for every job
    pub fn stats(&self) -> Vec<JobStatsSnapshot> {
        self.jobs
            .iter()
            .map(|j| j.stats.snapshot(&j.descriptor.name, j.descriptor.kind()))
            .collect()
    }

    /// Counters for one job
    pub fn job_stats(&self, name: &str) -> Option<JobStatsSnapshot> {
        self.jobs
            .iter()
            .find(|j| j.descriptor.name.as_ref() == name)
            .map(|j| j.stats.snapshot(&j.descriptor.name, j.descriptor.kind()))
    }
}

fn resolve_name<F>(explicit: Option<String>) -> SchedulerResult<String> {
    match explicit {
        Some(name) if name.trim().is_empty() => Err(SchedulerError::EmptyName),
        Some(name) => Ok(name),
        None => Ok(std::any::type_name::<F>().to_string()),
    }
}
