//! Job descriptors, options and the registration callback

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::shutdown::Shutdown;

use super::error::SchedulerResult;
use super::service::TaskScheduler;

/// Default pause between long-running iterations
pub const DEFAULT_PROCESSING_INTERVAL: Duration = Duration::from_millis(50);

/// Default length of one long-running run window
pub const DEFAULT_RUN_DURATION: Duration = Duration::from_secs(60);

/// Longest accepted polling interval
pub const MAX_INTERVAL: Duration = Duration::from_secs(365 * 86_400);

/// Boxed future returned by a job body
pub type JobFuture = BoxFuture<'static, anyhow::Result<()>>;

/// Type-erased job body
pub type JobAction = Arc<dyn Fn(JobContext) -> JobFuture + Send + Sync>;

/// Kind of job loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// One body invocation per tick
    Recurring,
    /// A bounded run window of repeated invocations per tick
    LongRunning,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recurring => write!(f, "recurring"),
            Self::LongRunning => write!(f, "long_running"),
        }
    }
}

/// What a job body receives on each invocation
#[derive(Debug, Clone)]
pub struct JobContext {
    job: Arc<str>,
    pod_id: Arc<str>,
    iteration: u64,
    shutdown: Shutdown,
}

impl JobContext {
    pub(crate) fn new(job: Arc<str>, pod_id: Arc<str>, iteration: u64) -> Self {
        Self {
            job,
            pod_id,
            iteration,
            shutdown: Shutdown::never(),
        }
    }

    /// Name of the running job
    pub fn job(&self) -> &str {
        &self.job
    }

    /// Identity of this replica
    pub fn pod_id(&self) -> &str {
        &self.pod_id
    }

    /// Zero-based index of this invocation within the current run window.
    /// Always 0 for recurring jobs.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Cancellation for the body. It never fires: a started body always
    /// runs to completion, scheduler shutdown only suppresses the next one.
    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }
}

/// Registration options for a recurring job
#[derive(Debug, Clone)]
pub struct RecurringOptions {
    /// Explicit job name; defaults to the action's type path
    pub name: Option<String>,

    /// Local hours (0-23) during which the job may run
    pub allowed_hours: Option<Vec<u32>>,

    /// At most one execution across all replicas per window
    pub dedup_window: Option<Duration>,

    /// Take the job lock before running
    pub use_lock: bool,
}

impl Default for RecurringOptions {
    fn default() -> Self {
        Self {
            name: None,
            allowed_hours: None,
            dedup_window: None,
            use_lock: true,
        }
    }
}

impl RecurringOptions {
    /// Set the job name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Restrict to the given local hours
    pub fn allowed_hours(mut self, hours: impl IntoIterator<Item = u32>) -> Self {
        self.allowed_hours = Some(hours.into_iter().collect());
        self
    }

    /// Enable run-once deduplication
    pub fn dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = Some(window);
        self
    }

    /// Run on every replica without taking the job lock
    pub fn without_lock(mut self) -> Self {
        self.use_lock = false;
        self
    }
}

/// Registration options for a long-running job
#[derive(Debug, Clone)]
pub struct LongRunningOptions {
    /// Explicit job name; defaults to the action's type path
    pub name: Option<String>,

    /// Pause between iterations inside a run window
    pub processing_interval: Duration,

    /// Length of one run window
    pub run_duration: Duration,

    /// Take the job lock for the run window
    pub use_lock: bool,
}

impl Default for LongRunningOptions {
    fn default() -> Self {
        Self {
            name: None,
            processing_interval: DEFAULT_PROCESSING_INTERVAL,
            run_duration: DEFAULT_RUN_DURATION,
            use_lock: true,
        }
    }
}

impl LongRunningOptions {
    /// Set the job name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the pause between iterations; zero runs them back-to-back
    pub fn processing_interval(mut self, interval: Duration) -> Self {
        self.processing_interval = interval;
        self
    }

    /// Set the run window length
    pub fn run_duration(mut self, duration: Duration) -> Self {
        self.run_duration = duration;
        self
    }

    /// Run on every replica without taking the job lock
    pub fn without_lock(mut self) -> Self {
        self.use_lock = false;
        self
    }
}

/// Kind-specific part of a descriptor
#[derive(Debug, Clone)]
pub(crate) enum Cadence {
    Recurring {
        allowed_hours: Option<BTreeSet<u32>>,
        dedup_window: Option<Duration>,
    },
    LongRunning {
        processing_interval: Duration,
        run_duration: Duration,
    },
}

/// A registered job. Immutable once added.
#[derive(Clone)]
pub struct JobDescriptor {
    pub(crate) name: Arc<str>,
    pub(crate) interval: Duration,
    pub(crate) use_lock: bool,
    pub(crate) lock_lease: Duration,
    pub(crate) cadence: Cadence,
    pub(crate) action: JobAction,
}

impl JobDescriptor {
    /// Job name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Recurring or long-running
    pub fn kind(&self) -> JobKind {
        match self.cadence {
            Cadence::Recurring { .. } => JobKind::Recurring,
            Cadence::LongRunning { .. } => JobKind::LongRunning,
        }
    }

    /// Outer polling interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether ticks go through the job lock
    pub fn uses_lock(&self) -> bool {
        self.use_lock
    }

    /// Lease written for the job lock
    pub fn lock_lease(&self) -> Duration {
        self.lock_lease
    }

    /// Store key of the job lock, before the `lock:` prefix
    pub fn lock_name(&self) -> String {
        task_key(&self.name)
    }
}

impl fmt::Debug for JobDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDescriptor")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("use_lock", &self.use_lock)
            .field("lock_lease", &self.lock_lease)
            .field("cadence", &self.cadence)
            .finish_non_exhaustive()
    }
}

/// `task:{job}`, shared by the job's lock and dedup keys
pub(crate) fn task_key(job: &str) -> String {
    format!("task:{job}")
}

/// Erase a closure or async fn into a [`JobAction`]
pub(crate) fn boxed_action<F, Fut>(action: F) -> JobAction
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |ctx| action(ctx).boxed())
}

/// Supplies jobs to a scheduler at start-up.
///
/// Providers registered with [`TaskScheduler::register_provider`] run when
/// `start` is called and no job was added directly.
pub trait JobProvider: Send + Sync {
    /// Add jobs to the scheduler
    fn configure(&self, scheduler: &mut TaskScheduler) -> SchedulerResult<()>;
}

impl<F> JobProvider for F
where
    F: Fn(&mut TaskScheduler) -> SchedulerResult<()> + Send + Sync,
{
    fn configure(&self, scheduler: &mut TaskScheduler) -> SchedulerResult<()> {
        self(scheduler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recurring_defaults() {
        let options = RecurringOptions::default();
        assert!(options.use_lock);
        assert!(options.allowed_hours.is_none());
        assert!(options.dedup_window.is_none());

        let options = options
            .named("cleanup")
            .allowed_hours([2, 3])
            .dedup_window(Duration::from_secs(43_200))
            .without_lock();
        assert_eq!(options.name.as_deref(), Some("cleanup"));
        assert_eq!(options.allowed_hours, Some(vec![2, 3]));
        assert!(!options.use_lock);
    }

    #[test]
    fn test_long_running_defaults() {
        let options = LongRunningOptions::default();
        assert_eq!(options.processing_interval, Duration::from_millis(50));
        assert_eq!(options.run_duration, Duration::from_secs(60));
        assert!(options.use_lock);
    }

    #[tokio::test]
    async fn test_context_body_signal_never_fires() {
        let ctx = JobContext::new("job".into(), "pod".into(), 3);
        assert_eq!(ctx.job(), "job");
        assert_eq!(ctx.pod_id(), "pod");
        assert_eq!(ctx.iteration(), 3);
        assert!(!ctx.shutdown().is_cancelled());
    }

    #[tokio::test]
    async fn test_boxed_action_runs() {
        let action = boxed_action(|ctx: JobContext| async move {
            anyhow::ensure!(ctx.job() == "job", "wrong job");
            Ok(())
        });
        assert!(action(JobContext::new("job".into(), "pod".into(), 0)).await.is_ok());
        assert!(action(JobContext::new("other".into(), "pod".into(), 0)).await.is_err());
    }
}
