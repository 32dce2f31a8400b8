//! Bundled demo jobs
//!
//! These are what `baton run` schedules: a delay-queue consumer, a nightly
//! queue report and a probe that makes graceful shutdown observable.

use std::sync::Arc;
use std::time::Duration;

use crate::queue::{DelayQueue, QueueStatus, DEFAULT_CONSUME_BATCH};
use crate::scheduler::{
    JobContext, JobProvider, LongRunningOptions, RecurringOptions, SchedulerResult, TaskScheduler,
};

/// Queue consumed by the demo consumer
pub const DEMO_DELAY_QUEUE: &str = "demo:delay-queue";

/// Ready items above which the nightly report warns
const BACKLOG_WARN_THRESHOLD: u64 = 1_000;

/// How long the shutdown probe body runs
pub const PROBE_BODY_DURATION: Duration = Duration::from_secs(5);

/// Drains due items from one delay queue
#[derive(Clone)]
pub struct DelayQueueWorker {
    queue: DelayQueue,
    name: String,
    batch: usize,
}

impl DelayQueueWorker {
    pub fn new(queue: DelayQueue, name: impl Into<String>) -> Self {
        Self {
            queue,
            name: name.into(),
            batch: DEFAULT_CONSUME_BATCH,
        }
    }

    /// Consume one batch. Returns how many items were handled.
    pub async fn process(&self, ctx: &JobContext) -> anyhow::Result<usize> {
        let items = self.queue.consume(&self.name, self.batch).await?;
        if items.is_empty() {
            return Ok(0);
        }

        for item in &items {
            tracing::info!(job = %ctx.job(), queue = %self.name, payload = %item, "Delivered delayed item");
        }
        tracing::info!(job = %ctx.job(), queue = %self.name, count = items.len(), "Batch processed");
        Ok(items.len())
    }
}

/// Nightly housekeeping over the demo queue
#[derive(Clone)]
pub struct DailyWorker {
    queue: DelayQueue,
    name: String,
}

impl DailyWorker {
    pub fn new(queue: DelayQueue, name: impl Into<String>) -> Self {
        Self {
            queue,
            name: name.into(),
        }
    }

    /// Log queue depth; warn when the ready backlog is large
    pub async fn queue_report(&self, ctx: &JobContext) -> anyhow::Result<QueueStatus> {
        let status = self.queue.status(&self.name).await?;
        if status.ready > BACKLOG_WARN_THRESHOLD {
            tracing::warn!(
                job = %ctx.job(),
                queue = %self.name,
                ready = status.ready,
                "Delay queue backlog is growing"
            );
        } else {
            tracing::info!(
                job = %ctx.job(),
                queue = %self.name,
                total = status.total,
                ready = status.ready,
                pending = status.pending,
                next_fire_at = ?status.next_fire_at,
                "Delay queue report"
            );
        }
        Ok(status)
    }
}

/// Body that takes [`PROBE_BODY_DURATION`] to finish, so a stop issued
/// mid-run shows the scheduler waiting for it
pub async fn shutdown_probe(ctx: JobContext) -> anyhow::Result<()> {
    let completed = ctx.shutdown().sleep(PROBE_BODY_DURATION).await;
    tracing::debug!(job = %ctx.job(), completed, "Shutdown probe finished");
    Ok(())
}

/// Registers the demo jobs
pub struct DemoJobs {
    queue: DelayQueue,
    queue_name: String,
}

impl DemoJobs {
    pub fn new(queue: DelayQueue) -> Self {
        Self {
            queue,
            queue_name: DEMO_DELAY_QUEUE.to_string(),
        }
    }
}

impl JobProvider for DemoJobs {
    fn configure(&self, scheduler: &mut TaskScheduler) -> SchedulerResult<()> {
        let daily = Arc::new(DailyWorker::new(self.queue.clone(), &self.queue_name));
        scheduler.add_recurring_task(
            move |ctx: JobContext| {
                let daily = daily.clone();
                async move { daily.queue_report(&ctx).await.map(|_| ()) }
            },
            Duration::from_secs(21 * 60),
            RecurringOptions::default()
                .named("daily.queue_report")
                .allowed_hours([2, 3])
                .dedup_window(Duration::from_secs(12 * 3600)),
        )?;

        scheduler.add_recurring_task(
            shutdown_probe,
            Duration::from_secs(15),
            RecurringOptions::default().named("daily.shutdown_probe"),
        )?;

        let consumer = Arc::new(DelayQueueWorker::new(self.queue.clone(), &self.queue_name));
        scheduler.add_long_running_task(
            move |ctx: JobContext| {
                let consumer = consumer.clone();
                async move { consumer.process(&ctx).await.map(|_| ()) }
            },
            Duration::from_secs(1),
            LongRunningOptions::default()
                .named("demo.queue.consume")
                .processing_interval(Duration::from_millis(20))
                .run_duration(Duration::from_secs(30)),
        )?;

        Ok(())
    }
}
