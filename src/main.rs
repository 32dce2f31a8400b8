use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use baton::config::Config;
use baton::lock::{AcquireOptions, LeaseLock};
use baton::metrics;
use baton::queue::{DelayQueue, DEFAULT_CONSUME_BATCH};
use baton::scheduler::TaskScheduler;
use baton::shutdown::{self, Shutdown};
use baton::store::{KvStore, MemoryStore, RedisStore};
use baton::workers::DemoJobs;

#[derive(Parser)]
#[command(
    name = "baton",
    version,
    about = "Distributed job scheduling, leases and delay queues over Redis",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML config file; environment variables are used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the config
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler with the bundled demo jobs until Ctrl-C
    Run {
        /// Use an in-process store instead of Redis (single replica)
        #[arg(long, default_value = "false")]
        memory: bool,

        /// Print Prometheus metrics on exit
        #[arg(long, default_value = "false")]
        print_metrics: bool,
    },

    /// Inspect or take a lease
    Lock {
        #[command(subcommand)]
        action: LockCommand,
    },

    /// Operate on a delay queue
    Queue {
        #[command(subcommand)]
        action: QueueCommand,
    },
}

#[derive(Subcommand)]
enum LockCommand {
    /// Show whether a lock is held and for how long
    Status {
        /// Lock name
        name: String,
    },

    /// Take a lock without waiting and hold it
    Try {
        /// Lock name
        name: String,

        /// Seconds to hold the lock before releasing it
        #[arg(long, default_value = "30")]
        hold_secs: u64,
    },

    /// Wait for a lock, then hold it with renewal
    Wait {
        /// Lock name
        name: String,

        /// Seconds to hold the lock before releasing it
        #[arg(long, default_value = "30")]
        hold_secs: u64,

        /// Give up after this many seconds
        #[arg(long, default_value = "30")]
        wait_secs: u64,
    },
}

#[derive(Subcommand)]
enum QueueCommand {
    /// Publish payloads sharing one due time
    Publish {
        /// Queue name
        queue: String,

        /// Payloads
        #[arg(required = true)]
        payloads: Vec<String>,

        /// Delay before the payloads become due, in milliseconds
        #[arg(short, long, default_value = "0")]
        delay_ms: u64,

        /// Keep the existing due time of payloads already queued
        #[arg(long, default_value = "false")]
        no_overwrite: bool,
    },

    /// Take due payloads
    Consume {
        /// Queue name
        queue: String,

        /// Maximum number of payloads
        #[arg(short, long, default_value_t = DEFAULT_CONSUME_BATCH)]
        max: usize,
    },

    /// Show queue depth
    Status {
        /// Queue name
        queue: String,
    },

    /// Cancel queued payloads
    Remove {
        /// Queue name
        queue: String,

        /// Payloads
        #[arg(required = true)]
        payloads: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    let log_format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&log_format, &config.logging.level, cli.verbose)?;

    match cli.command {
        Commands::Run {
            memory,
            print_metrics,
        } => {
            tracing::info!(memory, "Starting scheduler");
            run(config, memory, print_metrics).await?;
        }

        Commands::Lock { action } => {
            let store = connect(&config).await?;
            lock_command(store, action).await?;
        }

        Commands::Queue { action } => {
            let store = connect(&config).await?;
            queue_command(store, action).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("baton=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("baton={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

async fn connect(config: &Config) -> Result<Arc<dyn KvStore>> {
    let store = RedisStore::connect(&config.store)
        .await
        .with_context(|| format!("Failed to connect to {}", config.store.url))?;
    Ok(Arc::new(store))
}

/// Cancel `signal` on Ctrl-C
fn cancel_on_ctrl_c() -> Shutdown {
    let (trigger, signal) = shutdown::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.trigger();
        }
    });
    signal
}

async fn run(config: Config, memory: bool, print_metrics: bool) -> Result<()> {
    if let Err(e) = metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics initialization failed, continuing without metrics");
    }

    let store: Option<Arc<dyn KvStore>> = if memory {
        Some(Arc::new(MemoryStore::new()))
    } else {
        match RedisStore::from_config(&config.store) {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                tracing::warn!(error = %e, "Invalid store configuration");
                None
            }
        }
    };

    let mut scheduler = TaskScheduler::new(config.scheduler.clone());
    if let Some(store) = store {
        scheduler.register_provider(DemoJobs::new(DelayQueue::new(store.clone())));
        scheduler = scheduler.with_store(store);
    } else {
        scheduler.register_provider(DemoJobs::new(DelayQueue::new(Arc::new(MemoryStore::new()))));
    }

    scheduler.start().await?;
    println!("Scheduler running as {} (Ctrl-C to stop)", scheduler.pod_id());
    if scheduler.is_degraded() {
        println!("  Degraded: shared store unavailable, jobs run without locking");
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    let report = scheduler.stop().await?;
    println!("Stopped in {:.1}s", report.elapsed.as_secs_f64());
    if !report.unfinished.is_empty() {
        println!("  Unfinished jobs: {}", report.unfinished.join(", "));
    }
    if !report.aborted.is_empty() {
        println!("  Aborted job loops: {}", report.aborted.join(", "));
    }

    for stats in scheduler.stats() {
        println!(
            "  {:<24} executed={} failed={} gated={} skipped={} invocations={}",
            stats.job, stats.executed, stats.failed, stats.gated, stats.skipped, stats.invocations
        );
    }

    if print_metrics {
        match metrics::encode_metrics() {
            Ok(text) => print!("{text}"),
            Err(e) => tracing::warn!(error = %e, "Failed to encode metrics"),
        }
    }

    Ok(())
}

async fn lock_command(store: Arc<dyn KvStore>, action: LockCommand) -> Result<()> {
    let locks = LeaseLock::new(store);

    match action {
        LockCommand::Status { name } => {
            let status = locks.status(&name).await?;
            println!("Lock: {}", LeaseLock::key_for(&name));
            println!("  Locked: {}", status.locked);
            if let Some(ttl) = status.remaining_ttl {
                println!("  Remaining: {}ms", ttl.as_millis());
            }
        }

        LockCommand::Try { name, hold_secs } => {
            let hold = Duration::from_secs(hold_secs);
            match locks.try_acquire(&name, hold).await? {
                Some(lease) => {
                    println!("Acquired {} until {}", lease.key(), lease.expires_at());
                    cancel_on_ctrl_c().sleep(hold).await;
                    let released = locks.release(lease).await?;
                    println!("Released: {released}");
                }
                None => println!("Lock {name} is held elsewhere"),
            }
        }

        LockCommand::Wait {
            name,
            hold_secs,
            wait_secs,
        } => {
            let hold = Duration::from_secs(hold_secs);
            let options = AcquireOptions::default().max_wait(Duration::from_secs(wait_secs));
            let cancel = cancel_on_ctrl_c();

            match locks.acquire(&name, hold, &options, &cancel).await? {
                Some(lease) => {
                    println!("Acquired {} (renewing every {}s)", lease.key(), hold_secs / 3);
                    cancel.sleep(hold).await;
                    let released = locks.release(lease).await?;
                    println!("Released: {released}");
                }
                None => println!("Gave up waiting for {name}"),
            }
        }
    }

    Ok(())
}

async fn queue_command(store: Arc<dyn KvStore>, action: QueueCommand) -> Result<()> {
    let queue = DelayQueue::new(store);

    match action {
        QueueCommand::Publish {
            queue: name,
            payloads,
            delay_ms,
            no_overwrite,
        } => {
            let added = queue
                .publish_batch(&name, &payloads, Duration::from_millis(delay_ms), !no_overwrite)
                .await?;
            println!(
                "Published {} item(s) to {name}, {added} new, due in {delay_ms}ms",
                payloads.len()
            );
        }

        QueueCommand::Consume { queue: name, max } => {
            let items = queue.consume(&name, max).await?;
            if items.is_empty() {
                println!("Nothing due in {name}");
            }
            for item in items {
                println!("{item}");
            }
        }

        QueueCommand::Status { queue: name } => {
            let status = queue.status(&name).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }

        QueueCommand::Remove {
            queue: name,
            payloads,
        } => {
            let removed = queue.remove(&name, &payloads).await?;
            println!("Removed {removed} of {} item(s) from {name}", payloads.len());
        }
    }

    Ok(())
}
