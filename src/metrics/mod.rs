//! Prometheus metrics for baton
//!
//! This module provides metrics tracking for:
//! - Locks: acquisition attempts, leases lost by the watchdog
//! - Dedup: claims won and lost
//! - Scheduler: job outcomes, body duration, degraded mode
//! - Delay queues: items published and consumed
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! Until then, and if initialization fails, every `record_*` call is a no-op.

use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Lock and dedup metrics
struct CoordinationMetrics {
    lock_attempts: CounterVec,
    leases_lost: CounterVec,
    dedup_claims: CounterVec,
}

/// Scheduler and queue metrics
struct SchedulerMetrics {
    job_runs: CounterVec,
    job_duration: HistogramVec,
    degraded: Gauge,
    queue_published: CounterVec,
    queue_consumed: CounterVec,
}

static COORDINATION_METRICS: OnceLock<CoordinationMetrics> = OnceLock::new();

static SCHEDULER_METRICS: OnceLock<SchedulerMetrics> = OnceLock::new();

static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once; only the first call registers anything.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = baton::metrics::init_metrics() {
///     tracing::warn!(error = %e, "Metrics disabled");
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let coordination = CoordinationMetrics {
        lock_attempts: register_counter_vec!(
            "baton_lock_attempts_total",
            "Lock acquisition attempts by lock name and result",
            &["lock", "result"]
        )?,
        leases_lost: register_counter_vec!(
            "baton_lock_leases_lost_total",
            "Leases found taken over or expired at renewal time",
            &["key"]
        )?,
        dedup_claims: register_counter_vec!(
            "baton_dedup_claims_total",
            "Dedup claims by name and result",
            &["name", "result"]
        )?,
    };

    let scheduler = SchedulerMetrics {
        job_runs: register_counter_vec!(
            "baton_job_runs_total",
            "Scheduler ticks by job and outcome",
            &["job", "outcome"]
        )?,
        job_duration: register_histogram_vec!(
            "baton_job_duration_seconds",
            "Job body duration in seconds",
            &["job"],
            vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 300.0, 900.0]
        )?,
        degraded: register_gauge!(
            "baton_scheduler_degraded",
            "1 when the scheduler runs without a reachable store"
        )?,
        queue_published: register_counter_vec!(
            "baton_queue_published_total",
            "Items published to a delay queue",
            &["queue"]
        )?,
        queue_consumed: register_counter_vec!(
            "baton_queue_consumed_total",
            "Items consumed from a delay queue",
            &["queue"]
        )?,
    };

    COORDINATION_METRICS.set(coordination).ok();
    SCHEDULER_METRICS.set(scheduler).ok();

    Ok(())
}

/// Check if metrics are initialized
pub fn metrics_initialized() -> bool {
    COORDINATION_METRICS.get().is_some() && SCHEDULER_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

fn result_label(ok: bool, yes: &'static str, no: &'static str) -> &'static str {
    if ok {
        yes
    } else {
        no
    }
}

/// Record a lock acquisition attempt
pub fn record_lock_attempt(lock: &str, acquired: bool) {
    if let Some(m) = COORDINATION_METRICS.get() {
        m.lock_attempts
            .with_label_values(&[lock, result_label(acquired, "acquired", "contended")])
            .inc();
    }
}

/// Record a lease the watchdog found lost
pub fn record_watchdog_lost(key: &str) {
    if let Some(m) = COORDINATION_METRICS.get() {
        m.leases_lost.with_label_values(&[key]).inc();
    }
}

/// Record a dedup claim
pub fn record_dedup_claim(name: &str, claimed: bool) {
    if let Some(m) = COORDINATION_METRICS.get() {
        m.dedup_claims
            .with_label_values(&[name, result_label(claimed, "claimed", "duplicate")])
            .inc();
    }
}

/// Record one scheduler tick; `duration_secs` is only observed for ticks
/// that ran the body
pub fn record_job_outcome(job: &str, outcome: &str, duration_secs: Option<f64>) {
    let Some(m) = SCHEDULER_METRICS.get() else {
        return;
    };

    m.job_runs.with_label_values(&[job, outcome]).inc();
    if let Some(secs) = duration_secs {
        m.job_duration.with_label_values(&[job]).observe(secs);
    }
}

/// Flag degraded mode
pub fn set_degraded(degraded: bool) {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.degraded.set(if degraded { 1.0 } else { 0.0 });
    }
}

/// Record items published to a queue
pub fn record_queue_published(queue: &str, count: u64) {
    if count == 0 {
        return;
    }
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.queue_published
            .with_label_values(&[queue])
            .inc_by(count as f64);
    }
}

/// Record items consumed from a queue
pub fn record_queue_consumed(queue: &str, count: u64) {
    if count == 0 {
        return;
    }
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.queue_consumed
            .with_label_values(&[queue])
            .inc_by(count as f64);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ensure_metrics_initialized() {
        let _ = init_metrics();
    }

    #[test]
    fn test_init_metrics_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
    }

    #[test]
    fn test_metrics_initialized() {
        ensure_metrics_initialized();
        assert!(metrics_initialized());
    }

    #[test]
    fn test_encode_metrics() {
        ensure_metrics_initialized();
        record_lock_attempt("encode-test", true);
        let text = encode_metrics().unwrap();
        assert!(text.contains("baton_lock_attempts_total"));
    }

    #[test]
    fn test_recorders_do_not_panic() {
        ensure_metrics_initialized();
        record_lock_attempt("report", false);
        record_watchdog_lost("lock:task:report");
        record_dedup_claim("task:report", true);
        record_job_outcome("report", "executed", Some(0.25));
        record_job_outcome("report", "skipped", None);
        set_degraded(false);
        record_queue_published("q", 3);
        record_queue_consumed("q", 0);
    }
}
