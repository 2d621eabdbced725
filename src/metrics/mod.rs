//! Prometheus metrics for scheduler runs
//!
//! Tracks per-run outcomes:
//! - schedules produced, by email type category and status
//! - per-item errors by kind
//! - the daily cap and busiest day of the last run
//! - run duration
//!
//! Call `init_metrics()` once at startup. If it was never called or
//! registration failed, every recording function is a no-op.

use prometheus::{
    register_counter_vec, register_gauge, register_histogram, CounterVec, Encoder, Gauge,
    Histogram, TextEncoder,
};
use std::sync::OnceLock;

use crate::models::EmailSchedule;

// ============================================================================
// Metrics Storage
// ============================================================================

struct SchedulerMetrics {
    runs: CounterVec,
    schedules: CounterVec,
    errors: CounterVec,
    daily_cap: Gauge,
    max_per_day: Gauge,
    run_duration: Histogram,
}

static SCHEDULER_METRICS: OnceLock<SchedulerMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Register all scheduler metrics with the default registry
///
/// Safe to call more than once; later calls return `Ok(())` without
/// registering again.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = SchedulerMetrics {
        runs: register_counter_vec!(
            "email_scheduler_runs_total",
            "Scheduler runs by outcome",
            &["outcome"]
        )?,
        schedules: register_counter_vec!(
            "email_scheduler_schedules_total",
            "Schedules produced by email category and status",
            &["category", "status"]
        )?,
        errors: register_counter_vec!(
            "email_scheduler_errors_total",
            "Per-item errors collected during runs",
            &["kind"]
        )?,
        daily_cap: register_gauge!(
            "email_scheduler_daily_cap",
            "Daily send cap used by the last run"
        )?,
        max_per_day: register_gauge!(
            "email_scheduler_max_per_day",
            "Busiest day volume after load balancing in the last run"
        )?,
        run_duration: register_histogram!(
            "email_scheduler_run_duration_seconds",
            "Wall time of a scheduler run in seconds",
            vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0]
        )?,
    };

    SCHEDULER_METRICS
        .set(metrics)
        .map_err(|_| "Scheduler metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

pub fn metrics_initialized() -> bool {
    SCHEDULER_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn gather_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

fn category(schedule: &EmailSchedule) -> &'static str {
    if schedule.email_type.is_campaign() {
        "campaign"
    } else if schedule.email_type.is_followup() {
        "followup"
    } else {
        "anniversary"
    }
}

/// Count final schedules by category and status
pub fn record_schedules(schedules: &[EmailSchedule]) {
    let Some(m) = SCHEDULER_METRICS.get() else {
        return;
    };

    for schedule in schedules {
        m.schedules
            .with_label_values(&[category(schedule), schedule.status.as_str()])
            .inc();
    }
}

pub fn record_error(kind: &str) {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.errors.with_label_values(&[kind]).inc();
    }
}

/// Record the outcome of a finished run
pub fn record_run(succeeded: bool, duration_secs: f64, daily_cap: usize, max_per_day: usize) {
    let Some(m) = SCHEDULER_METRICS.get() else {
        return;
    };

    let outcome = if succeeded { "completed" } else { "failed" };
    m.runs.with_label_values(&[outcome]).inc();
    m.run_duration.observe(duration_secs);
    if succeeded {
        m.daily_cap.set(daily_cap as f64);
        m.max_per_day.set(max_per_day as f64);
    }
}

// ============================================================================
// Tests
// ============================================================================
