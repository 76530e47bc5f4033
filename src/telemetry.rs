//! Process-wide telemetry: the tracing subscriber, the `log` bridge for sqlx
//! and SeaORM, and descriptions for every lifecycle metric.
//!
//! The crate emits metrics through the `metrics` facade only. Installing an
//! exporter is left to the embedding process; [`describe_metrics`] should run
//! after it so units and help text reach the recorder.

use std::sync::atomic::{AtomicBool, Ordering};

use log::LevelFilter;
use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use thiserror::Error;
use tracing::{Span, info_span};
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::Layer,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

use crate::config::AppConfig;

#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("failed to install log bridge: {0}")]
    LogTracer(#[from] log::SetLoggerError),
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

static TRACING_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Per-statement sqlx logging is noise at the levels operators run with.
const QUIET_DEPENDENCIES: &[&str] = &["sqlx::query=warn", "sea_orm::driver=warn"];

#[derive(Debug, Clone, Copy)]
enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

struct MetricDescription {
    name: &'static str,
    kind: MetricKind,
    unit: Option<Unit>,
    help: &'static str,
}

const fn metric(
    name: &'static str,
    kind: MetricKind,
    unit: Option<Unit>,
    help: &'static str,
) -> MetricDescription {
    MetricDescription {
        name,
        kind,
        unit,
        help,
    }
}

const LIFECYCLE_METRICS: &[MetricDescription] = &[
    metric(
        "lifecycle_drift_checks_total",
        MetricKind::Counter,
        Some(Unit::Count),
        "Drift checks by outcome",
    ),
    metric(
        "lifecycle_drift_psi",
        MetricKind::Gauge,
        None,
        "Aggregated population stability index of the latest check",
    ),
    metric(
        "lifecycle_drift_js_divergence",
        MetricKind::Gauge,
        None,
        "Prediction-class Jensen-Shannon divergence of the latest check (nats)",
    ),
    metric(
        "lifecycle_drift_check_duration_seconds",
        MetricKind::Histogram,
        Some(Unit::Seconds),
        "Time spent computing one drift check",
    ),
    metric(
        "lifecycle_retraining_jobs_total",
        MetricKind::Counter,
        Some(Unit::Count),
        "Retraining jobs by terminal status",
    ),
    metric(
        "lifecycle_retraining_skipped_total",
        MetricKind::Counter,
        Some(Unit::Count),
        "Triggers that did not start a job",
    ),
    metric(
        "lifecycle_retraining_duration_seconds",
        MetricKind::Histogram,
        Some(Unit::Seconds),
        "Wall time from job start to terminal state",
    ),
    metric(
        "lifecycle_rollbacks_total",
        MetricKind::Counter,
        Some(Unit::Count),
        "Promotions reverted, by requester",
    ),
    metric(
        "lifecycle_model_active_version",
        MetricKind::Gauge,
        None,
        "Version currently serving for each model",
    ),
    metric(
        "lifecycle_stale_jobs_reconciled_total",
        MetricKind::Counter,
        Some(Unit::Count),
        "Jobs force-failed after exceeding the stale timeout",
    ),
    metric(
        "lifecycle_persistence_retries_total",
        MetricKind::Counter,
        Some(Unit::Count),
        "Transient database errors retried",
    ),
    metric(
        "lifecycle_persistence_failures_total",
        MetricKind::Counter,
        Some(Unit::Count),
        "Job-boundary writes that exhausted their retries",
    ),
    metric(
        "lifecycle_scheduler_cycles_total",
        MetricKind::Counter,
        Some(Unit::Count),
        "Scheduler cycles run",
    ),
    metric(
        "lifecycle_scheduler_cycle_duration_seconds",
        MetricKind::Histogram,
        Some(Unit::Seconds),
        "Wall time of one scheduler cycle",
    ),
    metric(
        "feature_store_snapshots_saved_total",
        MetricKind::Counter,
        Some(Unit::Count),
        "Transformer snapshots written",
    ),
    metric(
        "feature_store_cache_hits_total",
        MetricKind::Counter,
        Some(Unit::Count),
        "Transformer loads served from cache",
    ),
    metric(
        "feature_store_cache_misses_total",
        MetricKind::Counter,
        Some(Unit::Count),
        "Transformer loads that read the database",
    ),
];

/// Install logging and describe metrics. Safe to call more than once.
pub fn init_telemetry(config: &AppConfig) -> Result<(), TelemetryInitError> {
    init_tracing(config)?;
    describe_metrics();
    Ok(())
}

/// Install the global subscriber once, bridging `log::` records into it.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryInitError> {
    if TRACING_INSTALLED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Ok(());
    }

    if let Err(err) = LogTracer::builder()
        .with_max_level(LevelFilter::Trace)
        .init()
    {
        eprintln!("Warning: log bridge not installed ({err}); sqlx records will be dropped");
    }

    let fmt_layer = match config.log_format.as_str() {
        "pretty" => fmt::layer().pretty().with_target(false).boxed(),
        _ => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
    };

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter(config))
        .with(fmt_layer)
        .try_init()
    {
        TRACING_INSTALLED.store(false, Ordering::SeqCst);
        eprintln!("Warning: tracing subscriber not installed ({err}); keeping the existing one");
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise the configured level with chatty dependencies quieted.
fn env_filter(config: &AppConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(config)))
}

fn default_directives(config: &AppConfig) -> String {
    std::iter::once(config.log_level.as_str())
        .chain(QUIET_DEPENDENCIES.iter().copied())
        .collect::<Vec<_>>()
        .join(",")
}

/// Register units and help text for every metric the crate emits.
pub fn describe_metrics() {
    for metric in LIFECYCLE_METRICS {
        match (metric.kind, metric.unit) {
            (MetricKind::Counter, Some(unit)) => describe_counter!(metric.name, unit, metric.help),
            (MetricKind::Counter, None) => describe_counter!(metric.name, metric.help),
            (MetricKind::Gauge, Some(unit)) => describe_gauge!(metric.name, unit, metric.help),
            (MetricKind::Gauge, None) => describe_gauge!(metric.name, metric.help),
            (MetricKind::Histogram, Some(unit)) => {
                describe_histogram!(metric.name, unit, metric.help)
            }
            (MetricKind::Histogram, None) => describe_histogram!(metric.name, metric.help),
        }
    }
}

/// Root span for one process, carrying the deployment profile.
pub fn service_span(config: &AppConfig) -> Span {
    info_span!(
        "lifecycle",
        profile = %config.profile,
        version = env!("CARGO_PKG_VERSION")
    )
}
