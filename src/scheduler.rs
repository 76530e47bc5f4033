//! # Job Scheduler
//!
//! Daily driver for the lifecycle. At the configured UTC wall-clock time it
//! reconciles stale retraining jobs, then visits every active model on a
//! bounded worker pool: drift check, retraining on drift, and a post-promotion
//! regression check. Re-running a cycle on the same day is a no-op for models
//! that already have a drift check.

use std::sync::Arc;

use chrono::{DateTime, NaiveTime, Utc};
use metrics::{counter, histogram};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::collaborators::Clock;
use crate::config::{ConfigError, SchedulerConfig};
use crate::drift::DriftMonitor;
use crate::error::LifecycleError;
use crate::models::ml_model::Model as MlModel;
use crate::orchestrator::{RetrainingOrchestrator, RetrainingOutcome};
use crate::repositories::MlModelRepository;

/// Counters for one scheduler cycle
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Drift checks recorded this cycle
    pub checked: u64,
    /// Models that already had today's check
    pub skipped: u64,
    /// Models with too little production data
    pub inconclusive: u64,
    pub drift: u64,
    /// Retraining attempts that reached a terminal state
    pub retrained: u64,
    /// Triggers rejected because a job was already in flight
    pub conflicts: u64,
    pub errors: u64,
    /// Stale jobs force-failed before the fan-out
    pub reconciled: u64,
    pub rolled_back: u64,
}

impl CycleReport {
    fn absorb(&mut self, other: &CycleReport) {
        self.checked += other.checked;
        self.skipped += other.skipped;
        self.inconclusive += other.inconclusive;
        self.drift += other.drift;
        self.retrained += other.retrained;
        self.conflicts += other.conflicts;
        self.errors += other.errors;
        self.reconciled += other.reconciled;
        self.rolled_back += other.rolled_back;
    }
}

pub struct JobScheduler {
    models: MlModelRepository,
    monitor: Arc<DriftMonitor>,
    orchestrator: Arc<RetrainingOrchestrator>,
    clock: Arc<dyn Clock>,
    run_at: NaiveTime,
    worker_pool_size: usize,
}

impl JobScheduler {
    pub fn new(
        models: MlModelRepository,
        monitor: Arc<DriftMonitor>,
        orchestrator: Arc<RetrainingOrchestrator>,
        clock: Arc<dyn Clock>,
        config: &SchedulerConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            models,
            monitor,
            orchestrator,
            clock,
            run_at: config.run_at()?,
            worker_pool_size: config.worker_pool_size.max(1),
        })
    }

    /// Run a cycle at each daily fire time until `shutdown` fires.
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(run_at = %self.run_at, workers = self.worker_pool_size, "Starting job scheduler");

        loop {
            let now = self.clock.now();
            let next = next_run_after(now, self.run_at);
            debug!(next_run = %next, wait_seconds = (next - now).num_seconds(), "Scheduler sleeping");

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Job scheduler shutdown requested");
                    break;
                }
                _ = self.clock.sleep_until(next) => {
                    match self.run_cycle().await {
                        Ok(report) => info!(?report, "Scheduler cycle completed"),
                        Err(err) => error!(error = ?err, "Scheduler cycle failed"),
                    }
                }
            }
        }

        info!("Job scheduler stopped");
    }

    /// Reconcile stale jobs, then process every active model once.
    #[instrument(skip_all)]
    pub async fn run_cycle(&self) -> Result<CycleReport, LifecycleError> {
        let started = Instant::now();
        let mut report = CycleReport::default();

        match self.orchestrator.reconcile_stale().await {
            Ok(reconciled) => report.reconciled = reconciled as u64,
            Err(err) => {
                report.errors += 1;
                error!(error = ?err, "Stale job reconciliation failed");
            }
        }

        let models = self.models.list_active().await?;
        let workers = Arc::new(Semaphore::new(self.worker_pool_size));
        let mut tasks = JoinSet::new();

        for model in models {
            let workers = workers.clone();
            let monitor = self.monitor.clone();
            let orchestrator = self.orchestrator.clone();
            tasks.spawn(async move {
                let Ok(_permit) = workers.acquire_owned().await else {
                    return CycleReport {
                        errors: 1,
                        ..Default::default()
                    };
                };
                process_model(&monitor, &orchestrator, &model).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(tally) => report.absorb(&tally),
                Err(err) => {
                    report.errors += 1;
                    error!(error = %err, "Model task aborted");
                }
            }
        }

        counter!("lifecycle_scheduler_cycles_total").increment(1);
        histogram!("lifecycle_scheduler_cycle_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        Ok(report)
    }
}

/// One model's share of a cycle. Errors are counted, never propagated.
#[instrument(skip_all, fields(model_key = %model.model_key))]
async fn process_model(
    monitor: &DriftMonitor,
    orchestrator: &RetrainingOrchestrator,
    model: &MlModel,
) -> CycleReport {
    let mut tally = CycleReport::default();

    match monitor.todays_check(&model.model_key).await {
        Ok(Some(_)) => {
            tally.skipped += 1;
            return tally;
        }
        Ok(None) => {}
        Err(err) => {
            tally.errors += 1;
            error!(error = ?err, "Failed to look up today's drift check");
            return tally;
        }
    }

    match monitor.check(model).await {
        Ok(report) if !report.created => tally.skipped += 1,
        Ok(report) => {
            tally.checked += 1;
            if report.drift_detected() {
                tally.drift += 1;
                retrain_on_drift(orchestrator, &report.check, &mut tally).await;
            }
        }
        Err(LifecycleError::InsufficientData { .. }) => tally.inconclusive += 1,
        Err(err) => {
            tally.errors += 1;
            error!(error = ?err, code = err.code(), "Drift check failed");
        }
    }

    match orchestrator.check_regression(&model.model_key).await {
        Ok(Some(rollback)) => {
            tally.rolled_back += 1;
            warn!(
                from_version = rollback.from_version,
                to_version = rollback.to_version,
                "Rolled back regressed promotion"
            );
        }
        Ok(None) => {}
        Err(LifecycleError::ConcurrencyConflict { .. }) => tally.conflicts += 1,
        Err(err) => {
            tally.errors += 1;
            error!(error = ?err, code = err.code(), "Regression check failed");
        }
    }

    tally
}

async fn retrain_on_drift(
    orchestrator: &RetrainingOrchestrator,
    check: &crate::models::drift_check::Model,
    tally: &mut CycleReport,
) {
    match orchestrator.in_flight_job(&check.model_key).await {
        Ok(Some(job)) => {
            tally.conflicts += 1;
            info!(job_id = %job.id, "Retraining already in flight; skipping trigger");
            return;
        }
        Ok(None) => {}
        Err(err) => {
            tally.errors += 1;
            error!(error = ?err, "Failed to look up in-flight retraining job");
            return;
        }
    }

    match orchestrator.trigger_drift(check).await {
        Ok(Some(outcome)) => {
            tally.retrained += 1;
            match &outcome {
                RetrainingOutcome::Promoted { to_version, .. } => {
                    info!(to_version, "Drift retraining promoted a new version");
                }
                RetrainingOutcome::Degraded { accuracy_delta, .. } => {
                    warn!(accuracy_delta, "Drift retraining rejected for degradation");
                }
                RetrainingOutcome::Failed { error, .. } => {
                    warn!(error = %error, "Drift retraining failed");
                }
            }
        }
        Ok(None) => {}
        Err(LifecycleError::ConcurrencyConflict { .. }) => tally.conflicts += 1,
        Err(err) => {
            tally.errors += 1;
            error!(error = ?err, code = err.code(), "Drift retraining aborted");
        }
    }
}

/// Next instant at `run_at` (UTC) strictly after `now`.
pub fn next_run_after(now: DateTime<Utc>, run_at: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(run_at).and_utc();
    if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    }
}
