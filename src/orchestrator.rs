//! # Retraining Orchestrator
//!
//! Runs one retraining attempt per model at a time and decides whether the
//! candidate replaces the active version.
//!
//! ## Job lifecycle
//!
//! ```text
//! queued -> running -> success
//!                   -> degradation_detected
//!                   -> failed
//! ```
//!
//! A `success` job may later be stamped `reverted_at` by a rollback. Every
//! terminal transition is conditional on the job still being `running`, so a
//! job force-failed by the stale reconciler can never promote.
//!
//! ## Exclusion
//!
//! In-process triggers contend on a per-model lock taken with `try_lock`; a
//! partial unique index on in-flight jobs rejects triggers from other
//! processes. Losers get [`LifecycleError::ConcurrencyConflict`]; nothing is
//! queued behind a running job.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use sea_orm::{DatabaseConnection, DbErr, TransactionTrait};
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::alerts::AlertPublisher;
use crate::collaborators::{
    Clock, DataRepository, EventBus, LifecycleEvent, Metrics, ResourceLimiter, TrainedCandidate,
    Trainer, TrainerError, TrainingInput,
};
use crate::config::{PersistenceRetryConfig, RetrainingConfig};
use crate::db::with_retry;
use crate::error::{LifecycleError, is_unique_violation};
use crate::feature_store::FeatureStore;
use crate::models::client_dataset::DatasetStatus;
use crate::models::drift_check::Model as DriftCheck;
use crate::models::ml_model::Model as MlModel;
use crate::models::model_version::{Model as ModelVersion, VersionStatus};
use crate::models::retraining_job::{JobStatus, JobTrigger, Model as RetrainingJob};
use crate::repositories::{
    ClientDatasetRepository, DatasetSummary, JobOutcome, MlModelRepository,
    ModelVersionRepository, NewModelVersion, NewRetrainingJob, RetrainingJobRepository,
};

/// Actor recorded on rollbacks triggered by the live regression check
pub const REGRESSION_MONITOR: &str = "regression-monitor";

/// External systems the orchestrator drives
#[derive(Clone)]
pub struct RetrainingServices {
    pub trainer: Arc<dyn Trainer>,
    pub data: Arc<dyn DataRepository>,
    pub limiter: Arc<dyn ResourceLimiter>,
    pub events: Arc<dyn EventBus>,
    pub clock: Arc<dyn Clock>,
}

/// How a retraining attempt ended
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RetrainingOutcome {
    /// Candidate became the active version
    Promoted {
        job: RetrainingJob,
        from_version: i32,
        to_version: i32,
        accuracy_delta: f64,
    },
    /// Candidate fell below the rollback threshold and was rejected
    Degraded {
        job: RetrainingJob,
        accuracy_delta: f64,
    },
    /// Trainer, evaluation or feature-store failure
    Failed { job: RetrainingJob, error: String },
}

impl RetrainingOutcome {
    pub fn job(&self) -> &RetrainingJob {
        match self {
            RetrainingOutcome::Promoted { job, .. }
            | RetrainingOutcome::Degraded { job, .. }
            | RetrainingOutcome::Failed { job, .. } => job,
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            RetrainingOutcome::Promoted { .. } => JobStatus::Success,
            RetrainingOutcome::Degraded { .. } => JobStatus::DegradationDetected,
            RetrainingOutcome::Failed { .. } => JobStatus::Failed,
        }
    }
}

/// Result of reverting a promotion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollbackOutcome {
    pub model_key: String,
    pub job_id: Uuid,
    pub from_version: i32,
    pub to_version: i32,
    pub requested_by: String,
}

/// Trained and evaluated candidate, not yet committed
struct Evaluated {
    candidate: TrainedCandidate,
    metrics: Metrics,
}

enum Commit {
    Done,
    JobNotRunning,
    ActiveVersionMoved,
}

pub struct RetrainingOrchestrator {
    db: DatabaseConnection,
    models: MlModelRepository,
    versions: ModelVersionRepository,
    jobs: RetrainingJobRepository,
    datasets: ClientDatasetRepository,
    features: Arc<FeatureStore>,
    alerts: Arc<AlertPublisher>,
    services: RetrainingServices,
    config: RetrainingConfig,
    retry: PersistenceRetryConfig,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl RetrainingOrchestrator {
    pub fn new(
        db: DatabaseConnection,
        features: Arc<FeatureStore>,
        alerts: Arc<AlertPublisher>,
        services: RetrainingServices,
        config: RetrainingConfig,
        retry: PersistenceRetryConfig,
    ) -> Self {
        Self {
            models: MlModelRepository::new(db.clone()),
            versions: ModelVersionRepository::new(db.clone()),
            jobs: RetrainingJobRepository::new(db.clone()),
            datasets: ClientDatasetRepository::new(db.clone()),
            db,
            features,
            alerts,
            services,
            config,
            retry,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.services.clock.now()
    }

    fn try_lock(&self, model_key: &str) -> Result<OwnedMutexGuard<()>, LifecycleError> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(model_key.to_string()).or_default().clone()
        };
        lock.try_lock_owned()
            .map_err(|_| LifecycleError::ConcurrencyConflict {
                model_key: model_key.to_string(),
            })
    }

    pub async fn in_flight_job(&self, model_key: &str) -> Result<Option<RetrainingJob>, LifecycleError> {
        self.jobs.in_flight(model_key).await
    }

    pub async fn jobs(&self, model_key: &str) -> Result<Vec<RetrainingJob>, LifecycleError> {
        self.jobs.list(model_key).await
    }

    /// Retrain after a drift check if the accumulated datasets justify it.
    ///
    /// Returns `None` when the check saw no drift or the active datasets are
    /// below `min_dataset_rows` / `min_dataset_confidence`.
    #[instrument(skip_all, fields(model_key = %check.model_key, drift_check_id = %check.id))]
    pub async fn trigger_drift(
        &self,
        check: &DriftCheck,
    ) -> Result<Option<RetrainingOutcome>, LifecycleError> {
        if !check.drift_detected {
            return Ok(None);
        }

        let _guard = self.try_lock(&check.model_key)?;
        let summary = self.datasets.active_summary(&check.model_key).await?;
        if !summary.meets(self.config.min_dataset_rows, self.config.min_dataset_confidence) {
            counter!("lifecycle_retraining_skipped_total", "reason" => "dataset_threshold")
                .increment(1);
            info!(
                total_rows = summary.total_rows,
                mean_confidence = summary.mean_confidence,
                min_rows = self.config.min_dataset_rows,
                min_confidence = self.config.min_dataset_confidence,
                "Drift detected but accumulated datasets are below threshold"
            );
            return Ok(None);
        }

        let request = NewRetrainingJob {
            model_key: check.model_key.clone(),
            trigger: JobTrigger::Drift,
            drift_check_id: Some(check.id),
            requested_by: None,
            source_model_version: 0,
            new_model_version: 0,
            old_metrics: serde_json::Value::Null,
        };
        self.run_locked(request, summary).await.map(Some)
    }

    /// Retrain on operator request with whatever datasets are active.
    #[instrument(skip(self))]
    pub async fn trigger_manual(
        &self,
        model_key: &str,
        requested_by: &str,
    ) -> Result<RetrainingOutcome, LifecycleError> {
        let _guard = self.try_lock(model_key)?;
        let summary = self.datasets.active_summary(model_key).await?;

        let request = NewRetrainingJob {
            model_key: model_key.to_string(),
            trigger: JobTrigger::Manual,
            drift_check_id: None,
            requested_by: Some(requested_by.to_string()),
            source_model_version: 0,
            new_model_version: 0,
            old_metrics: serde_json::Value::Null,
        };
        self.run_locked(request, summary).await
    }

    /// One attempt. The caller holds the per-model lock.
    async fn run_locked(
        &self,
        mut request: NewRetrainingJob,
        summary: DatasetSummary,
    ) -> Result<RetrainingOutcome, LifecycleError> {
        let started = Instant::now();
        let model_key = request.model_key.clone();
        let model = self.models.get(&model_key).await?;
        let source = self
            .versions
            .find(&model_key, model.active_version)
            .await?
            .ok_or_else(|| {
                LifecycleError::not_found("model version", format!("{model_key} v{}", model.active_version))
            })?;
        let old_metrics = Metrics::from_json(&source.metrics, source.accuracy);

        let latest = self.versions.latest_version(&model_key).await?.unwrap_or(0);
        let reserved = self.jobs.max_reserved_version(&model_key).await?.unwrap_or(0);
        let candidate_version = latest.max(reserved).max(model.active_version) + 1;

        request.source_model_version = model.active_version;
        request.new_model_version = candidate_version;
        request.old_metrics = old_metrics.to_json();

        let job = self.create_job(request).await?;
        let job_id = job.id;
        self.transitioned(&model_key, job_id, JobStatus::Queued).await;

        self.start_job(&job, &summary).await?;
        self.transitioned(&model_key, job_id, JobStatus::Running).await;
        info!(
            job_id = %job_id,
            source_version = model.active_version,
            candidate_version,
            datasets = summary.dataset_ids.len(),
            total_rows = summary.total_rows,
            "Retraining started"
        );

        let outcome = match self.execute(&model, candidate_version, &summary).await {
            Err(err) => self.fail_job(&job, &summary, &err.to_string()).await?,
            Ok(evaluated) => {
                let accuracy_delta = evaluated.metrics.accuracy - old_metrics.accuracy;
                if accuracy_delta < self.config.rollback_threshold {
                    self.reject_candidate(
                        &job,
                        &summary,
                        &old_metrics,
                        evaluated,
                        candidate_version,
                        accuracy_delta,
                    )
                    .await?
                } else if let Err(err) = self
                    .features
                    .save(&model_key, candidate_version, &evaluated.candidate.transformers)
                    .await
                {
                    self.fail_job(&job, &summary, &err.to_string()).await?
                } else {
                    match self
                        .promote_candidate(&job, &model, &summary, evaluated, candidate_version, accuracy_delta)
                        .await
                    {
                        Err(err @ LifecycleError::Conflict { .. }) => {
                            self.fail_job(&job, &summary, &err.to_string()).await?
                        }
                        other => other?,
                    }
                }
            }
        };

        counter!("lifecycle_retraining_jobs_total", "status" => outcome.status().as_str()).increment(1);
        histogram!("lifecycle_retraining_duration_seconds").record(started.elapsed().as_secs_f64());
        Ok(outcome)
    }

    async fn create_job(&self, request: NewRetrainingJob) -> Result<RetrainingJob, LifecycleError> {
        let model_key = request.model_key.clone();
        let now = self.now();
        let inserted = with_retry(&self.retry, "insert retraining job", || {
            self.jobs.insert_queued(request.clone(), now)
        })
        .await;

        match inserted {
            Ok(job) => Ok(job),
            Err(err) if is_unique_violation(&err) => {
                info!(model_key = %model_key, "Retraining already in flight in another worker");
                Err(LifecycleError::ConcurrencyConflict { model_key })
            }
            Err(err) => Err(self.persistence_exhausted(&model_key, None, "insert retraining job", err).await),
        }
    }

    /// queued -> running, claiming the consumed datasets.
    async fn start_job(
        &self,
        job: &RetrainingJob,
        summary: &DatasetSummary,
    ) -> Result<(), LifecycleError> {
        let now = self.now();
        let job_id = job.id;
        let ids = &summary.dataset_ids;

        let started = with_retry(&self.retry, "start retraining job", || async move {
            let txn = self.db.begin().await?;
            if !RetrainingJobRepository::mark_running(&txn, job_id, now).await? {
                txn.rollback().await?;
                return Ok(false);
            }
            ClientDatasetRepository::transition(
                &txn,
                ids,
                DatasetStatus::Active,
                DatasetStatus::Processing,
                now,
            )
            .await?;
            txn.commit().await?;
            Ok::<_, DbErr>(true)
        })
        .await;

        match started {
            Ok(true) => Ok(()),
            Ok(false) => Err(LifecycleError::StaleJob { job_id }),
            Err(err) => Err(self
                .persistence_exhausted(&job.model_key, Some(job_id), "start retraining job", err)
                .await),
        }
    }

    /// Train and evaluate under one compute slot. Waiting for the slot counts
    /// against the job duration limit.
    async fn execute(
        &self,
        model: &MlModel,
        candidate_version: i32,
        summary: &DatasetSummary,
    ) -> Result<Evaluated, LifecycleError> {
        let limit = self.config.max_job_duration();
        let work = async {
            let _slot = self.services.limiter.acquire().await?;

            let transformers = self
                .features
                .load(&model.model_key, model.active_version)
                .await?;
            let holdout = self.services.data.holdout(&model.model_key).await?;

            let input = TrainingInput {
                model_key: model.model_key.clone(),
                source_version: model.active_version,
                candidate_version,
                transformers,
                datasets: summary.datasets.clone(),
            };

            let trainer = &self.services.trainer;
            let candidate = trainer.train(&input).await?;
            let metrics = trainer.evaluate(&candidate.artifact, &holdout).await?;
            metrics.validate()?;
            Ok::<_, LifecycleError>(Evaluated { candidate, metrics })
        };

        tokio::time::timeout(limit, work).await.map_err(|_| {
            LifecycleError::from(TrainerError::Timeout {
                seconds: limit.as_secs(),
            })
        })?
    }

    async fn reject_candidate(
        &self,
        job: &RetrainingJob,
        summary: &DatasetSummary,
        old_metrics: &Metrics,
        evaluated: Evaluated,
        candidate_version: i32,
        accuracy_delta: f64,
    ) -> Result<RetrainingOutcome, LifecycleError> {
        let now = self.now();
        let job_id = job.id;
        let ids = &summary.dataset_ids;
        let outcome = JobOutcome::DegradationDetected {
            new_metrics: evaluated.metrics.to_json(),
            accuracy_delta,
        };
        let rejected = NewModelVersion {
            model_key: job.model_key.clone(),
            version: candidate_version,
            status: VersionStatus::Rejected,
            accuracy: evaluated.metrics.accuracy,
            metrics: evaluated.metrics.to_json(),
            training_metadata: Some(evaluated.candidate.training_metadata.clone()),
            artifact_uri: Some(evaluated.candidate.artifact.uri.clone()),
        };
        let (outcome_ref, rejected_ref) = (&outcome, &rejected);

        let recorded = with_retry(&self.retry, "record degraded retraining job", || async move {
            let txn = self.db.begin().await?;
            if !RetrainingJobRepository::finish(&txn, job_id, outcome_ref, now).await? {
                txn.rollback().await?;
                return Ok(false);
            }
            ModelVersionRepository::insert(&txn, rejected_ref.clone(), now).await?;
            ClientDatasetRepository::transition(
                &txn,
                ids,
                DatasetStatus::Processing,
                DatasetStatus::Active,
                now,
            )
            .await?;
            txn.commit().await?;
            Ok::<_, DbErr>(true)
        })
        .await;

        match recorded {
            Ok(true) => {}
            Ok(false) => return Err(LifecycleError::StaleJob { job_id }),
            Err(err) => {
                return Err(self
                    .persistence_exhausted(&job.model_key, Some(job_id), "record degraded retraining job", err)
                    .await);
            }
        }

        warn!(
            job_id = %job_id,
            old_accuracy = old_metrics.accuracy,
            new_accuracy = evaluated.metrics.accuracy,
            accuracy_delta,
            rollback_threshold = self.config.rollback_threshold,
            "Candidate rejected for degradation"
        );
        self.transitioned(&job.model_key, job_id, JobStatus::DegradationDetected)
            .await;
        if let Err(err) = self
            .alerts
            .model_degradation(
                &job.model_key,
                job_id,
                old_metrics.accuracy,
                evaluated.metrics.accuracy,
                accuracy_delta,
                self.config.rollback_threshold,
            )
            .await
        {
            warn!(job_id = %job_id, error = %err, "Failed to raise degradation alert");
        }

        let job = self.reload(job).await;
        Ok(RetrainingOutcome::Degraded {
            job,
            accuracy_delta,
        })
    }

    async fn promote_candidate(
        &self,
        job: &RetrainingJob,
        model: &MlModel,
        summary: &DatasetSummary,
        evaluated: Evaluated,
        candidate_version: i32,
        accuracy_delta: f64,
    ) -> Result<RetrainingOutcome, LifecycleError> {
        let now = self.now();
        let job_id = job.id;
        let ids = &summary.dataset_ids;
        let model_key = model.model_key.as_str();
        let from_version = model.active_version;
        let accuracy = evaluated.metrics.accuracy;
        let outcome = JobOutcome::Success {
            new_metrics: evaluated.metrics.to_json(),
            accuracy_delta,
        };
        let promoted = NewModelVersion {
            model_key: model.model_key.clone(),
            version: candidate_version,
            status: VersionStatus::Active,
            accuracy,
            metrics: evaluated.metrics.to_json(),
            training_metadata: Some(evaluated.candidate.training_metadata.clone()),
            artifact_uri: Some(evaluated.candidate.artifact.uri.clone()),
        };
        let (outcome_ref, promoted_ref) = (&outcome, &promoted);

        let committed = with_retry(&self.retry, "promote retrained model", || async move {
            let txn = self.db.begin().await?;
            if !RetrainingJobRepository::finish(&txn, job_id, outcome_ref, now).await? {
                txn.rollback().await?;
                return Ok(Commit::JobNotRunning);
            }
            ModelVersionRepository::insert(&txn, promoted_ref.clone(), now).await?;
            let swapped = MlModelRepository::swap_active_version(
                &txn,
                model_key,
                from_version,
                candidate_version,
                accuracy,
                Some(now),
                now,
            )
            .await?;
            if !swapped {
                txn.rollback().await?;
                return Ok(Commit::ActiveVersionMoved);
            }
            ModelVersionRepository::transition_status(
                &txn,
                model_key,
                from_version,
                VersionStatus::Active,
                VersionStatus::Archived,
            )
            .await?;
            ClientDatasetRepository::transition(
                &txn,
                ids,
                DatasetStatus::Processing,
                DatasetStatus::Archived,
                now,
            )
            .await?;
            txn.commit().await?;
            Ok::<_, DbErr>(Commit::Done)
        })
        .await;

        match committed {
            Ok(Commit::Done) => {}
            Ok(Commit::JobNotRunning) => return Err(LifecycleError::StaleJob { job_id }),
            Ok(Commit::ActiveVersionMoved) => {
                return Err(LifecycleError::Conflict {
                    message: format!(
                        "active version of {model_key} changed from v{from_version} during retraining"
                    ),
                });
            }
            Err(err) => {
                return Err(self
                    .persistence_exhausted(model_key, Some(job_id), "promote retrained model", err)
                    .await);
            }
        }

        gauge!("lifecycle_model_active_version", "model_key" => model.model_key.clone())
            .set(f64::from(candidate_version));
        info!(
            job_id = %job_id,
            from_version,
            to_version = candidate_version,
            accuracy,
            accuracy_delta,
            "Promoted retrained model"
        );
        self.transitioned(model_key, job_id, JobStatus::Success).await;
        if let Err(err) = self
            .alerts
            .model_promoted(model_key, job_id, from_version, candidate_version, accuracy_delta)
            .await
        {
            warn!(job_id = %job_id, error = %err, "Failed to raise promotion alert");
        }

        let job = self.reload(job).await;
        Ok(RetrainingOutcome::Promoted {
            job,
            from_version,
            to_version: candidate_version,
            accuracy_delta,
        })
    }

    /// running -> failed, returning the consumed datasets to `active`.
    async fn fail_job(
        &self,
        job: &RetrainingJob,
        summary: &DatasetSummary,
        error_message: &str,
    ) -> Result<RetrainingOutcome, LifecycleError> {
        let now = self.now();
        let job_id = job.id;
        let ids = &summary.dataset_ids;
        let outcome = JobOutcome::Failed {
            error_message: error_message.to_string(),
        };
        let outcome_ref = &outcome;

        let recorded = with_retry(&self.retry, "record failed retraining job", || async move {
            let txn = self.db.begin().await?;
            if !RetrainingJobRepository::finish(&txn, job_id, outcome_ref, now).await? {
                txn.rollback().await?;
                return Ok(false);
            }
            ClientDatasetRepository::transition(
                &txn,
                ids,
                DatasetStatus::Processing,
                DatasetStatus::Active,
                now,
            )
            .await?;
            txn.commit().await?;
            Ok::<_, DbErr>(true)
        })
        .await;

        match recorded {
            Ok(true) => {}
            Ok(false) => return Err(LifecycleError::StaleJob { job_id }),
            Err(err) => {
                return Err(self
                    .persistence_exhausted(&job.model_key, Some(job_id), "record failed retraining job", err)
                    .await);
            }
        }

        warn!(job_id = %job_id, model_key = %job.model_key, error = error_message, "Retraining failed");
        self.transitioned(&job.model_key, job_id, JobStatus::Failed).await;
        if let Err(err) = self
            .alerts
            .retraining_failed(&job.model_key, job_id, error_message)
            .await
        {
            warn!(job_id = %job_id, error = %err, "Failed to raise retraining alert");
        }

        let job = self.reload(job).await;
        Ok(RetrainingOutcome::Failed {
            job,
            error: error_message.to_string(),
        })
    }

    /// Revert the promotion that produced the current active version.
    #[instrument(skip(self))]
    pub async fn rollback(
        &self,
        model_key: &str,
        requested_by: &str,
    ) -> Result<RollbackOutcome, LifecycleError> {
        let _guard = self.try_lock(model_key)?;

        let model = self.models.get(model_key).await?;
        let from_version = model.active_version;
        let job = self
            .jobs
            .promoting_job(model_key, from_version)
            .await?
            .ok_or_else(|| {
                LifecycleError::not_found("promoting retraining job", format!("{model_key} v{from_version}"))
            })?;
        let to_version = job.source_model_version;
        let target: ModelVersion = self
            .versions
            .find(model_key, to_version)
            .await?
            .ok_or_else(|| LifecycleError::not_found("model version", format!("{model_key} v{to_version}")))?;

        let now = self.now();
        let txn = self
            .db
            .begin()
            .await
            .map_err(|err| LifecycleError::persistence("begin rollback", err))?;

        let swapped = MlModelRepository::swap_active_version(
            &txn,
            model_key,
            from_version,
            to_version,
            target.accuracy,
            None,
            now,
        )
        .await
        .map_err(|err| LifecycleError::persistence("swap active version", err))?;
        if !swapped {
            txn.rollback()
                .await
                .map_err(|err| LifecycleError::persistence("abort rollback", err))?;
            return Err(LifecycleError::Conflict {
                message: format!("active version of {model_key} moved during rollback"),
            });
        }

        let write = async {
            ModelVersionRepository::transition_status(
                &txn,
                model_key,
                to_version,
                VersionStatus::Archived,
                VersionStatus::Active,
            )
            .await?;
            ModelVersionRepository::transition_status(
                &txn,
                model_key,
                from_version,
                VersionStatus::Active,
                VersionStatus::Archived,
            )
            .await?;
            RetrainingJobRepository::stamp_reverted(&txn, job.id, requested_by, now).await?;
            Ok::<_, DbErr>(())
        };
        write
            .await
            .map_err(|err| LifecycleError::persistence("record rollback", err))?;
        txn.commit()
            .await
            .map_err(|err| LifecycleError::persistence("commit rollback", err))?;

        counter!("lifecycle_rollbacks_total").increment(1);
        gauge!("lifecycle_model_active_version", "model_key" => model_key.to_string())
            .set(f64::from(to_version));
        info!(job_id = %job.id, from_version, to_version, requested_by, "Rolled back model");

        if let Err(err) = self
            .alerts
            .model_rolled_back(model_key, job.id, from_version, to_version, requested_by)
            .await
        {
            warn!(job_id = %job.id, error = %err, "Failed to raise rollback alert");
        }

        Ok(RollbackOutcome {
            model_key: model_key.to_string(),
            job_id: job.id,
            from_version,
            to_version,
            requested_by: requested_by.to_string(),
        })
    }

    /// Roll back a recent promotion whose live accuracy has regressed.
    ///
    /// Only promotions younger than `rollback_window_days` are considered;
    /// live metrics come from the data repository.
    pub async fn check_regression(
        &self,
        model_key: &str,
    ) -> Result<Option<RollbackOutcome>, LifecycleError> {
        let Some((model, promoted_at)) = self.recent_promotion(model_key).await? else {
            return Ok(None);
        };
        let observed = self
            .services
            .data
            .live_metrics(model_key, model.active_version, promoted_at)
            .await?;
        match observed {
            Some(observed) => self.check_regression_with(model_key, &observed).await,
            None => Ok(None),
        }
    }

    /// Like [`check_regression`](Self::check_regression) with caller-supplied live metrics.
    pub async fn check_regression_with(
        &self,
        model_key: &str,
        observed: &Metrics,
    ) -> Result<Option<RollbackOutcome>, LifecycleError> {
        let Some((model, _)) = self.recent_promotion(model_key).await? else {
            return Ok(None);
        };

        let floor = model.accuracy + self.config.rollback_threshold;
        if observed.accuracy >= floor {
            return Ok(None);
        }

        warn!(
            model_key,
            version = model.active_version,
            promoted_accuracy = model.accuracy,
            observed_accuracy = observed.accuracy,
            "Live accuracy regressed after promotion"
        );
        self.rollback(model_key, REGRESSION_MONITOR).await.map(Some)
    }

    /// Active model and promotion time when its version was promoted within the rollback window.
    async fn recent_promotion(
        &self,
        model_key: &str,
    ) -> Result<Option<(MlModel, DateTime<Utc>)>, LifecycleError> {
        let model = self.models.get(model_key).await?;
        let Some(job) = self.jobs.promoting_job(model_key, model.active_version).await? else {
            return Ok(None);
        };
        let Some(promoted_at) = job.finished_at.map(|t| t.with_timezone(&Utc)) else {
            return Ok(None);
        };
        if self.now() - promoted_at > self.config.rollback_window() {
            return Ok(None);
        }
        Ok(Some((model, promoted_at)))
    }

    /// Force-fail in-flight jobs older than the stale timeout and release their datasets.
    pub async fn reconcile_stale(&self) -> Result<usize, LifecycleError> {
        let now = self.now();
        let cutoff = now - self.config.stale_job_timeout();
        let stale = self.jobs.stale(cutoff).await?;

        let mut reconciled = 0;
        for job in stale {
            let message = format!(
                "job exceeded stale timeout of {}s",
                self.config.stale_job_timeout_seconds
            );
            let job_id = job.id;
            let model_key = job.model_key.as_str();
            let message_ref = message.as_str();

            let failed = with_retry(&self.retry, "reconcile stale retraining job", || async move {
                let txn = self.db.begin().await?;
                if !RetrainingJobRepository::fail_in_flight(&txn, job_id, message_ref, now).await? {
                    txn.rollback().await?;
                    return Ok(false);
                }
                ClientDatasetRepository::release_processing(&txn, model_key, now).await?;
                txn.commit().await?;
                Ok::<_, DbErr>(true)
            })
            .await;

            match failed {
                Ok(true) => {
                    reconciled += 1;
                    counter!("lifecycle_stale_jobs_reconciled_total").increment(1);
                    warn!(job_id = %job_id, model_key, created_at = %job.created_at, "Reconciled stale retraining job");
                    self.transitioned(model_key, job_id, JobStatus::Failed).await;
                    if let Err(err) = self.alerts.retraining_failed(model_key, job_id, &message).await {
                        warn!(job_id = %job_id, error = %err, "Failed to raise stale job alert");
                    }
                }
                Ok(false) => {}
                Err(err) => {
                    error!(job_id = %job_id, model_key, error = %err, "Failed to reconcile stale job");
                }
            }
        }

        Ok(reconciled)
    }

    async fn reload(&self, job: &RetrainingJob) -> RetrainingJob {
        match self.jobs.find(job.id).await {
            Ok(Some(fresh)) => fresh,
            _ => job.clone(),
        }
    }

    async fn transitioned(&self, model_key: &str, job_id: Uuid, status: JobStatus) {
        let event = LifecycleEvent::JobTransitioned {
            model_key: model_key.to_string(),
            job_id,
            status,
        };
        if let Err(err) = self.services.events.publish(event).await {
            warn!(job_id = %job_id, error = %err, "Failed to deliver job event");
        }
    }

    /// Report a job-boundary write that exhausted its retries.
    async fn persistence_exhausted(
        &self,
        model_key: &str,
        job_id: Option<Uuid>,
        context: &'static str,
        err: DbErr,
    ) -> LifecycleError {
        counter!("lifecycle_persistence_failures_total", "context" => context).increment(1);
        if let Err(alert_err) = self
            .alerts
            .persistence_failure(model_key, job_id, context, &err.to_string())
            .await
        {
            error!(model_key, error = %alert_err, "Failed to raise persistence alert");
        }
        LifecycleError::persistence(context, err)
    }
}
