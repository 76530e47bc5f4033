//! # RetrainingJob Repository
//!
//! Every status change is a conditional update on the expected prior status, so
//! a job reaches exactly one terminal state even when the reconciler and the
//! worker race.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use crate::error::LifecycleError;
use crate::models::retraining_job::{ActiveModel, Column, Entity, JobStatus, JobTrigger, Model};

#[derive(Debug, Clone)]
pub struct NewRetrainingJob {
    pub model_key: String,
    pub trigger: JobTrigger,
    pub drift_check_id: Option<Uuid>,
    pub requested_by: Option<String>,
    pub source_model_version: i32,
    pub new_model_version: i32,
    pub old_metrics: serde_json::Value,
}

/// Terminal result recorded on a job
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Success {
        new_metrics: serde_json::Value,
        accuracy_delta: f64,
    },
    DegradationDetected {
        new_metrics: serde_json::Value,
        accuracy_delta: f64,
    },
    Failed {
        error_message: String,
    },
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Success { .. } => JobStatus::Success,
            JobOutcome::DegradationDetected { .. } => JobStatus::DegradationDetected,
            JobOutcome::Failed { .. } => JobStatus::Failed,
        }
    }
}

pub struct RetrainingJobRepository {
    db: DatabaseConnection,
}

impl RetrainingJobRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Raw insert as `queued`; the partial unique index rejects a second in-flight job.
    pub async fn insert_queued(
        &self,
        new: NewRetrainingJob,
        now: DateTime<Utc>,
    ) -> Result<Model, DbErr> {
        ActiveModel {
            id: Set(Uuid::new_v4()),
            model_key: Set(new.model_key),
            trigger: Set(new.trigger),
            drift_check_id: Set(new.drift_check_id),
            requested_by: Set(new.requested_by),
            source_model_version: Set(new.source_model_version),
            new_model_version: Set(Some(new.new_model_version)),
            status: Set(JobStatus::Queued),
            old_metrics: Set(new.old_metrics),
            new_metrics: Set(None),
            accuracy_delta: Set(None),
            error_message: Set(None),
            created_at: Set(now.fixed_offset()),
            started_at: Set(None),
            finished_at: Set(None),
            reverted_at: Set(None),
            reverted_by: Set(None),
        }
        .insert(&self.db)
        .await
    }

    pub async fn find(&self, job_id: Uuid) -> Result<Option<Model>, LifecycleError> {
        Entity::find_by_id(job_id)
            .one(&self.db)
            .await
            .map_err(|err| LifecycleError::persistence("load retraining job", err))
    }

    pub async fn in_flight(&self, model_key: &str) -> Result<Option<Model>, LifecycleError> {
        Entity::find()
            .filter(Column::ModelKey.eq(model_key))
            .filter(Column::Status.is_in(JobStatus::in_flight()))
            .one(&self.db)
            .await
            .map_err(|err| LifecycleError::persistence("load in-flight retraining job", err))
    }

    /// Newest first
    pub async fn list(&self, model_key: &str) -> Result<Vec<Model>, LifecycleError> {
        Entity::find()
            .filter(Column::ModelKey.eq(model_key))
            .order_by_desc(Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(|err| LifecycleError::persistence("list retraining jobs", err))
    }

    /// In-flight jobs created before `cutoff`.
    pub async fn stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Model>, LifecycleError> {
        Entity::find()
            .filter(Column::Status.is_in(JobStatus::in_flight()))
            .filter(Column::CreatedAt.lt(cutoff.fixed_offset()))
            .order_by_asc(Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(|err| LifecycleError::persistence("load stale retraining jobs", err))
    }

    /// Highest candidate version any job has reserved for the model.
    pub async fn max_reserved_version(&self, model_key: &str) -> Result<Option<i32>, LifecycleError> {
        Entity::find()
            .filter(Column::ModelKey.eq(model_key))
            .filter(Column::NewModelVersion.is_not_null())
            .order_by_desc(Column::NewModelVersion)
            .one(&self.db)
            .await
            .map(|row| row.and_then(|job| job.new_model_version))
            .map_err(|err| LifecycleError::persistence("load reserved model version", err))
    }

    /// The non-reverted successful job that promoted `version`.
    pub async fn promoting_job(
        &self,
        model_key: &str,
        version: i32,
    ) -> Result<Option<Model>, LifecycleError> {
        Entity::find()
            .filter(Column::ModelKey.eq(model_key))
            .filter(Column::Status.eq(JobStatus::Success))
            .filter(Column::NewModelVersion.eq(version))
            .filter(Column::RevertedAt.is_null())
            .order_by_desc(Column::FinishedAt)
            .one(&self.db)
            .await
            .map_err(|err| LifecycleError::persistence("load promoting retraining job", err))
    }

    /// queued -> running
    pub async fn mark_running<C: ConnectionTrait>(
        conn: &C,
        job_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, DbErr> {
        let result = Entity::update_many()
            .set(ActiveModel {
                status: Set(JobStatus::Running),
                started_at: Set(Some(now.fixed_offset())),
                ..Default::default()
            })
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.eq(JobStatus::Queued))
            .exec(conn)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// running -> terminal. Returns `false` if the job was no longer running.
    pub async fn finish<C: ConnectionTrait>(
        conn: &C,
        job_id: Uuid,
        outcome: &JobOutcome,
        now: DateTime<Utc>,
    ) -> Result<bool, DbErr> {
        let mut update = ActiveModel {
            status: Set(outcome.status()),
            finished_at: Set(Some(now.fixed_offset())),
            ..Default::default()
        };

        match outcome {
            JobOutcome::Success {
                new_metrics,
                accuracy_delta,
            }
            | JobOutcome::DegradationDetected {
                new_metrics,
                accuracy_delta,
            } => {
                update.new_metrics = Set(Some(new_metrics.clone()));
                update.accuracy_delta = Set(Some(*accuracy_delta));
            }
            JobOutcome::Failed { error_message } => {
                update.error_message = Set(Some(error_message.clone()));
            }
        }

        let result = Entity::update_many()
            .set(update)
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.eq(JobStatus::Running))
            .exec(conn)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Force an in-flight job to `failed`, whatever its current in-flight state.
    pub async fn fail_in_flight<C: ConnectionTrait>(
        conn: &C,
        job_id: Uuid,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, DbErr> {
        let result = Entity::update_many()
            .set(ActiveModel {
                status: Set(JobStatus::Failed),
                error_message: Set(Some(error_message.to_string())),
                finished_at: Set(Some(now.fixed_offset())),
                ..Default::default()
            })
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.is_in(JobStatus::in_flight()))
            .exec(conn)
            .await?;
        Ok(result.rows_affected == 1)
    }

    pub async fn stamp_reverted<C: ConnectionTrait>(
        conn: &C,
        job_id: Uuid,
        reverted_by: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, DbErr> {
        let result = Entity::update_many()
            .set(ActiveModel {
                reverted_at: Set(Some(now.fixed_offset())),
                reverted_by: Set(Some(reverted_by.to_string())),
                ..Default::default()
            })
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.eq(JobStatus::Success))
            .filter(Column::RevertedAt.is_null())
            .exec(conn)
            .await?;
        Ok(result.rows_affected == 1)
    }
}
