//! RetrainingJob entity
//!
//! One row per retraining attempt. Status moves queued -> running -> one terminal
//! state and is never reopened; a later rollback only stamps `reverted_at`.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "retraining_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub model_key: String,

    pub trigger: JobTrigger,

    /// Drift check that caused the attempt, if drift-triggered
    pub drift_check_id: Option<Uuid>,

    /// Operator that requested a manual attempt
    pub requested_by: Option<String>,

    /// Active version at the time the job was created
    pub source_model_version: i32,

    /// Version number reserved for the candidate
    pub new_model_version: Option<i32>,

    pub status: JobStatus,

    #[sea_orm(column_type = "JsonBinary")]
    pub old_metrics: Json,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub new_metrics: Option<Json>,

    pub accuracy_delta: Option<f64>,

    pub error_message: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub started_at: Option<DateTimeWithTimeZone>,

    pub finished_at: Option<DateTimeWithTimeZone>,

    pub reverted_at: Option<DateTimeWithTimeZone>,

    pub reverted_by: Option<String>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, Default,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[sea_orm(string_value = "queued")]
    #[default]
    Queued,

    #[sea_orm(string_value = "running")]
    Running,

    #[sea_orm(string_value = "success")]
    Success,

    #[sea_orm(string_value = "degradation_detected")]
    DegradationDetected,

    #[sea_orm(string_value = "failed")]
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::DegradationDetected => "degradation_detected",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::DegradationDetected | JobStatus::Failed
        )
    }

    /// Statuses covered by the single-flight index
    pub fn in_flight() -> Vec<JobStatus> {
        vec![JobStatus::Queued, JobStatus::Running]
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum JobTrigger {
    #[sea_orm(string_value = "drift")]
    Drift,

    #[sea_orm(string_value = "manual")]
    Manual,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::ml_model::Entity",
        from = "Column::ModelKey",
        to = "super::ml_model::Column::ModelKey"
    )]
    MlModel,
}

impl Related<super::ml_model::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MlModel.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
