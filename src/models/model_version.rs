//! ModelVersion entity
//!
//! Versions are immutable once created; only `status` moves between active,
//! archived and rejected. Artifacts referenced by `artifact_uri` are never deleted.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "model_versions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub model_key: String,

    /// Monotonic version number within the model
    pub version: i32,

    pub status: VersionStatus,

    /// Accuracy snapshot taken when the version was evaluated
    pub accuracy: f64,

    /// Full evaluation metrics
    #[sea_orm(column_type = "JsonBinary")]
    pub metrics: Json,

    /// Trainer-provided metadata (dataset versions, hyperparameters, durations)
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub training_metadata: Option<Json>,

    pub artifact_uri: Option<String>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, Default,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    #[sea_orm(string_value = "active")]
    #[default]
    Active,

    #[sea_orm(string_value = "archived")]
    Archived,

    /// Candidate that failed the degradation gate; kept for audit
    #[sea_orm(string_value = "rejected")]
    Rejected,
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
