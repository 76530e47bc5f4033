//! Model entity
//!
//! One row per served model. `active_version` is the only cross-cutting mutable
//! pointer in the subsystem and is swapped with compare-and-swap updates.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "models")]
pub struct Model {
    /// Stable identity of the model
    #[sea_orm(primary_key, auto_increment = false)]
    pub model_key: String,

    /// Version currently used for serving predictions
    pub active_version: i32,

    pub status: ModelStatus,

    /// Accuracy snapshot of the active version
    pub accuracy: f64,

    pub last_trained: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, Default,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    #[sea_orm(string_value = "active")]
    #[default]
    Active,

    #[sea_orm(string_value = "archived")]
    Archived,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::model_version::Entity")]
    ModelVersion,
    #[sea_orm(has_many = "super::drift_check::Entity")]
    DriftCheck,
    #[sea_orm(has_many = "super::retraining_job::Entity")]
    RetrainingJob,
}

impl Related<super::model_version::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ModelVersion.def()
    }
}

impl Related<super::drift_check::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DriftCheck.def()
    }
}

impl Related<super::retraining_job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RetrainingJob.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
