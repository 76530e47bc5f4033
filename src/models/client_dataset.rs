//! ClientDataset entity
//!
//! Accumulated production data per model. `status` reflects whether a batch has
//! been picked up by a retraining attempt.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "client_datasets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub model_key: String,

    /// Monotonically increasing per model
    pub dataset_version: i32,

    pub row_count: i64,

    /// Mean label confidence across the rows of this batch
    pub mean_confidence: f64,

    /// Location of the rows in the external data repository
    pub storage_uri: String,

    pub status: DatasetStatus,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, Default,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum DatasetStatus {
    #[sea_orm(string_value = "active")]
    #[default]
    Active,

    #[sea_orm(string_value = "processing")]
    Processing,

    #[sea_orm(string_value = "archived")]
    Archived,
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
