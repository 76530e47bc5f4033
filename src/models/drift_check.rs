//! DriftCheck entity
//!
//! Exactly one row per (model_key, check_date), written once by the drift
//! monitor and never updated.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "drift_checks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub model_key: String,

    /// UTC calendar day the check belongs to
    pub check_date: Date,

    /// Aggregated Population Stability Index across features
    pub psi_value: f64,

    /// Jensen-Shannon divergence of the predicted class distribution
    pub js_divergence: f64,

    pub drift_detected: bool,

    pub items_analyzed: i64,

    /// Per-feature PSI values keyed by feature name
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub feature_scores: Option<Json>,

    pub created_at: DateTimeWithTimeZone,
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
