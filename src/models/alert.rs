//! Alert entity
//!
//! Durable alert records derived from monitor and orchestrator outcomes.
//! Delivery to live transports happens through the event bus.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "alerts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub model_key: String,

    pub alert_type: AlertType,

    pub severity: AlertSeverity,

    pub title: String,

    /// Structured diagnostic payload
    #[sea_orm(column_type = "JsonBinary")]
    pub details: Json,

    pub created_at: DateTimeWithTimeZone,

    pub dismissed_at: Option<DateTimeWithTimeZone>,

    pub dismissed_by: Option<String>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    #[sea_orm(string_value = "drift_detected")]
    DriftDetected,

    #[sea_orm(string_value = "model_degradation")]
    ModelDegradation,

    #[sea_orm(string_value = "retraining_failed")]
    RetrainingFailed,

    #[sea_orm(string_value = "model_promoted")]
    ModelPromoted,

    #[sea_orm(string_value = "model_rolled_back")]
    ModelRolledBack,

    #[sea_orm(string_value = "persistence_failure")]
    PersistenceFailure,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    #[sea_orm(string_value = "info")]
    Info,

    #[sea_orm(string_value = "warning")]
    Warning,

    #[sea_orm(string_value = "critical")]
    Critical,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
