//! FeatureSnapshot entity
//!
//! Fitted input transformers for one (model_key, version). Rows are
//! content-addressed and never updated.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "feature_snapshots")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub model_key: String,

    pub version: i32,

    /// Hex sha256 of the canonical JSON payload
    pub content_hash: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub feature_names: Json,

    #[sea_orm(column_type = "JsonBinary")]
    pub feature_kinds: Json,

    /// Serialized transformer set
    #[sea_orm(column_type = "JsonBinary")]
    pub payload: Json,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
