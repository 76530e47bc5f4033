//! # DriftCheck Repository

use chrono::NaiveDate;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder,
};

use crate::error::LifecycleError;
use crate::models::drift_check::{ActiveModel, Column, Entity, Model};

pub struct DriftCheckRepository {
    db: DatabaseConnection,
}

impl DriftCheckRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find_for_date(
        &self,
        model_key: &str,
        check_date: NaiveDate,
    ) -> Result<Option<Model>, LifecycleError> {
        Entity::find()
            .filter(Column::ModelKey.eq(model_key))
            .filter(Column::CheckDate.eq(check_date))
            .one(&self.db)
            .await
            .map_err(|err| LifecycleError::persistence("load drift check", err))
    }

    /// Raw insert; callers map unique violations on (model_key, check_date).
    pub async fn insert(&self, check: ActiveModel) -> Result<Model, DbErr> {
        check.insert(&self.db).await
    }

    /// Most recent checks first
    pub async fn list(&self, model_key: &str) -> Result<Vec<Model>, LifecycleError> {
        Entity::find()
            .filter(Column::ModelKey.eq(model_key))
            .order_by_desc(Column::CheckDate)
            .all(&self.db)
            .await
            .map_err(|err| LifecycleError::persistence("list drift checks", err))
    }
}
