//! # Alert Repository

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use crate::error::LifecycleError;
use crate::models::alert::{ActiveModel, AlertSeverity, AlertType, Column, Entity, Model};

#[derive(Debug, Clone)]
pub struct NewAlert {
    pub model_key: String,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub title: String,
    pub details: serde_json::Value,
}

pub struct AlertRepository {
    db: DatabaseConnection,
}

impl AlertRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn insert(&self, new: NewAlert, now: DateTime<Utc>) -> Result<Model, LifecycleError> {
        ActiveModel {
            id: Set(Uuid::new_v4()),
            model_key: Set(new.model_key),
            alert_type: Set(new.alert_type),
            severity: Set(new.severity),
            title: Set(new.title),
            details: Set(new.details),
            created_at: Set(now.fixed_offset()),
            dismissed_at: Set(None),
            dismissed_by: Set(None),
        }
        .insert(&self.db)
        .await
        .map_err(|err| LifecycleError::persistence("insert alert", err))
    }

    pub async fn find(&self, alert_id: Uuid) -> Result<Option<Model>, LifecycleError> {
        Entity::find_by_id(alert_id)
            .one(&self.db)
            .await
            .map_err(|err| LifecycleError::persistence("load alert", err))
    }

    /// Stamp the dismissal if the alert is still open; returns whether a row changed.
    pub async fn dismiss(
        &self,
        alert_id: Uuid,
        dismissed_by: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, LifecycleError> {
        let result = Entity::update_many()
            .set(ActiveModel {
                dismissed_at: Set(Some(now.fixed_offset())),
                dismissed_by: Set(Some(dismissed_by.to_string())),
                ..Default::default()
            })
            .filter(Column::Id.eq(alert_id))
            .filter(Column::DismissedAt.is_null())
            .exec(&self.db)
            .await
            .map_err(|err| LifecycleError::persistence("dismiss alert", err))?;
        Ok(result.rows_affected == 1)
    }

    /// Undismissed alerts, newest first; all models when `model_key` is `None`.
    pub async fn list_active(&self, model_key: Option<&str>) -> Result<Vec<Model>, LifecycleError> {
        let mut query = Entity::find().filter(Column::DismissedAt.is_null());
        if let Some(key) = model_key {
            query = query.filter(Column::ModelKey.eq(key));
        }
        query
            .order_by_desc(Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(|err| LifecycleError::persistence("list active alerts", err))
    }

    pub async fn list(&self, model_key: &str) -> Result<Vec<Model>, LifecycleError> {
        Entity::find()
            .filter(Column::ModelKey.eq(model_key))
            .order_by_asc(Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(|err| LifecycleError::persistence("list alerts", err))
    }
}
