//! # ModelVersion Repository

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use crate::error::LifecycleError;
use crate::models::model_version::{ActiveModel, Column, Entity, Model, VersionStatus};

/// Fields for a version row
#[derive(Debug, Clone)]
pub struct NewModelVersion {
    pub model_key: String,
    pub version: i32,
    pub status: VersionStatus,
    pub accuracy: f64,
    pub metrics: serde_json::Value,
    pub training_metadata: Option<serde_json::Value>,
    pub artifact_uri: Option<String>,
}

pub struct ModelVersionRepository {
    db: DatabaseConnection,
}

impl ModelVersionRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find(&self, model_key: &str, version: i32) -> Result<Option<Model>, LifecycleError> {
        Self::find_in(&self.db, model_key, version)
            .await
            .map_err(|err| LifecycleError::persistence("load model version", err))
    }

    pub async fn find_in<C: ConnectionTrait>(
        conn: &C,
        model_key: &str,
        version: i32,
    ) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::ModelKey.eq(model_key))
            .filter(Column::Version.eq(version))
            .one(conn)
            .await
    }

    /// Highest version number ever allocated for the model, including rejected candidates.
    pub async fn latest_version(&self, model_key: &str) -> Result<Option<i32>, LifecycleError> {
        Entity::find()
            .filter(Column::ModelKey.eq(model_key))
            .order_by_desc(Column::Version)
            .one(&self.db)
            .await
            .map(|row| row.map(|v| v.version))
            .map_err(|err| LifecycleError::persistence("load latest model version", err))
    }

    pub async fn list(&self, model_key: &str) -> Result<Vec<Model>, LifecycleError> {
        Entity::find()
            .filter(Column::ModelKey.eq(model_key))
            .order_by_asc(Column::Version)
            .all(&self.db)
            .await
            .map_err(|err| LifecycleError::persistence("list model versions", err))
    }

    pub async fn insert<C: ConnectionTrait>(
        conn: &C,
        new: NewModelVersion,
        now: DateTime<Utc>,
    ) -> Result<Model, DbErr> {
        ActiveModel {
            id: Set(Uuid::new_v4()),
            model_key: Set(new.model_key),
            version: Set(new.version),
            status: Set(new.status),
            accuracy: Set(new.accuracy),
            metrics: Set(new.metrics),
            training_metadata: Set(new.training_metadata),
            artifact_uri: Set(new.artifact_uri),
            created_at: Set(now.fixed_offset()),
        }
        .insert(conn)
        .await
    }

    /// Move a version from `from` to `to`; returns whether a row changed.
    pub async fn transition_status<C: ConnectionTrait>(
        conn: &C,
        model_key: &str,
        version: i32,
        from: VersionStatus,
        to: VersionStatus,
    ) -> Result<bool, DbErr> {
        let result = Entity::update_many()
            .set(ActiveModel {
                status: Set(to),
                ..Default::default()
            })
            .filter(Column::ModelKey.eq(model_key))
            .filter(Column::Version.eq(version))
            .filter(Column::Status.eq(from))
            .exec(conn)
            .await?;
        Ok(result.rows_affected == 1)
    }
}
