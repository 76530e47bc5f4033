//! # Model Repository
//!
//! `active_version` is only ever changed through [`MlModelRepository::swap_active_version`],
//! a compare-and-swap on the previously observed value.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use tracing::info;

use crate::error::{LifecycleError, is_unique_violation};
use crate::models::ml_model::{ActiveModel, Column, Entity, Model, ModelStatus};
use crate::models::model_version::VersionStatus;
use crate::repositories::model_version::{ModelVersionRepository, NewModelVersion};

/// Registration input for a model and its first version
#[derive(Debug, Clone)]
pub struct NewModel {
    pub model_key: String,
    pub version: i32,
    pub accuracy: f64,
    pub metrics: serde_json::Value,
    pub artifact_uri: Option<String>,
}

pub struct MlModelRepository {
    db: DatabaseConnection,
}

impl MlModelRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find(&self, model_key: &str) -> Result<Option<Model>, LifecycleError> {
        Entity::find_by_id(model_key.to_string())
            .one(&self.db)
            .await
            .map_err(|err| LifecycleError::persistence("load model", err))
    }

    pub async fn get(&self, model_key: &str) -> Result<Model, LifecycleError> {
        self.find(model_key)
            .await?
            .ok_or_else(|| LifecycleError::not_found("model", model_key))
    }

    /// Models the daily cycle should visit, in key order.
    pub async fn list_active(&self) -> Result<Vec<Model>, LifecycleError> {
        Entity::find()
            .filter(Column::Status.eq(ModelStatus::Active))
            .order_by_asc(Column::ModelKey)
            .all(&self.db)
            .await
            .map_err(|err| LifecycleError::persistence("list active models", err))
    }

    /// Create the model row together with its initial active version.
    pub async fn register(&self, new: NewModel, now: DateTime<Utc>) -> Result<Model, LifecycleError> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|err| LifecycleError::persistence("begin model registration", err))?;

        let model = ActiveModel {
            model_key: Set(new.model_key.clone()),
            active_version: Set(new.version),
            status: Set(ModelStatus::Active),
            accuracy: Set(new.accuracy),
            last_trained: Set(Some(now.fixed_offset())),
            created_at: Set(now.fixed_offset()),
            updated_at: Set(now.fixed_offset()),
        };

        let model = match model.insert(&txn).await {
            Ok(model) => model,
            Err(err) if is_unique_violation(&err) => {
                return Err(LifecycleError::Conflict {
                    message: format!("model {} is already registered", new.model_key),
                });
            }
            Err(err) => return Err(LifecycleError::persistence("insert model", err)),
        };

        ModelVersionRepository::insert(
            &txn,
            NewModelVersion {
                model_key: new.model_key.clone(),
                version: new.version,
                status: VersionStatus::Active,
                accuracy: new.accuracy,
                metrics: new.metrics,
                training_metadata: None,
                artifact_uri: new.artifact_uri,
            },
            now,
        )
        .await
        .map_err(|err| LifecycleError::persistence("insert initial model version", err))?;

        txn.commit()
            .await
            .map_err(|err| LifecycleError::persistence("commit model registration", err))?;

        info!(model_key = %model.model_key, version = model.active_version, "Registered model");
        Ok(model)
    }

    /// Compare-and-swap `active_version` from `expected` to `new_version`.
    ///
    /// Returns `false` when another writer moved the pointer first.
    pub async fn swap_active_version<C: ConnectionTrait>(
        conn: &C,
        model_key: &str,
        expected: i32,
        new_version: i32,
        accuracy: f64,
        last_trained: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool, DbErr> {
        let mut update = ActiveModel {
            active_version: Set(new_version),
            accuracy: Set(accuracy),
            updated_at: Set(now.fixed_offset()),
            ..Default::default()
        };
        if let Some(trained) = last_trained {
            update.last_trained = Set(Some(trained.fixed_offset()));
        }

        let result = Entity::update_many()
            .set(update)
            .filter(Column::ModelKey.eq(model_key))
            .filter(Column::ActiveVersion.eq(expected))
            .exec(conn)
            .await?;

        Ok(result.rows_affected == 1)
    }
}
