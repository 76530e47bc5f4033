//! # ClientDataset Repository
//!
//! Accumulated production batches. A batch is `active` until a retraining
//! attempt claims it (`processing`), then either archived after promotion or
//! released back to `active`.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::collaborators::trainer::DatasetRef;
use crate::error::{LifecycleError, is_unique_violation};
use crate::models::client_dataset::{ActiveModel, Column, DatasetStatus, Entity, Model};

const APPEND_MAX_ATTEMPTS: usize = 3;

/// Aggregate view over a model's unconsumed datasets
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DatasetSummary {
    pub dataset_ids: Vec<Uuid>,
    pub total_rows: i64,
    /// Row-weighted mean label confidence
    pub mean_confidence: f64,
    pub datasets: Vec<DatasetRef>,
}

impl DatasetSummary {
    fn from_rows(rows: &[Model]) -> Self {
        let total_rows: i64 = rows.iter().map(|r| r.row_count).sum();
        let weighted: f64 = rows
            .iter()
            .map(|r| r.row_count as f64 * r.mean_confidence)
            .sum();
        let mean_confidence = if total_rows > 0 {
            weighted / total_rows as f64
        } else {
            0.0
        };

        Self {
            dataset_ids: rows.iter().map(|r| r.id).collect(),
            total_rows,
            mean_confidence,
            datasets: rows
                .iter()
                .map(|r| DatasetRef {
                    dataset_version: r.dataset_version,
                    storage_uri: r.storage_uri.clone(),
                    row_count: r.row_count,
                })
                .collect(),
        }
    }

    pub fn meets(&self, min_rows: i64, min_confidence: f64) -> bool {
        self.total_rows > 0 && self.total_rows >= min_rows && self.mean_confidence >= min_confidence
    }
}

pub struct ClientDatasetRepository {
    db: DatabaseConnection,
}

impl ClientDatasetRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Record a new batch under the next `dataset_version` for the model.
    pub async fn append(
        &self,
        model_key: &str,
        row_count: i64,
        mean_confidence: f64,
        storage_uri: &str,
        now: DateTime<Utc>,
    ) -> Result<Model, LifecycleError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let next_version = Entity::find()
                .filter(Column::ModelKey.eq(model_key))
                .order_by_desc(Column::DatasetVersion)
                .one(&self.db)
                .await
                .map_err(|err| LifecycleError::persistence("load latest dataset version", err))?
                .map(|row| row.dataset_version + 1)
                .unwrap_or(1);

            let dataset = ActiveModel {
                id: Set(Uuid::new_v4()),
                model_key: Set(model_key.to_string()),
                dataset_version: Set(next_version),
                row_count: Set(row_count),
                mean_confidence: Set(mean_confidence),
                storage_uri: Set(storage_uri.to_string()),
                status: Set(DatasetStatus::Active),
                created_at: Set(now.fixed_offset()),
                updated_at: Set(now.fixed_offset()),
            };

            match dataset.insert(&self.db).await {
                Ok(row) => {
                    info!(
                        model_key = %model_key,
                        dataset_version = row.dataset_version,
                        row_count,
                        "Appended client dataset"
                    );
                    return Ok(row);
                }
                Err(err) if is_unique_violation(&err) && attempt < APPEND_MAX_ATTEMPTS => {
                    debug!(model_key = %model_key, attempt, "Dataset version taken; retrying");
                }
                Err(err) => return Err(LifecycleError::persistence("insert client dataset", err)),
            }
        }
    }

    /// Active datasets accumulated since the last training.
    pub async fn active_summary(&self, model_key: &str) -> Result<DatasetSummary, LifecycleError> {
        let rows = Entity::find()
            .filter(Column::ModelKey.eq(model_key))
            .filter(Column::Status.eq(DatasetStatus::Active))
            .order_by_asc(Column::DatasetVersion)
            .all(&self.db)
            .await
            .map_err(|err| LifecycleError::persistence("load active client datasets", err))?;
        Ok(DatasetSummary::from_rows(&rows))
    }

    pub async fn list(&self, model_key: &str) -> Result<Vec<Model>, LifecycleError> {
        Entity::find()
            .filter(Column::ModelKey.eq(model_key))
            .order_by_asc(Column::DatasetVersion)
            .all(&self.db)
            .await
            .map_err(|err| LifecycleError::persistence("list client datasets", err))
    }

    /// Move the given datasets from `from` to `to`; rows in other states are left alone.
    pub async fn transition<C: ConnectionTrait>(
        conn: &C,
        ids: &[Uuid],
        from: DatasetStatus,
        to: DatasetStatus,
        now: DateTime<Utc>,
    ) -> Result<u64, DbErr> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = Entity::update_many()
            .set(ActiveModel {
                status: Set(to),
                updated_at: Set(now.fixed_offset()),
                ..Default::default()
            })
            .filter(Column::Id.is_in(ids.iter().copied()))
            .filter(Column::Status.eq(from))
            .exec(conn)
            .await?;

        Ok(result.rows_affected)
    }

    /// Release every `processing` dataset of a model back to `active`.
    pub async fn release_processing<C: ConnectionTrait>(
        conn: &C,
        model_key: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, DbErr> {
        let result = Entity::update_many()
            .set(ActiveModel {
                status: Set(DatasetStatus::Active),
                updated_at: Set(now.fixed_offset()),
                ..Default::default()
            })
            .filter(Column::ModelKey.eq(model_key))
            .filter(Column::Status.eq(DatasetStatus::Processing))
            .exec(conn)
            .await?;

        Ok(result.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(rows: i64, confidence: f64) -> Model {
        let now = Utc::now().fixed_offset();
        Model {
            id: Uuid::new_v4(),
            model_key: "fraud".to_string(),
            dataset_version: 1,
            row_count: rows,
            mean_confidence: confidence,
            storage_uri: "s3://bucket/batch".to_string(),
            status: DatasetStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn summary_weights_confidence_by_rows() {
        let summary = DatasetSummary::from_rows(&[row(300, 0.9), row(100, 0.5)]);
        assert_eq!(summary.total_rows, 400);
        assert!((summary.mean_confidence - 0.8).abs() < 1e-12);
        assert!(summary.meets(400, 0.8));
        assert!(!summary.meets(401, 0.8));
        assert!(!summary.meets(100, 0.85));
    }

    #[test]
    fn empty_summary_never_meets_threshold() {
        let summary = DatasetSummary::from_rows(&[]);
        assert!(!summary.meets(0, 0.0));
    }
}
