//! # Feature Store
//!
//! Versioned, content-addressed storage for fitted input transformers.
//! Snapshots are immutable: a version is written once and every later read
//! returns the same bytes. Loaded sets are shared as `Arc` snapshots through a
//! bounded LRU cache.

pub mod transform;

use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lru::LruCache;
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::collaborators::Clock;
use crate::error::{LifecycleError, is_unique_violation};
use crate::models::feature_snapshot::{
    ActiveModel as SnapshotActiveModel, Column as SnapshotColumn, Entity as FeatureSnapshot,
    Model as SnapshotModel,
};

pub use transform::{
    FeatureKind, FeatureTransform, RawRow, RawValue, TransformError, Transformer, TransformerSet,
};

type CacheKey = (String, i32);

/// Descriptive data about a stored snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotMetadata {
    pub model_key: String,
    pub version: i32,
    pub content_hash: String,
    pub feature_names: Vec<String>,
    pub feature_kinds: Vec<FeatureKind>,
    pub created_at: DateTime<Utc>,
}

impl SnapshotMetadata {
    fn from_row(row: &SnapshotModel) -> Result<Self, LifecycleError> {
        Ok(Self {
            model_key: row.model_key.clone(),
            version: row.version,
            content_hash: row.content_hash.clone(),
            feature_names: serde_json::from_value(row.feature_names.clone())?,
            feature_kinds: serde_json::from_value(row.feature_kinds.clone())?,
            created_at: row.created_at.with_timezone(&Utc),
        })
    }
}

pub struct FeatureStore {
    db: DatabaseConnection,
    cache: Arc<RwLock<LruCache<CacheKey, Arc<TransformerSet>>>>,
    clock: Arc<dyn Clock>,
}

impl FeatureStore {
    pub fn new(db: DatabaseConnection, cache_capacity: usize, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            db,
            cache: Arc::new(RwLock::new(LruCache::new(capacity))),
            clock,
        }
    }

    /// Persist `transformers` as `version` of `model_key`.
    ///
    /// Saving identical content again returns the existing metadata; different
    /// content for an existing version is a [`LifecycleError::Conflict`].
    #[instrument(skip(self, transformers), fields(model_key = %model_key, version))]
    pub async fn save(
        &self,
        model_key: &str,
        version: i32,
        transformers: &TransformerSet,
    ) -> Result<SnapshotMetadata, LifecycleError> {
        transformers.validate()?;
        let content_hash = transformers.content_hash()?;

        if let Some(existing) = self.find_row(model_key, version).await? {
            return Self::reconcile_existing(&existing, &content_hash);
        }

        let snapshot = SnapshotActiveModel {
            id: Set(Uuid::new_v4()),
            model_key: Set(model_key.to_string()),
            version: Set(version),
            content_hash: Set(content_hash.clone()),
            feature_names: Set(serde_json::to_value(transformers.feature_names())?),
            feature_kinds: Set(serde_json::to_value(transformers.feature_kinds())?),
            payload: Set(serde_json::to_value(transformers)?),
            created_at: Set(self.clock.now().fixed_offset()),
        };

        match snapshot.insert(&self.db).await {
            Ok(row) => {
                counter!("feature_store_snapshots_saved_total").increment(1);
                info!(
                    model_key = %model_key,
                    version,
                    content_hash = %content_hash,
                    features = transformers.features.len(),
                    "Saved feature snapshot"
                );
                SnapshotMetadata::from_row(&row)
            }
            Err(err) if is_unique_violation(&err) => {
                // Lost a race with a concurrent writer; compare against the winner.
                let existing = self
                    .find_row(model_key, version)
                    .await?
                    .ok_or_else(|| LifecycleError::persistence("save feature snapshot", err))?;
                Self::reconcile_existing(&existing, &content_hash)
            }
            Err(err) => Err(LifecycleError::persistence("save feature snapshot", err)),
        }
    }

    /// Load the transformers for `version`, serving from cache when possible.
    ///
    /// Hits are served under the shared read lock. Recency is bumped only when
    /// the write lock is free, so concurrent readers never queue behind it.
    pub async fn load(
        &self,
        model_key: &str,
        version: i32,
    ) -> Result<Arc<TransformerSet>, LifecycleError> {
        let key = (model_key.to_string(), version);

        let hit = self.cache.read().await.peek(&key).cloned();
        if let Some(set) = hit {
            if let Ok(mut cache) = self.cache.try_write() {
                cache.promote(&key);
            }
            counter!("feature_store_cache_hits_total").increment(1);
            return Ok(set);
        }
        counter!("feature_store_cache_misses_total").increment(1);

        let row = self
            .find_row(model_key, version)
            .await?
            .ok_or_else(|| snapshot_not_found(model_key, version))?;

        let set: TransformerSet = serde_json::from_value(row.payload.clone())?;
        let actual_hash = set.content_hash()?;
        if actual_hash != row.content_hash {
            warn!(
                model_key = %model_key,
                version,
                stored = %row.content_hash,
                computed = %actual_hash,
                "Feature snapshot failed hash verification"
            );
            return Err(LifecycleError::Conflict {
                message: format!(
                    "feature snapshot {model_key} v{version} does not match its content hash"
                ),
            });
        }

        let set = Arc::new(set);
        self.cache.write().await.put(key, Arc::clone(&set));
        debug!(model_key = %model_key, version, "Cached feature snapshot");
        Ok(set)
    }

    /// Describe a stored snapshot without loading it into the cache.
    pub async fn metadata(
        &self,
        model_key: &str,
        version: i32,
    ) -> Result<SnapshotMetadata, LifecycleError> {
        let row = self
            .find_row(model_key, version)
            .await?
            .ok_or_else(|| snapshot_not_found(model_key, version))?;
        SnapshotMetadata::from_row(&row)
    }

    /// Stored versions for `model_key`, ascending.
    pub async fn versions(&self, model_key: &str) -> Result<Vec<i32>, LifecycleError> {
        FeatureSnapshot::find()
            .select_only()
            .column(SnapshotColumn::Version)
            .filter(SnapshotColumn::ModelKey.eq(model_key))
            .order_by_asc(SnapshotColumn::Version)
            .into_tuple::<i32>()
            .all(&self.db)
            .await
            .map_err(|err| LifecycleError::persistence("list feature snapshot versions", err))
    }

    /// Number of cached transformer sets.
    pub async fn cached_len(&self) -> usize {
        self.cache.read().await.len()
    }

    async fn find_row(
        &self,
        model_key: &str,
        version: i32,
    ) -> Result<Option<SnapshotModel>, LifecycleError> {
        FeatureSnapshot::find()
            .filter(SnapshotColumn::ModelKey.eq(model_key))
            .filter(SnapshotColumn::Version.eq(version))
            .one(&self.db)
            .await
            .map_err(|err| LifecycleError::persistence("load feature snapshot", err))
    }

    fn reconcile_existing(
        existing: &SnapshotModel,
        content_hash: &str,
    ) -> Result<SnapshotMetadata, LifecycleError> {
        if existing.content_hash == content_hash {
            debug!(
                model_key = %existing.model_key,
                version = existing.version,
                "Feature snapshot already stored with identical content"
            );
            return SnapshotMetadata::from_row(existing);
        }

        Err(LifecycleError::Conflict {
            message: format!(
                "feature snapshot {} v{} already exists with different content",
                existing.model_key, existing.version
            ),
        })
    }
}

fn snapshot_not_found(model_key: &str, version: i32) -> LifecycleError {
    LifecycleError::not_found("feature snapshot", format!("{model_key} v{version}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::ManualClock;
    use migration::{Migrator, MigratorTrait};
    use rand::{Rng, SeedableRng, rngs::StdRng};
    use sea_orm::Database;
    use std::time::Duration;

    fn epoch() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    async fn store(capacity: usize) -> FeatureStore {
        let db = Database::connect("sqlite::memory:")
            .await
            .expect("create in-memory db");
        Migrator::up(&db, None).await.expect("apply migrations");
        FeatureStore::new(db, capacity, Arc::new(ManualClock::new(epoch())))
    }

    fn scaler_set(mean: f64) -> TransformerSet {
        TransformerSet::new(vec![FeatureTransform {
            name: "amount".to_string(),
            transformer: Transformer::StandardScaler { mean, std_dev: 2.0 },
        }])
        .unwrap()
    }

    #[tokio::test]
    async fn save_then_load_returns_same_content() {
        let store = store(4).await;
        let meta = store.save("fraud", 1, &scaler_set(3.0)).await.unwrap();
        assert_eq!(meta.feature_names, vec!["amount".to_string()]);
        assert_eq!(meta.feature_kinds, vec![FeatureKind::Numeric]);

        let loaded = store.load("fraud", 1).await.unwrap();
        assert_eq!(*loaded, scaler_set(3.0));
        assert_eq!(loaded.content_hash().unwrap(), meta.content_hash);
    }

    #[tokio::test]
    async fn second_load_hits_cache_with_same_arc() {
        let store = store(4).await;
        store.save("fraud", 1, &scaler_set(3.0)).await.unwrap();

        let first = store.load("fraud", 1).await.unwrap();
        let second = store.load("fraud", 1).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.cached_len().await, 1);
    }

    #[tokio::test]
    async fn identical_save_is_idempotent() {
        let store = store(4).await;
        let first = store.save("fraud", 1, &scaler_set(3.0)).await.unwrap();
        let again = store.save("fraud", 1, &scaler_set(3.0)).await.unwrap();
        assert_eq!(first, again);
        assert_eq!(store.versions("fraud").await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn different_content_for_existing_version_conflicts() {
        let store = store(4).await;
        store.save("fraud", 1, &scaler_set(3.0)).await.unwrap();

        let err = store.save("fraud", 1, &scaler_set(4.0)).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Conflict { .. }));

        // Original content is untouched
        assert_eq!(*store.load("fraud", 1).await.unwrap(), scaler_set(3.0));
    }

    #[tokio::test]
    async fn missing_snapshot_is_not_found() {
        let store = store(4).await;
        assert!(matches!(
            store.load("fraud", 9).await,
            Err(LifecycleError::NotFound { .. })
        ));
        assert!(matches!(
            store.metadata("fraud", 9).await,
            Err(LifecycleError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn metadata_does_not_populate_cache() {
        let store = store(4).await;
        store.save("fraud", 1, &scaler_set(3.0)).await.unwrap();
        store.metadata("fraud", 1).await.unwrap();
        assert_eq!(store.cached_len().await, 0);
    }

    #[tokio::test]
    async fn cache_is_bounded() {
        let store = store(2).await;
        for version in 1..=3 {
            store
                .save("fraud", version, &scaler_set(version as f64))
                .await
                .unwrap();
            store.load("fraud", version).await.unwrap();
        }
        assert_eq!(store.cached_len().await, 2);
        assert_eq!(store.versions("fraud").await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn created_at_follows_injected_clock() {
        let store = store(4).await;
        let meta = store.save("fraud", 1, &scaler_set(3.0)).await.unwrap();
        assert_eq!(meta.created_at, epoch());
    }

    #[tokio::test]
    async fn fitted_floats_survive_storage_and_hash_check() {
        let store = store(8).await;
        let mut rng = StdRng::seed_from_u64(7);
        let mut saved = Vec::new();
        for version in 1..=300 {
            let set = TransformerSet::new(vec![FeatureTransform {
                name: "amount".to_string(),
                transformer: Transformer::StandardScaler {
                    mean: rng.gen_range(0.0..1000.0),
                    std_dev: rng.gen_range(0.001..50.0),
                },
            }])
            .unwrap();
            store.save("fraud", version, &set).await.unwrap();
            saved.push(set);
        }
        saved.push(scaler_set(604.7802727761426));
        store.save("fraud", 301, &saved[300]).await.unwrap();

        for (index, expected) in saved.iter().enumerate() {
            let version = index as i32 + 1;
            let loaded = store.load("fraud", version).await.unwrap();
            assert_eq!(*loaded, *expected, "version {version}");
        }
    }

    #[tokio::test]
    async fn cache_hit_does_not_wait_for_other_readers() {
        let store = store(4).await;
        store.save("fraud", 1, &scaler_set(3.0)).await.unwrap();
        let first = store.load("fraud", 1).await.unwrap();

        let reader = store.cache.read().await;
        let second = tokio::time::timeout(Duration::from_secs(1), store.load("fraud", 1))
            .await
            .expect("hit served under a shared lock")
            .unwrap();
        drop(reader);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn cache_hit_refreshes_recency() {
        let store = store(2).await;
        for version in 1..=3 {
            store
                .save("fraud", version, &scaler_set(version as f64))
                .await
                .unwrap();
        }
        store.load("fraud", 1).await.unwrap();
        store.load("fraud", 2).await.unwrap();
        store.load("fraud", 1).await.unwrap();
        store.load("fraud", 3).await.unwrap();

        let cache = store.cache.read().await;
        assert!(cache.contains(&("fraud".to_string(), 1)));
        assert!(!cache.contains(&("fraud".to_string(), 2)));
    }
}
