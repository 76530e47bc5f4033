//! Data repository over JSON exports on local disk.
//!
//! Layout under the root directory:
//!
//! ```text
//! {model_key}/baseline/v{version}.json   Baseline
//! {model_key}/samples/*.json             SampleBatch, one per export
//! {model_key}/holdout.json               HoldoutSplit
//! {model_key}/live_metrics.json          [LiveMetricsRecord]
//! ```

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::data::{Baseline, DataError, DataRepository, ProductionSample};
use super::trainer::{HoldoutSplit, Metrics};

/// One exported slice of production traffic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleBatch {
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub features: BTreeMap<String, Vec<f64>>,
    #[serde(default)]
    pub class_probabilities: Vec<Vec<f64>>,
}

/// Live quality measurement for a served version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveMetricsRecord {
    pub version: i32,
    pub observed_at: DateTime<Utc>,
    pub metrics: Metrics,
}

#[derive(Debug, Clone)]
pub struct FileDataRepository {
    root: PathBuf,
}

impl FileDataRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn model_dir(&self, model_key: &str) -> PathBuf {
        self.root.join(model_key)
    }
}

/// `Ok(None)` when the file does not exist.
async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, DataError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(DataError::Unavailable(format!("{}: {err}", path.display())));
        }
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|err| DataError::Malformed(format!("{}: {err}", path.display())))
}

#[async_trait]
impl DataRepository for FileDataRepository {
    async fn baseline(&self, model_key: &str, version: i32) -> Result<Baseline, DataError> {
        let path = self
            .model_dir(model_key)
            .join("baseline")
            .join(format!("v{version}.json"));
        read_json(&path)
            .await?
            .ok_or_else(|| DataError::MissingBaseline {
                model_key: model_key.to_string(),
                version,
            })
    }

    async fn recent_sample(
        &self,
        model_key: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<ProductionSample, DataError> {
        let dir = self.model_dir(model_key).join("samples");
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(ProductionSample::default()),
            Err(err) => {
                return Err(DataError::Unavailable(format!("{}: {err}", dir.display())));
            }
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| DataError::Unavailable(format!("{}: {err}", dir.display())))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut sample = ProductionSample::default();
        for path in paths {
            let Some(batch) = read_json::<SampleBatch>(&path).await? else {
                continue;
            };
            if batch.captured_at < since || batch.captured_at >= until {
                continue;
            }
            for (name, values) in batch.features {
                sample.features.entry(name).or_default().extend(values);
            }
            sample.class_probabilities.extend(batch.class_probabilities);
        }

        debug!(model_key, items = sample.item_count(), "Loaded production sample from disk");
        Ok(sample)
    }

    async fn holdout(&self, model_key: &str) -> Result<HoldoutSplit, DataError> {
        let path = self.model_dir(model_key).join("holdout.json");
        read_json(&path)
            .await?
            .ok_or_else(|| DataError::MissingHoldout {
                model_key: model_key.to_string(),
            })
    }

    async fn live_metrics(
        &self,
        model_key: &str,
        version: i32,
        since: DateTime<Utc>,
    ) -> Result<Option<Metrics>, DataError> {
        let path = self.model_dir(model_key).join("live_metrics.json");
        let records: Vec<LiveMetricsRecord> = read_json(&path).await?.unwrap_or_default();
        Ok(records
            .into_iter()
            .filter(|r| r.version == version && r.observed_at >= since)
            .max_by_key(|r| r.observed_at)
            .map(|r| r.metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn write(root: &Path, relative: &str, value: serde_json::Value) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, serde_json::to_vec(&value).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn baseline_and_holdout_round_trip_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "fraud/baseline/v3.json",
            serde_json::json!({ "features": { "amount": [1.0, 2.0] }, "class_distribution": [0.8, 0.2] }),
        );
        write(
            dir.path(),
            "fraud/holdout.json",
            serde_json::json!({ "model_key": "fraud", "uri": "s3://holdout/fraud", "row_count": 1000 }),
        );

        let repo = FileDataRepository::new(dir.path());
        let baseline = repo.baseline("fraud", 3).await.unwrap();
        assert_eq!(baseline.features["amount"], vec![1.0, 2.0]);
        assert_eq!(repo.holdout("fraud").await.unwrap().row_count, 1000);

        assert!(matches!(
            repo.baseline("fraud", 4).await,
            Err(DataError::MissingBaseline { version: 4, .. })
        ));
        assert!(matches!(
            repo.holdout("churn").await,
            Err(DataError::MissingHoldout { .. })
        ));
    }

    #[tokio::test]
    async fn recent_sample_merges_batches_inside_window() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let batch = |at: DateTime<Utc>, value: f64| {
            serde_json::json!({
                "captured_at": at,
                "features": { "amount": [value, value] },
                "class_probabilities": [[0.5, 0.5]],
            })
        };
        write(dir.path(), "fraud/samples/a.json", batch(now - Duration::hours(2), 1.0));
        write(dir.path(), "fraud/samples/b.json", batch(now - Duration::hours(1), 2.0));
        write(dir.path(), "fraud/samples/old.json", batch(now - Duration::hours(30), 9.0));

        let repo = FileDataRepository::new(dir.path());
        let sample = repo
            .recent_sample("fraud", now - Duration::hours(24), now)
            .await
            .unwrap();
        assert_eq!(sample.features["amount"], vec![1.0, 1.0, 2.0, 2.0]);
        assert_eq!(sample.class_probabilities.len(), 2);

        let empty = repo
            .recent_sample("churn", now - Duration::hours(24), now)
            .await
            .unwrap();
        assert_eq!(empty.item_count(), 0);
    }

    #[tokio::test]
    async fn malformed_files_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fraud/holdout.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"not json").unwrap();

        let repo = FileDataRepository::new(dir.path());
        assert!(matches!(repo.holdout("fraud").await, Err(DataError::Malformed(_))));
    }

    #[tokio::test]
    async fn live_metrics_picks_latest_for_version() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        write(
            dir.path(),
            "fraud/live_metrics.json",
            serde_json::json!([
                { "version": 2, "observed_at": now - Duration::hours(5), "metrics": { "accuracy": 0.90 } },
                { "version": 2, "observed_at": now - Duration::hours(1), "metrics": { "accuracy": 0.80 } },
                { "version": 1, "observed_at": now, "metrics": { "accuracy": 0.99 } },
            ]),
        );

        let repo = FileDataRepository::new(dir.path());
        let metrics = repo
            .live_metrics("fraud", 2, now - Duration::days(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(metrics.accuracy, 0.80);
        assert!(repo.live_metrics("fraud", 3, now - Duration::days(1)).await.unwrap().is_none());
    }
}
