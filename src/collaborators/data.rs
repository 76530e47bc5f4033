//! Production data access
//!
//! Baselines, live samples and holdout splits live in an external store. The
//! monitor only needs per-feature numeric columns and predicted class
//! probabilities.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::trainer::{HoldoutSplit, Metrics};

#[derive(Debug, Clone, Error)]
pub enum DataError {
    #[error("no baseline recorded for {model_key} v{version}")]
    MissingBaseline { model_key: String, version: i32 },
    #[error("no holdout split for {model_key}")]
    MissingHoldout { model_key: String },
    #[error("data source unavailable: {0}")]
    Unavailable(String),
    #[error("malformed data: {0}")]
    Malformed(String),
}

/// Training-time reference distribution for one model version
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    /// Numeric samples per feature
    pub features: BTreeMap<String, Vec<f64>>,
    /// Class label distribution of the training set
    pub class_distribution: Vec<f64>,
}

/// Live inputs and predictions over the monitoring window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductionSample {
    pub features: BTreeMap<String, Vec<f64>>,
    /// One predicted probability vector per scored item
    pub class_probabilities: Vec<Vec<f64>>,
}

impl ProductionSample {
    /// Number of production items in the sample.
    pub fn item_count(&self) -> u64 {
        let by_feature = self.features.values().map(Vec::len).max().unwrap_or(0);
        by_feature.max(self.class_probabilities.len()) as u64
    }

    /// Mean predicted probability per class; empty when there are no predictions.
    pub fn mean_class_probabilities(&self) -> Vec<f64> {
        let Some(width) = self.class_probabilities.iter().map(Vec::len).max() else {
            return Vec::new();
        };

        let mut sums = vec![0.0; width];
        for row in &self.class_probabilities {
            for (sum, p) in sums.iter_mut().zip(row) {
                *sum += p;
            }
        }

        let n = self.class_probabilities.len() as f64;
        sums.into_iter().map(|s| s / n).collect()
    }
}

#[async_trait]
pub trait DataRepository: Send + Sync {
    /// Reference distribution captured when `version` was trained.
    async fn baseline(&self, model_key: &str, version: i32) -> Result<Baseline, DataError>;

    /// Production inputs and predictions observed in `[since, until)`.
    async fn recent_sample(
        &self,
        model_key: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<ProductionSample, DataError>;

    /// Held-out split used to evaluate candidates.
    async fn holdout(&self, model_key: &str) -> Result<HoldoutSplit, DataError>;

    /// Live quality of `version` measured since `since`, if enough feedback exists.
    async fn live_metrics(
        &self,
        model_key: &str,
        version: i32,
        since: DateTime<Utc>,
    ) -> Result<Option<Metrics>, DataError>;
}
