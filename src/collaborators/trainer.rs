//! Trainer interface
//!
//! The training algorithm itself lives outside this crate. The orchestrator
//! hands the trainer the source transformers and the consumed datasets and
//! gets back an artifact plus the refitted transformers.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::feature_store::TransformerSet;

/// Trainer-side failures. Any of these ends the attempt as `failed`.
#[derive(Debug, Clone, Error)]
pub enum TrainerError {
    #[error("trainer failed: {0}")]
    Failed(String),
    #[error("evaluation failed: {0}")]
    Evaluation(String),
    #[error("training exceeded {seconds}s")]
    Timeout { seconds: u64 },
    #[error("invalid metrics: {0}")]
    InvalidMetrics(String),
}

/// Pointer to one client dataset consumed by an attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRef {
    pub dataset_version: i32,
    pub storage_uri: String,
    pub row_count: i64,
}

/// Everything the trainer needs for one attempt
#[derive(Debug, Clone)]
pub struct TrainingInput {
    pub model_key: String,
    pub source_version: i32,
    pub candidate_version: i32,
    pub transformers: Arc<TransformerSet>,
    pub datasets: Vec<DatasetRef>,
}

impl TrainingInput {
    pub fn total_rows(&self) -> i64 {
        self.datasets.iter().map(|d| d.row_count).sum()
    }
}

/// Opaque handle to a trained model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub uri: String,
}

/// Result of a successful `train` call
#[derive(Debug, Clone)]
pub struct TrainedCandidate {
    pub artifact: ModelArtifact,
    /// Transformers refitted on the new data; saved under the candidate version on promotion
    pub transformers: TransformerSet,
    pub training_metadata: serde_json::Value,
}

/// Held-out evaluation data, resolved by the data repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldoutSplit {
    pub model_key: String,
    pub uri: String,
    pub row_count: u64,
}

/// Evaluation metrics. `accuracy` drives the promotion gate; the rest is audit detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Metrics {
    pub accuracy: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recall: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub f1: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, f64>,
}

impl Metrics {
    pub fn with_accuracy(accuracy: f64) -> Self {
        Self {
            accuracy,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), TrainerError> {
        if !self.accuracy.is_finite() || !(0.0..=1.0).contains(&self.accuracy) {
            return Err(TrainerError::InvalidMetrics(format!(
                "accuracy {} outside [0, 1]",
                self.accuracy
            )));
        }
        Ok(())
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({ "accuracy": self.accuracy }))
    }

    /// Reads metrics back from a stored json column, falling back to a bare accuracy.
    pub fn from_json(value: &serde_json::Value, fallback_accuracy: f64) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_else(|_| Self::with_accuracy(fallback_accuracy))
    }
}

#[async_trait]
pub trait Trainer: Send + Sync {
    /// Fit a candidate model on the given datasets.
    async fn train(&self, input: &TrainingInput) -> Result<TrainedCandidate, TrainerError>;

    /// Score a trained artifact against the holdout split.
    async fn evaluate(
        &self,
        artifact: &ModelArtifact,
        holdout: &HoldoutSplit,
    ) -> Result<Metrics, TrainerError>;
}
