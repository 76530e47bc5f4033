//! Fitted input transformers
//!
//! A [`TransformerSet`] turns a raw input row into the exact feature vector a
//! model version was trained on. Sets are immutable once fitted; refitting
//! produces a new set saved under a new version.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    #[error("transformer set is empty")]
    Empty,
    #[error("duplicate feature name '{name}'")]
    DuplicateFeature { name: String },
    #[error("row is missing feature '{name}'")]
    MissingFeature { name: String },
    #[error("feature '{name}' expects a {expected:?} value")]
    KindMismatch { name: String, expected: FeatureKind },
    #[error("invalid parameters for '{name}': {reason}")]
    InvalidParameters { name: String, reason: String },
    #[error("cannot fit '{name}' on an empty column")]
    EmptyColumn { name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Numeric,
    Categorical,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transformer {
    StandardScaler { mean: f64, std_dev: f64 },
    MinMaxScaler { min: f64, max: f64 },
    OneHotEncoder { categories: Vec<String> },
    TfidfVectorizer { vocabulary: Vec<String>, idf: Vec<f64> },
}

impl Transformer {
    pub fn kind(&self) -> FeatureKind {
        match self {
            Transformer::StandardScaler { .. } | Transformer::MinMaxScaler { .. } => {
                FeatureKind::Numeric
            }
            Transformer::OneHotEncoder { .. } => FeatureKind::Categorical,
            Transformer::TfidfVectorizer { .. } => FeatureKind::Text,
        }
    }

    /// Number of output columns this transformer produces
    pub fn width(&self) -> usize {
        match self {
            Transformer::StandardScaler { .. } | Transformer::MinMaxScaler { .. } => 1,
            Transformer::OneHotEncoder { categories } => categories.len(),
            Transformer::TfidfVectorizer { vocabulary, .. } => vocabulary.len(),
        }
    }

    pub fn fit_standard_scaler(name: &str, values: &[f64]) -> Result<Self, TransformError> {
        if values.is_empty() {
            return Err(TransformError::EmptyColumn {
                name: name.to_string(),
            });
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        // Constant columns scale to zero instead of dividing by zero
        let std_dev = if variance > 0.0 { variance.sqrt() } else { 1.0 };
        Ok(Transformer::StandardScaler { mean, std_dev })
    }

    pub fn fit_min_max_scaler(name: &str, values: &[f64]) -> Result<Self, TransformError> {
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !min.is_finite() || !max.is_finite() {
            return Err(TransformError::EmptyColumn {
                name: name.to_string(),
            });
        }
        Ok(Transformer::MinMaxScaler { min, max })
    }

    pub fn fit_one_hot<'a, I>(name: &str, values: I) -> Result<Self, TransformError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let categories: BTreeSet<String> = values.into_iter().map(str::to_string).collect();
        if categories.is_empty() {
            return Err(TransformError::EmptyColumn {
                name: name.to_string(),
            });
        }
        Ok(Transformer::OneHotEncoder {
            categories: categories.into_iter().collect(),
        })
    }

    /// Smoothed idf: ln((1 + n) / (1 + df)) + 1
    pub fn fit_tfidf<'a, I>(name: &str, documents: I) -> Result<Self, TransformError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut doc_freq: BTreeMap<String, usize> = BTreeMap::new();
        let mut n_docs = 0usize;
        for doc in documents {
            n_docs += 1;
            let unique: HashSet<String> = tokenize(doc).collect();
            for token in unique {
                *doc_freq.entry(token).or_default() += 1;
            }
        }

        if doc_freq.is_empty() {
            return Err(TransformError::EmptyColumn {
                name: name.to_string(),
            });
        }

        let n = n_docs as f64;
        let (vocabulary, idf) = doc_freq
            .into_iter()
            .map(|(token, df)| (token, ((1.0 + n) / (1.0 + df as f64)).ln() + 1.0))
            .unzip();

        Ok(Transformer::TfidfVectorizer { vocabulary, idf })
    }

    fn validate(&self, name: &str) -> Result<(), TransformError> {
        let invalid = |reason: &str| TransformError::InvalidParameters {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        match self {
            Transformer::StandardScaler { mean, std_dev } => {
                if !mean.is_finite() || !std_dev.is_finite() || *std_dev <= 0.0 {
                    return Err(invalid("std_dev must be positive and finite"));
                }
            }
            Transformer::MinMaxScaler { min, max } => {
                if !min.is_finite() || !max.is_finite() || min > max {
                    return Err(invalid("min must not exceed max"));
                }
            }
            Transformer::OneHotEncoder { categories } => {
                if categories.is_empty() {
                    return Err(invalid("no categories"));
                }
            }
            Transformer::TfidfVectorizer { vocabulary, idf } => {
                if vocabulary.is_empty() || vocabulary.len() != idf.len() {
                    return Err(invalid("vocabulary and idf must be non-empty and aligned"));
                }
            }
        }
        Ok(())
    }

    fn apply(&self, name: &str, value: &RawValue, out: &mut Vec<f64>) -> Result<(), TransformError> {
        let mismatch = || TransformError::KindMismatch {
            name: name.to_string(),
            expected: self.kind(),
        };

        match self {
            Transformer::StandardScaler { mean, std_dev } => {
                let x = value.as_number().ok_or_else(mismatch)?;
                out.push((x - mean) / std_dev);
            }
            Transformer::MinMaxScaler { min, max } => {
                let x = value.as_number().ok_or_else(mismatch)?;
                let range = max - min;
                out.push(if range > 0.0 { (x - min) / range } else { 0.0 });
            }
            Transformer::OneHotEncoder { categories } => {
                let category = value.as_str().ok_or_else(mismatch)?;
                // Unseen categories encode as all zeros
                out.extend(
                    categories
                        .iter()
                        .map(|c| if c == category { 1.0 } else { 0.0 }),
                );
            }
            Transformer::TfidfVectorizer { vocabulary, idf } => {
                let text = value.as_str().ok_or_else(mismatch)?;
                let tokens: Vec<String> = tokenize(text).collect();
                let start = out.len();
                out.resize(start + vocabulary.len(), 0.0);
                if tokens.is_empty() {
                    return Ok(());
                }

                let total = tokens.len() as f64;
                for token in &tokens {
                    if let Ok(idx) = vocabulary.binary_search(token) {
                        out[start + idx] += 1.0 / total;
                    }
                }
                for (slot, weight) in out[start..].iter_mut().zip(idf) {
                    *slot *= weight;
                }

                let norm = out[start..].iter().map(|v| v * v).sum::<f64>().sqrt();
                if norm > 0.0 {
                    for slot in &mut out[start..] {
                        *slot /= norm;
                    }
                }
            }
        }
        Ok(())
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// One raw input value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
}

impl RawValue {
    fn as_number(&self) -> Option<f64> {
        match self {
            RawValue::Number(x) => Some(*x),
            RawValue::Text(_) => None,
        }
    }

    fn as_str(&self) -> Option<&str> {
        match self {
            RawValue::Text(s) => Some(s),
            RawValue::Number(_) => None,
        }
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Number(value)
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

pub type RawRow = BTreeMap<String, RawValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTransform {
    pub name: String,
    pub transformer: Transformer,
}

/// Ordered transformers for every input feature of one model version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TransformerSet {
    pub features: Vec<FeatureTransform>,
}

impl TransformerSet {
    pub fn new(features: Vec<FeatureTransform>) -> Result<Self, TransformError> {
        let set = Self { features };
        set.validate()?;
        Ok(set)
    }

    pub fn validate(&self) -> Result<(), TransformError> {
        if self.features.is_empty() {
            return Err(TransformError::Empty);
        }

        let mut seen = HashSet::new();
        for feature in &self.features {
            if !seen.insert(feature.name.as_str()) {
                return Err(TransformError::DuplicateFeature {
                    name: feature.name.clone(),
                });
            }
            feature.transformer.validate(&feature.name)?;
        }
        Ok(())
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.features.iter().map(|f| f.name.clone()).collect()
    }

    pub fn feature_kinds(&self) -> Vec<FeatureKind> {
        self.features.iter().map(|f| f.transformer.kind()).collect()
    }

    /// Length of the vector produced by [`TransformerSet::transform`]
    pub fn output_width(&self) -> usize {
        self.features.iter().map(|f| f.transformer.width()).sum()
    }

    /// Canonical encoding used for hashing and storage.
    pub fn canonical_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Hex sha256 of the canonical encoding.
    pub fn content_hash(&self) -> Result<String, serde_json::Error> {
        let bytes = self.canonical_json()?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    /// Reproduce the feature vector for one raw row.
    pub fn transform(&self, row: &RawRow) -> Result<Vec<f64>, TransformError> {
        let mut out = Vec::with_capacity(self.output_width());
        for feature in &self.features {
            let value = row
                .get(&feature.name)
                .ok_or_else(|| TransformError::MissingFeature {
                    name: feature.name.clone(),
                })?;
            feature.transformer.apply(&feature.name, value, &mut out)?;
        }
        Ok(out)
    }
}
