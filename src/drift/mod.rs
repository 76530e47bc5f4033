//! # Drift Monitor
//!
//! Compares the trailing production window against the active version's
//! training baseline and records at most one [`DriftCheck`] per model per UTC
//! day. Feature drift is measured with PSI over baseline-derived bins; output
//! drift with the Jensen-Shannon divergence of the predicted class mix.
//!
//! [`DriftCheck`]: crate::models::drift_check::Model

pub mod stats;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use metrics::{counter, gauge, histogram};
use sea_orm::{DatabaseConnection, Set};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::alerts::AlertPublisher;
use crate::collaborators::{Baseline, Clock, DataRepository, EventBus, LifecycleEvent, ProductionSample};
use crate::config::DriftConfig;
use crate::error::{LifecycleError, is_unique_violation};
use crate::models::drift_check::{ActiveModel as DriftCheckActive, Model as DriftCheck};
use crate::models::ml_model::Model as MlModel;
use crate::repositories::DriftCheckRepository;

/// Result of a drift evaluation for one model and day
#[derive(Debug, Clone, Serialize)]
pub struct DriftReport {
    pub check: DriftCheck,
    /// Per-feature PSI, keyed by feature name
    pub feature_scores: BTreeMap<String, f64>,
    /// `false` when an earlier check for the same day was returned instead
    pub created: bool,
}

impl DriftReport {
    fn new(check: DriftCheck, created: bool) -> Self {
        let feature_scores = check
            .feature_scores
            .as_ref()
            .and_then(|json| serde_json::from_value(json.clone()).ok())
            .unwrap_or_default();
        Self {
            check,
            feature_scores,
            created,
        }
    }

    pub fn drift_detected(&self) -> bool {
        self.check.drift_detected
    }

    /// Feature with the highest PSI
    pub fn worst_feature(&self) -> Option<(&str, f64)> {
        self.feature_scores
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(name, psi)| (name.as_str(), *psi))
    }
}

/// Scores computed from one baseline/sample pair
#[derive(Debug, Clone, PartialEq)]
pub struct DriftScores {
    pub psi: f64,
    pub js_divergence: f64,
    pub feature_scores: BTreeMap<String, f64>,
}

impl DriftScores {
    /// Score `sample` against `baseline`. Features absent or empty on either side are skipped.
    pub fn compute(baseline: &Baseline, sample: &ProductionSample, config: &DriftConfig) -> Self {
        let feature_scores: BTreeMap<String, f64> = baseline
            .features
            .iter()
            .filter_map(|(name, expected)| {
                let actual = sample.features.get(name)?;
                stats::feature_psi(
                    expected,
                    actual,
                    config.bin_count,
                    config.binning,
                    config.epsilon,
                )
                .map(|psi| (name.clone(), psi))
            })
            .collect();

        let scores: Vec<f64> = feature_scores.values().copied().collect();
        let psi = stats::aggregate(&scores, config.aggregation);
        let js_divergence = stats::js_divergence(
            &baseline.class_distribution,
            &sample.mean_class_probabilities(),
        );

        Self {
            psi,
            js_divergence,
            feature_scores,
        }
    }

    pub fn exceeds(&self, config: &DriftConfig) -> bool {
        self.psi > config.psi_threshold || self.js_divergence > config.js_threshold
    }
}

pub struct DriftMonitor {
    checks: DriftCheckRepository,
    data: Arc<dyn DataRepository>,
    alerts: Arc<AlertPublisher>,
    events: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    config: DriftConfig,
}

impl DriftMonitor {
    pub fn new(
        db: DatabaseConnection,
        data: Arc<dyn DataRepository>,
        alerts: Arc<AlertPublisher>,
        events: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        config: DriftConfig,
    ) -> Self {
        Self {
            checks: DriftCheckRepository::new(db),
            data,
            alerts,
            events,
            clock,
            config,
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.now().date_naive()
    }

    /// Today's recorded check, if any.
    pub async fn todays_check(&self, model_key: &str) -> Result<Option<DriftCheck>, LifecycleError> {
        self.checks.find_for_date(model_key, self.today()).await
    }

    pub async fn history(&self, model_key: &str) -> Result<Vec<DriftCheck>, LifecycleError> {
        self.checks.list(model_key).await
    }

    /// Evaluate drift for `model` on the current UTC day.
    ///
    /// Re-running on a day that already has a check returns that check. A
    /// sample below `min_sample_size` yields `InsufficientData` and records
    /// nothing.
    #[instrument(skip_all, fields(model_key = %model.model_key))]
    pub async fn check(&self, model: &MlModel) -> Result<DriftReport, LifecycleError> {
        let started = Instant::now();
        let now = self.clock.now();
        let check_date = now.date_naive();

        if let Some(existing) = self.checks.find_for_date(&model.model_key, check_date).await? {
            debug!(check_id = %existing.id, "Drift check already recorded today");
            return Ok(DriftReport::new(existing, false));
        }

        let baseline = self
            .data
            .baseline(&model.model_key, model.active_version)
            .await?;
        let sample = self
            .data
            .recent_sample(&model.model_key, now - self.config.window(), now)
            .await?;

        let items_analyzed = sample.item_count();
        if items_analyzed < self.config.min_sample_size {
            counter!("lifecycle_drift_checks_total", "outcome" => "insufficient_data").increment(1);
            info!(
                items_analyzed,
                required = self.config.min_sample_size,
                "Insufficient production data for drift check"
            );
            return Err(LifecycleError::InsufficientData {
                model_key: model.model_key.clone(),
                items_analyzed,
                required: self.config.min_sample_size,
            });
        }

        let scores = DriftScores::compute(&baseline, &sample, &self.config);
        let drift_detected = scores.exceeds(&self.config);

        let row = DriftCheckActive {
            id: Set(Uuid::new_v4()),
            model_key: Set(model.model_key.clone()),
            check_date: Set(check_date),
            psi_value: Set(scores.psi),
            js_divergence: Set(scores.js_divergence),
            drift_detected: Set(drift_detected),
            items_analyzed: Set(i64::try_from(items_analyzed).unwrap_or(i64::MAX)),
            feature_scores: Set(Some(serde_json::to_value(&scores.feature_scores)?)),
            created_at: Set(now.fixed_offset()),
        };

        let check = match self.checks.insert(row).await {
            Ok(check) => check,
            Err(err) if is_unique_violation(&err) => {
                let existing = self
                    .checks
                    .find_for_date(&model.model_key, check_date)
                    .await?
                    .ok_or_else(|| LifecycleError::persistence("insert drift check", err))?;
                debug!(check_id = %existing.id, "Concurrent drift check won the insert");
                return Ok(DriftReport::new(existing, false));
            }
            Err(err) => return Err(LifecycleError::persistence("insert drift check", err)),
        };

        let report = DriftReport::new(check, true);
        self.announce(&report).await;

        let outcome = if drift_detected { "drift" } else { "stable" };
        counter!("lifecycle_drift_checks_total", "outcome" => outcome).increment(1);
        gauge!("lifecycle_drift_psi", "model_key" => model.model_key.clone()).set(scores.psi);
        gauge!("lifecycle_drift_js_divergence", "model_key" => model.model_key.clone())
            .set(scores.js_divergence);
        histogram!("lifecycle_drift_check_duration_seconds").record(started.elapsed().as_secs_f64());

        info!(
            check_id = %report.check.id,
            psi = scores.psi,
            js_divergence = scores.js_divergence,
            items_analyzed,
            drift_detected,
            "Drift check recorded"
        );

        Ok(report)
    }

    async fn announce(&self, report: &DriftReport) {
        let check = &report.check;
        let event = LifecycleEvent::DriftChecked {
            model_key: check.model_key.clone(),
            check_id: check.id,
            check_date: check.check_date,
            psi_value: check.psi_value,
            js_divergence: check.js_divergence,
            drift_detected: check.drift_detected,
        };
        if let Err(err) = self.events.publish(event).await {
            warn!(check_id = %check.id, error = %err, "Failed to deliver drift event");
        }

        if check.drift_detected {
            if let Err(err) = self
                .alerts
                .drift_detected(check, report.worst_feature())
                .await
            {
                warn!(check_id = %check.id, error = %err, "Failed to raise drift alert");
            }
        }
    }
}
