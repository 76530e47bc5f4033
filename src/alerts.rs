//! # Alert Publisher
//!
//! Turns monitor and orchestrator outcomes into durable alert rows, then
//! announces them on the event bus. The row is written first; a bus failure is
//! logged and never undoes it.

use std::sync::Arc;

use metrics::counter;
use sea_orm::DatabaseConnection;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::collaborators::{Clock, EventBus, LifecycleEvent};
use crate::error::LifecycleError;
use crate::models::alert::{AlertSeverity, AlertType, Model as AlertModel};
use crate::models::drift_check::Model as DriftCheckModel;
use crate::repositories::{AlertRepository, NewAlert};

pub struct AlertPublisher {
    repo: AlertRepository,
    events: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
}

impl AlertPublisher {
    pub fn new(db: DatabaseConnection, events: Arc<dyn EventBus>, clock: Arc<dyn Clock>) -> Self {
        Self {
            repo: AlertRepository::new(db),
            events,
            clock,
        }
    }

    /// Persist an alert and announce it.
    pub async fn publish(&self, alert: NewAlert) -> Result<AlertModel, LifecycleError> {
        let row = self.repo.insert(alert, self.clock.now()).await?;

        counter!(
            "lifecycle_alerts_raised_total",
            "alert_type" => alert_type_label(row.alert_type),
            "severity" => severity_label(row.severity)
        )
        .increment(1);

        info!(
            alert_id = %row.id,
            model_key = %row.model_key,
            alert_type = alert_type_label(row.alert_type),
            severity = severity_label(row.severity),
            "{}",
            row.title
        );

        let event = LifecycleEvent::AlertRaised {
            alert_id: row.id,
            model_key: row.model_key.clone(),
            alert_type: row.alert_type,
            severity: row.severity,
            title: row.title.clone(),
        };
        if let Err(err) = self.events.publish(event).await {
            warn!(alert_id = %row.id, error = %err, "Failed to deliver alert event");
        }

        Ok(row)
    }

    pub async fn drift_detected(
        &self,
        check: &DriftCheckModel,
        worst_feature: Option<(&str, f64)>,
    ) -> Result<AlertModel, LifecycleError> {
        self.publish(NewAlert {
            model_key: check.model_key.clone(),
            alert_type: AlertType::DriftDetected,
            severity: AlertSeverity::Warning,
            title: format!("Drift detected for {} on {}", check.model_key, check.check_date),
            details: json!({
                "drift_check_id": check.id,
                "check_date": check.check_date,
                "psi_value": check.psi_value,
                "js_divergence": check.js_divergence,
                "items_analyzed": check.items_analyzed,
                "worst_feature": worst_feature.map(|(name, psi)| json!({ "name": name, "psi": psi })),
            }),
        })
        .await
    }

    pub async fn model_degradation(
        &self,
        model_key: &str,
        job_id: Uuid,
        old_accuracy: f64,
        new_accuracy: f64,
        accuracy_delta: f64,
        rollback_threshold: f64,
    ) -> Result<AlertModel, LifecycleError> {
        self.publish(NewAlert {
            model_key: model_key.to_string(),
            alert_type: AlertType::ModelDegradation,
            severity: AlertSeverity::Critical,
            title: format!(
                "Retrained {model_key} rejected: accuracy {old_accuracy:.4} -> {new_accuracy:.4}"
            ),
            details: json!({
                "job_id": job_id,
                "old_accuracy": old_accuracy,
                "new_accuracy": new_accuracy,
                "accuracy_delta": accuracy_delta,
                "rollback_threshold": rollback_threshold,
            }),
        })
        .await
    }

    pub async fn retraining_failed(
        &self,
        model_key: &str,
        job_id: Uuid,
        error_message: &str,
    ) -> Result<AlertModel, LifecycleError> {
        self.publish(NewAlert {
            model_key: model_key.to_string(),
            alert_type: AlertType::RetrainingFailed,
            severity: AlertSeverity::Warning,
            title: format!("Retraining failed for {model_key}"),
            details: json!({
                "job_id": job_id,
                "error": error_message,
            }),
        })
        .await
    }

    pub async fn model_promoted(
        &self,
        model_key: &str,
        job_id: Uuid,
        from_version: i32,
        to_version: i32,
        accuracy_delta: f64,
    ) -> Result<AlertModel, LifecycleError> {
        self.publish(NewAlert {
            model_key: model_key.to_string(),
            alert_type: AlertType::ModelPromoted,
            severity: AlertSeverity::Info,
            title: format!("Promoted {model_key} v{from_version} -> v{to_version}"),
            details: json!({
                "job_id": job_id,
                "from_version": from_version,
                "to_version": to_version,
                "accuracy_delta": accuracy_delta,
            }),
        })
        .await
    }

    pub async fn model_rolled_back(
        &self,
        model_key: &str,
        job_id: Uuid,
        from_version: i32,
        to_version: i32,
        requested_by: &str,
    ) -> Result<AlertModel, LifecycleError> {
        self.publish(NewAlert {
            model_key: model_key.to_string(),
            alert_type: AlertType::ModelRolledBack,
            severity: AlertSeverity::Warning,
            title: format!("Rolled back {model_key} v{from_version} -> v{to_version}"),
            details: json!({
                "job_id": job_id,
                "from_version": from_version,
                "to_version": to_version,
                "requested_by": requested_by,
            }),
        })
        .await
    }

    pub async fn persistence_failure(
        &self,
        model_key: &str,
        job_id: Option<Uuid>,
        context: &str,
        error_message: &str,
    ) -> Result<AlertModel, LifecycleError> {
        self.publish(NewAlert {
            model_key: model_key.to_string(),
            alert_type: AlertType::PersistenceFailure,
            severity: AlertSeverity::Critical,
            title: format!("Persistence failure for {model_key} during {context}"),
            details: json!({
                "job_id": job_id,
                "context": context,
                "error": error_message,
            }),
        })
        .await
    }

    /// Dismiss an alert. Dismissing twice keeps the first dismissal.
    pub async fn dismiss(
        &self,
        alert_id: Uuid,
        dismissed_by: &str,
    ) -> Result<AlertModel, LifecycleError> {
        let changed = self
            .repo
            .dismiss(alert_id, dismissed_by, self.clock.now())
            .await?;

        let alert = self
            .repo
            .find(alert_id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("alert", alert_id.to_string()))?;

        if changed {
            info!(alert_id = %alert_id, dismissed_by, "Alert dismissed");
        }
        Ok(alert)
    }

    pub async fn list_active(&self, model_key: Option<&str>) -> Result<Vec<AlertModel>, LifecycleError> {
        self.repo.list_active(model_key).await
    }

    pub async fn list(&self, model_key: &str) -> Result<Vec<AlertModel>, LifecycleError> {
        self.repo.list(model_key).await
    }
}

fn alert_type_label(alert_type: AlertType) -> &'static str {
    match alert_type {
        AlertType::DriftDetected => "drift_detected",
        AlertType::ModelDegradation => "model_degradation",
        AlertType::RetrainingFailed => "retraining_failed",
        AlertType::ModelPromoted => "model_promoted",
        AlertType::ModelRolledBack => "model_rolled_back",
        AlertType::PersistenceFailure => "persistence_failure",
    }
}

fn severity_label(severity: AlertSeverity) -> &'static str {
    match severity {
        AlertSeverity::Info => "info",
        AlertSeverity::Warning => "warning",
        AlertSeverity::Critical => "critical",
    }
}
