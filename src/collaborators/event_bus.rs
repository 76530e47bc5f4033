//! Live event delivery
//!
//! Durable state lives in the database; the bus only fans outcomes out to
//! whoever is listening (dashboards, websocket gateways, tests).

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::alert::{AlertSeverity, AlertType};
use crate::models::retraining_job::JobStatus;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    DriftChecked {
        model_key: String,
        check_id: Uuid,
        check_date: NaiveDate,
        psi_value: f64,
        js_divergence: f64,
        drift_detected: bool,
    },
    JobTransitioned {
        model_key: String,
        job_id: Uuid,
        status: JobStatus,
    },
    AlertRaised {
        alert_id: Uuid,
        model_key: String,
        alert_type: AlertType,
        severity: AlertSeverity,
        title: String,
    },
}

impl LifecycleEvent {
    pub fn model_key(&self) -> &str {
        match self {
            LifecycleEvent::DriftChecked { model_key, .. }
            | LifecycleEvent::JobTransitioned { model_key, .. }
            | LifecycleEvent::AlertRaised { model_key, .. } => model_key,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum EventBusError {
    #[error("event bus unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: LifecycleEvent) -> Result<(), EventBusError>;
}

/// In-process bus on `tokio::sync::broadcast`
#[derive(Debug, Clone)]
pub struct BroadcastEventBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl BroadcastEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EventBus for BroadcastEventBus {
    async fn publish(&self, event: LifecycleEvent) -> Result<(), EventBusError> {
        // No subscribers is not a failure; the durable rows are the source of truth.
        if let Err(broadcast::error::SendError(event)) = self.sender.send(event) {
            tracing::debug!(model_key = %event.model_key(), "No event subscribers");
        }
        Ok(())
    }
}
