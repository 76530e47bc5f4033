mod test_utils;

use chrono::Duration;
use lifecycle::{
    collaborators::LifecycleEvent,
    error::LifecycleError,
    models::alert::{AlertSeverity, AlertType},
    repositories::{MlModelRepository, NewModel},
};
use test_utils::{Harness, drifted_sample, stable_sample, start_time};

#[tokio::test]
async fn stable_traffic_records_check_without_drift() {
    let h = Harness::new().await.unwrap();
    h.register_model("fraud", 0.92).await.unwrap();
    h.data.set_sample("fraud", stable_sample(200));
    let model = MlModelRepository::new(h.db.clone()).get("fraud").await.unwrap();

    let report = h.monitor.check(&model).await.unwrap();

    assert!(report.created);
    assert!(!report.drift_detected());
    assert_eq!(report.check.psi_value, 0.0);
    assert!(report.check.js_divergence < 1e-9);
    assert_eq!(report.check.items_analyzed, 200);
    assert_eq!(report.check.check_date, start_time().date_naive());
    assert_eq!(report.feature_scores.get("amount"), Some(&0.0));

    assert_eq!(h.monitor.history("fraud").await.unwrap().len(), 1);
    assert!(h.alerts.list("fraud").await.unwrap().is_empty());
}

#[tokio::test]
async fn shifted_feature_raises_drift_alert_and_events() {
    let h = Harness::new().await.unwrap();
    h.register_model("fraud", 0.92).await.unwrap();
    h.data.set_sample("fraud", drifted_sample(200));
    let model = MlModelRepository::new(h.db.clone()).get("fraud").await.unwrap();
    let mut events = h.events.subscribe();

    let report = h.monitor.check(&model).await.unwrap();

    assert!(report.created);
    assert!(report.drift_detected());
    assert!(report.check.psi_value > h.config.drift.psi_threshold);
    assert_eq!(report.worst_feature().map(|(name, _)| name), Some("amount"));

    let alerts = h.alerts.list("fraud").await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::DriftDetected);
    assert_eq!(alerts[0].severity, AlertSeverity::Warning);
    assert!(alerts[0].dismissed_at.is_none());

    match events.try_recv().unwrap() {
        LifecycleEvent::DriftChecked {
            check_id,
            drift_detected,
            ..
        } => {
            assert_eq!(check_id, report.check.id);
            assert!(drift_detected);
        }
        other => panic!("expected drift event, got {other:?}"),
    }
    match events.try_recv().unwrap() {
        LifecycleEvent::AlertRaised { alert_type, .. } => {
            assert_eq!(alert_type, AlertType::DriftDetected);
        }
        other => panic!("expected alert event, got {other:?}"),
    }
}

#[tokio::test]
async fn second_check_on_same_day_returns_existing_row() {
    let h = Harness::new().await.unwrap();
    h.register_model("fraud", 0.92).await.unwrap();
    h.data.set_sample("fraud", drifted_sample(200));
    let model = MlModelRepository::new(h.db.clone()).get("fraud").await.unwrap();

    let first = h.monitor.check(&model).await.unwrap();
    let second = h.monitor.check(&model).await.unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.check.id, second.check.id);
    assert_eq!(h.monitor.history("fraud").await.unwrap().len(), 1);
    // The replay does not re-alert.
    assert_eq!(h.alerts.list("fraud").await.unwrap().len(), 1);

    h.clock.advance(Duration::hours(2));
    let next_day = h.monitor.check(&model).await.unwrap();
    assert!(next_day.created);
    assert_ne!(next_day.check.check_date, first.check.check_date);
    assert_eq!(h.monitor.history("fraud").await.unwrap().len(), 2);
}

#[tokio::test]
async fn small_sample_is_inconclusive_and_records_nothing() {
    let h = Harness::new().await.unwrap();
    h.register_model("fraud", 0.92).await.unwrap();
    h.data.set_sample("fraud", stable_sample(50));
    let model = MlModelRepository::new(h.db.clone()).get("fraud").await.unwrap();

    let err = h.monitor.check(&model).await.unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::InsufficientData {
            items_analyzed: 50,
            required: 100,
            ..
        }
    ));
    assert!(h.monitor.todays_check("fraud").await.unwrap().is_none());
    assert!(h.alerts.list("fraud").await.unwrap().is_empty());

    // Later the same day enough traffic arrived; the day is still open.
    h.data.set_sample("fraud", stable_sample(150));
    let report = h.monitor.check(&model).await.unwrap();
    assert!(report.created);
    assert_eq!(report.check.items_analyzed, 150);
}

#[tokio::test]
async fn missing_baseline_is_a_data_source_error() {
    let h = Harness::new().await.unwrap();
    let model = MlModelRepository::new(h.db.clone())
        .register(
            NewModel {
                model_key: "churn".to_string(),
                version: 1,
                accuracy: 0.81,
                metrics: serde_json::json!({ "accuracy": 0.81 }),
                artifact_uri: None,
            },
            start_time(),
        )
        .await
        .unwrap();
    h.data.set_sample("churn", stable_sample(200));

    let err = h.monitor.check(&model).await.unwrap_err();
    assert_eq!(err.code(), "DATA_SOURCE_ERROR");
    assert!(h.monitor.history("churn").await.unwrap().is_empty());
}
