mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use lifecycle::{
    collaborators::{Clock, LifecycleEvent, Metrics, ResourceLimiter},
    error::{LifecycleError, is_unique_violation},
    models::{
        alert::{AlertSeverity, AlertType},
        client_dataset::DatasetStatus,
        model_version::VersionStatus,
        retraining_job::{JobStatus, JobTrigger},
    },
    orchestrator::{REGRESSION_MONITOR, RetrainingOutcome},
    repositories::{
        ClientDatasetRepository, JobOutcome, MlModelRepository, ModelVersionRepository,
        NewRetrainingJob, RetrainingJobRepository,
    },
};
use proptest::prelude::*;
use test_utils::{Harness, TrainerStep, drifted_sample, stable_sample, test_config};

async fn dataset_statuses(h: &Harness, model_key: &str) -> Vec<DatasetStatus> {
    ClientDatasetRepository::new(h.db.clone())
        .list(model_key)
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.status)
        .collect()
}

async fn version_status(h: &Harness, model_key: &str, version: i32) -> Option<VersionStatus> {
    ModelVersionRepository::new(h.db.clone())
        .find(model_key, version)
        .await
        .unwrap()
        .map(|v| v.status)
}

/// Registered model with enough datasets to clear the retraining threshold.
async fn ready_model(h: &Harness, accuracy: f64) {
    h.register_model("fraud", accuracy).await.unwrap();
    h.add_dataset("fraud", 400, 0.9).await.unwrap();
    h.add_dataset("fraud", 300, 0.8).await.unwrap();
}

fn queued_job(model_key: &str, candidate: i32) -> NewRetrainingJob {
    NewRetrainingJob {
        model_key: model_key.to_string(),
        trigger: JobTrigger::Manual,
        drift_check_id: None,
        requested_by: Some("ops".to_string()),
        source_model_version: candidate - 1,
        new_model_version: candidate,
        old_metrics: serde_json::json!({ "accuracy": 0.9 }),
    }
}

#[tokio::test]
async fn degraded_candidate_is_rejected_with_one_critical_alert() {
    let h = Harness::new().await.unwrap();
    ready_model(&h, 0.92).await;
    h.trainer.push(TrainerStep::Accuracy(0.85));
    let mut events = h.events.subscribe();

    let outcome = h.orchestrator.trigger_manual("fraud", "ops").await.unwrap();

    let RetrainingOutcome::Degraded {
        job,
        accuracy_delta,
    } = outcome
    else {
        panic!("expected degradation, got {outcome:?}");
    };
    assert!((accuracy_delta - -0.07).abs() < 1e-9);
    assert_eq!(job.status, JobStatus::DegradationDetected);
    assert!(job.status.is_terminal());
    assert_eq!(job.new_model_version, Some(2));
    assert!(job.finished_at.is_some());

    let model = MlModelRepository::new(h.db.clone()).get("fraud").await.unwrap();
    assert_eq!(model.active_version, 1);
    assert_eq!(model.accuracy, 0.92);
    assert_eq!(version_status(&h, "fraud", 1).await, Some(VersionStatus::Active));
    assert_eq!(version_status(&h, "fraud", 2).await, Some(VersionStatus::Rejected));
    assert_eq!(
        dataset_statuses(&h, "fraud").await,
        vec![DatasetStatus::Active, DatasetStatus::Active]
    );

    let alerts = h.alerts.list("fraud").await.unwrap();
    let critical: Vec<_> = alerts
        .iter()
        .filter(|a| a.severity == AlertSeverity::Critical)
        .collect();
    assert_eq!(critical.len(), 1);
    assert_eq!(critical[0].alert_type, AlertType::ModelDegradation);

    let mut statuses = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let LifecycleEvent::JobTransitioned { status, .. } = event {
            statuses.push(status);
        }
    }
    assert_eq!(
        statuses,
        vec![
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::DegradationDetected
        ]
    );
}

#[tokio::test]
async fn improved_candidate_is_promoted() {
    let h = Harness::new().await.unwrap();
    ready_model(&h, 0.92).await;
    h.trainer.push(TrainerStep::Accuracy(0.95));

    let outcome = h.orchestrator.trigger_manual("fraud", "ops").await.unwrap();

    let RetrainingOutcome::Promoted {
        job,
        from_version,
        to_version,
        ..
    } = outcome
    else {
        panic!("expected promotion, got {outcome:?}");
    };
    assert_eq!((from_version, to_version), (1, 2));
    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(job.requested_by.as_deref(), Some("ops"));

    let model = MlModelRepository::new(h.db.clone()).get("fraud").await.unwrap();
    assert_eq!(model.active_version, 2);
    assert_eq!(model.accuracy, 0.95);
    assert_eq!(version_status(&h, "fraud", 1).await, Some(VersionStatus::Archived));
    assert_eq!(version_status(&h, "fraud", 2).await, Some(VersionStatus::Active));
    assert_eq!(
        dataset_statuses(&h, "fraud").await,
        vec![DatasetStatus::Archived, DatasetStatus::Archived]
    );
    assert_eq!(h.features.versions("fraud").await.unwrap(), vec![1, 2]);

    let alerts = h.alerts.list("fraud").await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::ModelPromoted);
    assert_eq!(alerts[0].severity, AlertSeverity::Info);
    assert!(h.orchestrator.in_flight_job("fraud").await.unwrap().is_none());
}

#[tokio::test]
async fn drift_trigger_links_job_to_check() {
    let h = Harness::new().await.unwrap();
    ready_model(&h, 0.92).await;
    h.data.set_sample("fraud", drifted_sample(200));
    let model = MlModelRepository::new(h.db.clone()).get("fraud").await.unwrap();
    let report = h.monitor.check(&model).await.unwrap();
    assert!(report.drift_detected());

    let outcome = h
        .orchestrator
        .trigger_drift(&report.check)
        .await
        .unwrap()
        .expect("datasets clear the threshold");

    let job = outcome.job();
    assert_eq!(job.trigger, JobTrigger::Drift);
    assert_eq!(job.drift_check_id, Some(report.check.id));
    assert!(job.requested_by.is_none());
    assert_eq!(outcome.status(), JobStatus::Success);
}

#[tokio::test]
async fn stable_check_does_not_trigger() {
    let h = Harness::new().await.unwrap();
    ready_model(&h, 0.92).await;
    h.data.set_sample("fraud", stable_sample(200));
    let model = MlModelRepository::new(h.db.clone()).get("fraud").await.unwrap();
    let report = h.monitor.check(&model).await.unwrap();

    assert!(h.orchestrator.trigger_drift(&report.check).await.unwrap().is_none());
    assert_eq!(h.trainer.calls(), 0);
}

#[tokio::test]
async fn drift_below_dataset_threshold_does_not_retrain() {
    let h = Harness::new().await.unwrap();
    h.register_model("fraud", 0.92).await.unwrap();
    h.add_dataset("fraud", 450, 0.95).await.unwrap();
    h.data.set_sample("fraud", drifted_sample(200));
    let model = MlModelRepository::new(h.db.clone()).get("fraud").await.unwrap();
    let report = h.monitor.check(&model).await.unwrap();

    let outcome = h.orchestrator.trigger_drift(&report.check).await.unwrap();

    assert!(outcome.is_none());
    assert!(h.orchestrator.jobs("fraud").await.unwrap().is_empty());
    assert_eq!(dataset_statuses(&h, "fraud").await, vec![DatasetStatus::Active]);

    // Low-confidence rows count toward volume but drag the mean below the bar.
    h.add_dataset("fraud", 200, 0.1).await.unwrap();
    assert!(h.orchestrator.trigger_drift(&report.check).await.unwrap().is_none());
    assert_eq!(h.trainer.calls(), 0);
}

#[tokio::test]
async fn trainer_failure_fails_job_and_releases_datasets() {
    let h = Harness::new().await.unwrap();
    ready_model(&h, 0.92).await;
    h.trainer.push(TrainerStep::Fail("out of memory"));

    let outcome = h.orchestrator.trigger_manual("fraud", "ops").await.unwrap();

    let RetrainingOutcome::Failed { job, error } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert!(error.contains("out of memory"));
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some(error.as_str()));

    let model = MlModelRepository::new(h.db.clone()).get("fraud").await.unwrap();
    assert_eq!(model.active_version, 1);
    assert_eq!(version_status(&h, "fraud", 2).await, None);
    assert_eq!(
        dataset_statuses(&h, "fraud").await,
        vec![DatasetStatus::Active, DatasetStatus::Active]
    );

    let alerts = h.alerts.list("fraud").await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::RetrainingFailed);
    assert!(h.orchestrator.in_flight_job("fraud").await.unwrap().is_none());

    // The next attempt does not reuse the failed attempt's version number.
    let retry = h.orchestrator.trigger_manual("fraud", "ops").await.unwrap();
    assert_eq!(retry.job().new_model_version, Some(3));
    assert_eq!(retry.status(), JobStatus::Success);
}

#[tokio::test]
async fn invalid_metrics_fail_the_job() {
    let h = Harness::new().await.unwrap();
    ready_model(&h, 0.92).await;
    h.trainer.push(TrainerStep::Accuracy(1.7));

    let outcome = h.orchestrator.trigger_manual("fraud", "ops").await.unwrap();

    assert_eq!(outcome.status(), JobStatus::Failed);
    assert_eq!(
        MlModelRepository::new(h.db.clone())
            .get("fraud")
            .await
            .unwrap()
            .active_version,
        1
    );
}

#[tokio::test]
async fn slow_training_times_out() {
    let mut config = test_config();
    config.retraining.max_job_duration_seconds = 1;
    let h = Harness::with_config(config).await.unwrap();
    ready_model(&h, 0.92).await;
    h.trainer.push(TrainerStep::Slow {
        delay: Duration::from_secs(3),
        accuracy: 0.99,
    });

    let outcome = h.orchestrator.trigger_manual("fraud", "ops").await.unwrap();

    let RetrainingOutcome::Failed { error, .. } = outcome else {
        panic!("expected timeout failure, got {outcome:?}");
    };
    assert!(error.contains("exceeded 1s"));
    assert_eq!(
        dataset_statuses(&h, "fraud").await,
        vec![DatasetStatus::Active, DatasetStatus::Active]
    );
}

#[tokio::test]
async fn waiting_for_compute_counts_against_job_duration() {
    let mut config = test_config();
    config.retraining.max_job_duration_seconds = 1;
    config.retraining.compute_slots = 1;
    let h = Harness::with_config(config).await.unwrap();
    ready_model(&h, 0.92).await;
    let held = h.limiter.acquire().await.unwrap();

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        h.orchestrator.trigger_manual("fraud", "ops"),
    )
    .await
    .expect("attempt bounded by the job duration")
    .unwrap();
    drop(held);

    let RetrainingOutcome::Failed { error, .. } = outcome else {
        panic!("expected timeout failure, got {outcome:?}");
    };
    assert!(error.contains("exceeded 1s"));
    assert_eq!(h.trainer.calls(), 0);
    assert_eq!(h.limiter.available(), 1);
    assert_eq!(
        dataset_statuses(&h, "fraud").await,
        vec![DatasetStatus::Active, DatasetStatus::Active]
    );
}

#[tokio::test]
async fn rollback_restores_previous_version() {
    let h = Harness::new().await.unwrap();
    ready_model(&h, 0.92).await;
    let promoted = h.orchestrator.trigger_manual("fraud", "ops").await.unwrap();
    let job_id = promoted.job().id;

    let rollback = h.orchestrator.rollback("fraud", "alice").await.unwrap();

    assert_eq!(rollback.job_id, job_id);
    assert_eq!((rollback.from_version, rollback.to_version), (2, 1));
    assert_eq!(rollback.requested_by, "alice");

    let model = MlModelRepository::new(h.db.clone()).get("fraud").await.unwrap();
    assert_eq!(model.active_version, 1);
    assert_eq!(model.accuracy, 0.92);
    assert_eq!(version_status(&h, "fraud", 1).await, Some(VersionStatus::Active));
    assert_eq!(version_status(&h, "fraud", 2).await, Some(VersionStatus::Archived));

    let job = RetrainingJobRepository::new(h.db.clone())
        .find(job_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(job.reverted_by.as_deref(), Some("alice"));
    assert!(job.reverted_at.is_some());

    let alerts = h.alerts.list_active(Some("fraud")).await.unwrap();
    assert!(alerts.iter().any(|a| a.alert_type == AlertType::ModelRolledBack));

    // Nothing promoted v1, so there is nothing further to revert.
    let err = h.orchestrator.rollback("fraud", "alice").await.unwrap_err();
    assert!(matches!(err, LifecycleError::NotFound { .. }));
}

#[tokio::test]
async fn rollback_without_promotion_is_not_found() {
    let h = Harness::new().await.unwrap();
    h.register_model("fraud", 0.92).await.unwrap();

    let err = h.orchestrator.rollback("fraud", "alice").await.unwrap_err();
    assert!(matches!(err, LifecycleError::NotFound { .. }));

    let err = h.orchestrator.rollback("unknown", "alice").await.unwrap_err();
    assert!(matches!(err, LifecycleError::NotFound { .. }));
}

#[tokio::test]
async fn live_regression_rolls_back_recent_promotion() {
    let h = Harness::new().await.unwrap();
    ready_model(&h, 0.92).await;
    h.orchestrator.trigger_manual("fraud", "ops").await.unwrap();

    // Within tolerance of the promoted 0.95.
    let kept = h
        .orchestrator
        .check_regression_with("fraud", &Metrics::with_accuracy(0.93))
        .await
        .unwrap();
    assert!(kept.is_none());

    h.data
        .set_live_metrics("fraud", 2, Metrics::with_accuracy(0.84));
    let rollback = h
        .orchestrator
        .check_regression("fraud")
        .await
        .unwrap()
        .expect("regressed promotion is reverted");

    assert_eq!(rollback.requested_by, REGRESSION_MONITOR);
    assert_eq!((rollback.from_version, rollback.to_version), (2, 1));
    assert_eq!(
        MlModelRepository::new(h.db.clone())
            .get("fraud")
            .await
            .unwrap()
            .active_version,
        1
    );
}

#[tokio::test]
async fn regression_outside_window_is_ignored() {
    let h = Harness::new().await.unwrap();
    ready_model(&h, 0.92).await;
    h.orchestrator.trigger_manual("fraud", "ops").await.unwrap();

    h.clock.advance(ChronoDuration::days(8));
    let outcome = h
        .orchestrator
        .check_regression_with("fraud", &Metrics::with_accuracy(0.5))
        .await
        .unwrap();

    assert!(outcome.is_none());
    assert_eq!(
        MlModelRepository::new(h.db.clone())
            .get("fraud")
            .await
            .unwrap()
            .active_version,
        2
    );
}

#[tokio::test]
async fn stale_jobs_are_reconciled() {
    let h = Harness::new().await.unwrap();
    h.register_model("fraud", 0.92).await.unwrap();
    h.add_dataset("fraud", 600, 0.9).await.unwrap();

    let jobs = RetrainingJobRepository::new(h.db.clone());
    let now = h.clock.now();
    let job = jobs.insert_queued(queued_job("fraud", 2), now).await.unwrap();
    assert!(RetrainingJobRepository::mark_running(&h.db, job.id, now).await.unwrap());
    let ids: Vec<_> = ClientDatasetRepository::new(h.db.clone())
        .list("fraud")
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.id)
        .collect();
    ClientDatasetRepository::transition(
        &h.db,
        &ids,
        DatasetStatus::Active,
        DatasetStatus::Processing,
        now,
    )
    .await
    .unwrap();

    // Young jobs are left alone.
    h.clock.advance(ChronoDuration::hours(1));
    assert_eq!(h.orchestrator.reconcile_stale().await.unwrap(), 0);

    h.clock.advance(ChronoDuration::hours(6));
    assert_eq!(h.orchestrator.reconcile_stale().await.unwrap(), 1);

    let job = jobs.find(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().contains("stale timeout"));
    assert_eq!(dataset_statuses(&h, "fraud").await, vec![DatasetStatus::Active]);
    assert!(h.orchestrator.in_flight_job("fraud").await.unwrap().is_none());

    let alerts = h.alerts.list("fraud").await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::RetrainingFailed);

    // A second pass finds nothing left to do.
    assert_eq!(h.orchestrator.reconcile_stale().await.unwrap(), 0);
}

#[tokio::test]
async fn in_flight_job_in_database_blocks_new_trigger() {
    let h = Harness::new().await.unwrap();
    ready_model(&h, 0.92).await;
    RetrainingJobRepository::new(h.db.clone())
        .insert_queued(queued_job("fraud", 2), h.clock.now())
        .await
        .unwrap();

    let err = h.orchestrator.trigger_manual("fraud", "ops").await.unwrap_err();

    assert!(matches!(err, LifecycleError::ConcurrencyConflict { .. }));
    assert_eq!(h.trainer.calls(), 0);
    assert_eq!(
        dataset_statuses(&h, "fraud").await,
        vec![DatasetStatus::Active, DatasetStatus::Active]
    );
}

#[tokio::test]
async fn partial_unique_index_admits_one_in_flight_job() {
    let h = Harness::new().await.unwrap();
    let jobs = RetrainingJobRepository::new(h.db.clone());
    let now = h.clock.now();

    let first = jobs.insert_queued(queued_job("fraud", 2), now).await.unwrap();
    let err = jobs
        .insert_queued(queued_job("fraud", 3), now)
        .await
        .unwrap_err();
    assert!(is_unique_violation(&err));

    // Other models are independent.
    jobs.insert_queued(queued_job("churn", 2), now).await.unwrap();

    assert!(RetrainingJobRepository::mark_running(&h.db, first.id, now).await.unwrap());
    let finished = RetrainingJobRepository::finish(
        &h.db,
        first.id,
        &JobOutcome::Failed {
            error_message: "boom".to_string(),
        },
        now,
    )
    .await
    .unwrap();
    assert!(finished);

    jobs.insert_queued(queued_job("fraud", 3), now).await.unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn concurrent_triggers_admit_exactly_one_job(callers in 2usize..6) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();

        let (succeeded, conflicts, jobs) = runtime.block_on(async move {
            let h = Harness::new().await.unwrap();
            ready_model(&h, 0.92).await;
            h.trainer.push(TrainerStep::Slow {
                delay: Duration::from_millis(300),
                accuracy: 0.95,
            });

            let orchestrator = Arc::clone(&h.orchestrator);
            let mut tasks = tokio::task::JoinSet::new();
            for caller in 0..callers {
                let orchestrator = orchestrator.clone();
                tasks.spawn(async move {
                    orchestrator
                        .trigger_manual("fraud", &format!("caller-{caller}"))
                        .await
                });
            }

            let (mut succeeded, mut conflicts) = (0, 0);
            while let Some(joined) = tasks.join_next().await {
                match joined.unwrap() {
                    Ok(_) => succeeded += 1,
                    Err(LifecycleError::ConcurrencyConflict { .. }) => conflicts += 1,
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }
            let jobs = h.orchestrator.jobs("fraud").await.unwrap().len();
            (succeeded, conflicts, jobs)
        });

        prop_assert_eq!(succeeded, 1);
        prop_assert_eq!(conflicts, callers - 1);
        prop_assert_eq!(jobs, 1);
    }
}
