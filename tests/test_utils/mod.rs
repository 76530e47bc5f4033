//! Test utilities for database testing.
//!
//! In-memory SQLite with migrations applied, plus scripted stand-ins for the
//! trainer and the production data store, wired into the real services.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lifecycle::{
    alerts::AlertPublisher,
    collaborators::{
        Baseline, BroadcastEventBus, Clock, DataError, DataRepository, HoldoutSplit, ManualClock,
        Metrics, ModelArtifact, ProductionSample, SemaphoreLimiter, TrainedCandidate, Trainer,
        TrainerError, TrainingInput,
    },
    config::{AppConfig, PersistenceRetryConfig},
    drift::DriftMonitor,
    feature_store::{FeatureStore, FeatureTransform, Transformer, TransformerSet},
    orchestrator::{RetrainingOrchestrator, RetrainingServices},
    repositories::{ClientDatasetRepository, MlModelRepository, NewModel},
    scheduler::JobScheduler,
};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Statement};

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;

    // Fixtures insert drift checks and jobs for models the test never registers.
    db.execute(Statement::from_string(
        db.get_database_backend(),
        "PRAGMA foreign_keys = OFF".to_string(),
    ))
    .await?;

    Ok(db)
}

pub fn start_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-03-01T23:00:00Z")
        .expect("valid timestamp")
        .with_timezone(&Utc)
}

pub fn test_config() -> AppConfig {
    AppConfig {
        persistence_retry: PersistenceRetryConfig {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 5,
            jitter_factor: 0.0,
        },
        ..AppConfig::default()
    }
}

/// `n` values cycling through 0..100, shifted by `offset`.
pub fn amounts(n: usize, offset: f64) -> Vec<f64> {
    (0..n).map(|i| (i % 100) as f64 + offset).collect()
}

pub fn baseline() -> Baseline {
    let mut baseline = Baseline {
        class_distribution: vec![0.7, 0.3],
        ..Default::default()
    };
    baseline.features.insert("amount".to_string(), amounts(1000, 0.0));
    baseline
}

/// Production traffic distributed exactly like [`baseline`].
pub fn stable_sample(n: usize) -> ProductionSample {
    let mut sample = ProductionSample {
        class_probabilities: vec![vec![0.7, 0.3]; n],
        ..Default::default()
    };
    sample.features.insert("amount".to_string(), amounts(n, 0.0));
    sample
}

/// Production traffic whose `amount` feature moved well outside the baseline.
pub fn drifted_sample(n: usize) -> ProductionSample {
    let mut sample = stable_sample(n);
    sample.features.insert("amount".to_string(), amounts(n, 60.0));
    sample
}

pub fn transformers() -> TransformerSet {
    TransformerSet::new(vec![FeatureTransform {
        name: "amount".to_string(),
        transformer: Transformer::StandardScaler {
            mean: 49.5,
            std_dev: 28.87,
        },
    }])
    .expect("valid transformer set")
}

/// What the next `train` call does
#[derive(Debug, Clone)]
pub enum TrainerStep {
    Accuracy(f64),
    Fail(&'static str),
    Slow { delay: Duration, accuracy: f64 },
}

/// Trainer that replays scripted steps, then falls back to a fixed accuracy.
pub struct ScriptedTrainer {
    steps: Mutex<VecDeque<TrainerStep>>,
    default_accuracy: f64,
    evaluations: Mutex<HashMap<String, f64>>,
    calls: AtomicUsize,
}

impl ScriptedTrainer {
    pub fn new(default_accuracy: f64) -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            default_accuracy,
            evaluations: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, step: TrainerStep) {
        self.steps.lock().unwrap().push_back(step);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Trainer for ScriptedTrainer {
    async fn train(&self, input: &TrainingInput) -> Result<TrainedCandidate, TrainerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(TrainerStep::Accuracy(self.default_accuracy));

        let accuracy = match step {
            TrainerStep::Accuracy(accuracy) => accuracy,
            TrainerStep::Fail(message) => return Err(TrainerError::Failed(message.to_string())),
            TrainerStep::Slow { delay, accuracy } => {
                tokio::time::sleep(delay).await;
                accuracy
            }
        };

        let uri = format!("mem://{}/v{}", input.model_key, input.candidate_version);
        self.evaluations
            .lock()
            .unwrap()
            .insert(uri.clone(), accuracy);

        let mut refitted = (*input.transformers).clone();
        if let Some(FeatureTransform {
            transformer: Transformer::StandardScaler { mean, .. },
            ..
        }) = refitted.features.first_mut()
        {
            *mean += f64::from(input.candidate_version);
        }

        Ok(TrainedCandidate {
            artifact: ModelArtifact { uri },
            transformers: refitted,
            training_metadata: serde_json::json!({
                "rows": input.total_rows(),
                "datasets": input.datasets.len(),
            }),
        })
    }

    async fn evaluate(
        &self,
        artifact: &ModelArtifact,
        _holdout: &HoldoutSplit,
    ) -> Result<Metrics, TrainerError> {
        self.evaluations
            .lock()
            .unwrap()
            .get(&artifact.uri)
            .map(|accuracy| Metrics::with_accuracy(*accuracy))
            .ok_or_else(|| TrainerError::Evaluation(format!("unknown artifact {}", artifact.uri)))
    }
}

/// Data repository backed by maps; `recent_sample` ignores the window.
#[derive(Default)]
pub struct InMemoryDataRepository {
    baselines: Mutex<HashMap<(String, i32), Baseline>>,
    samples: Mutex<HashMap<String, ProductionSample>>,
    live: Mutex<HashMap<(String, i32), Metrics>>,
}

impl InMemoryDataRepository {
    pub fn set_baseline(&self, model_key: &str, version: i32, baseline: Baseline) {
        self.baselines
            .lock()
            .unwrap()
            .insert((model_key.to_string(), version), baseline);
    }

    pub fn set_sample(&self, model_key: &str, sample: ProductionSample) {
        self.samples
            .lock()
            .unwrap()
            .insert(model_key.to_string(), sample);
    }

    pub fn set_live_metrics(&self, model_key: &str, version: i32, metrics: Metrics) {
        self.live
            .lock()
            .unwrap()
            .insert((model_key.to_string(), version), metrics);
    }
}

#[async_trait]
impl DataRepository for InMemoryDataRepository {
    async fn baseline(&self, model_key: &str, version: i32) -> Result<Baseline, DataError> {
        self.baselines
            .lock()
            .unwrap()
            .get(&(model_key.to_string(), version))
            .cloned()
            .ok_or_else(|| DataError::MissingBaseline {
                model_key: model_key.to_string(),
                version,
            })
    }

    async fn recent_sample(
        &self,
        model_key: &str,
        _since: DateTime<Utc>,
        _until: DateTime<Utc>,
    ) -> Result<ProductionSample, DataError> {
        Ok(self
            .samples
            .lock()
            .unwrap()
            .get(model_key)
            .cloned()
            .unwrap_or_default())
    }

    async fn holdout(&self, model_key: &str) -> Result<HoldoutSplit, DataError> {
        Ok(HoldoutSplit {
            model_key: model_key.to_string(),
            uri: format!("mem://holdout/{model_key}"),
            row_count: 1000,
        })
    }

    async fn live_metrics(
        &self,
        model_key: &str,
        version: i32,
        _since: DateTime<Utc>,
    ) -> Result<Option<Metrics>, DataError> {
        Ok(self
            .live
            .lock()
            .unwrap()
            .get(&(model_key.to_string(), version))
            .cloned())
    }
}

/// Real services over an in-memory database and scripted collaborators
pub struct Harness {
    pub db: DatabaseConnection,
    pub config: AppConfig,
    pub clock: Arc<ManualClock>,
    pub data: Arc<InMemoryDataRepository>,
    pub trainer: Arc<ScriptedTrainer>,
    pub limiter: Arc<SemaphoreLimiter>,
    pub events: BroadcastEventBus,
    pub alerts: Arc<AlertPublisher>,
    pub features: Arc<FeatureStore>,
    pub monitor: Arc<DriftMonitor>,
    pub orchestrator: Arc<RetrainingOrchestrator>,
}

impl Harness {
    pub async fn new() -> Result<Self> {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: AppConfig) -> Result<Self> {
        let db = setup_test_db().await?;
        let clock = Arc::new(ManualClock::new(start_time()));
        let data = Arc::new(InMemoryDataRepository::default());
        let trainer = Arc::new(ScriptedTrainer::new(0.95));
        let events = BroadcastEventBus::new(256);

        let alerts = Arc::new(AlertPublisher::new(
            db.clone(),
            Arc::new(events.clone()),
            clock.clone(),
        ));
        let features = Arc::new(FeatureStore::new(
            db.clone(),
            config.feature_store.cache_capacity,
            clock.clone(),
        ));
        let monitor = Arc::new(DriftMonitor::new(
            db.clone(),
            data.clone(),
            alerts.clone(),
            Arc::new(events.clone()),
            clock.clone(),
            config.drift.clone(),
        ));
        let limiter = Arc::new(SemaphoreLimiter::new(config.retraining.compute_slots));
        let orchestrator = Arc::new(RetrainingOrchestrator::new(
            db.clone(),
            features.clone(),
            alerts.clone(),
            RetrainingServices {
                trainer: trainer.clone(),
                data: data.clone(),
                limiter: limiter.clone(),
                events: Arc::new(events.clone()),
                clock: clock.clone(),
            },
            config.retraining.clone(),
            config.persistence_retry.clone(),
        ));

        Ok(Self {
            db,
            config,
            clock,
            data,
            trainer,
            limiter,
            events,
            alerts,
            features,
            monitor,
            orchestrator,
        })
    }

    pub fn scheduler(&self) -> JobScheduler {
        JobScheduler::new(
            MlModelRepository::new(self.db.clone()),
            self.monitor.clone(),
            self.orchestrator.clone(),
            self.clock.clone(),
            &self.config.scheduler,
        )
        .expect("valid scheduler config")
    }

    /// Register `model_key` at v1 with its feature snapshot and baseline.
    pub async fn register_model(&self, model_key: &str, accuracy: f64) -> Result<()> {
        MlModelRepository::new(self.db.clone())
            .register(
                NewModel {
                    model_key: model_key.to_string(),
                    version: 1,
                    accuracy,
                    metrics: Metrics::with_accuracy(accuracy).to_json(),
                    artifact_uri: Some(format!("mem://{model_key}/v1")),
                },
                start_time(),
            )
            .await?;
        self.features.save(model_key, 1, &transformers()).await?;
        self.data.set_baseline(model_key, 1, baseline());
        Ok(())
    }

    pub async fn add_dataset(&self, model_key: &str, rows: i64, confidence: f64) -> Result<()> {
        ClientDatasetRepository::new(self.db.clone())
            .append(
                model_key,
                rows,
                confidence,
                &format!("s3://client-data/{model_key}/{rows}"),
                self.clock.now(),
            )
            .await?;
        Ok(())
    }
}
