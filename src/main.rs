//! # Lifecycle Monitor Entry Point
//!
//! Runs the daily drift/retraining scheduler and exposes operator commands.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use lifecycle::{
    alerts::AlertPublisher,
    collaborators::{
        BroadcastEventBus, FileDataRepository, HoldoutSplit, Metrics, ModelArtifact,
        SemaphoreLimiter, SystemClock, TrainedCandidate, Trainer, TrainerError, TrainingInput,
    },
    config::{AppConfig, ConfigLoader},
    db,
    drift::DriftMonitor,
    feature_store::FeatureStore,
    migration::{Migrator, MigratorTrait},
    orchestrator::{RetrainingOrchestrator, RetrainingServices},
    repositories::MlModelRepository,
    scheduler::JobScheduler,
    telemetry,
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "lifecycle")]
#[command(about = "Model drift monitoring, retraining and promotion")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daily scheduler until interrupted
    Run,

    /// Run one scheduler cycle now and print its report
    Cycle,

    /// Apply pending database migrations
    Migrate,

    /// Revert the promotion behind a model's active version
    Rollback {
        /// Model key
        #[arg(long)]
        model: String,

        /// Operator recorded on the reverted job
        #[arg(long)]
        by: String,
    },

    /// Dismiss an alert
    DismissAlert {
        #[arg(long)]
        id: Uuid,

        #[arg(long)]
        by: String,
    },
}

/// Stand-in until a training backend is wired into the binary. Attempts end as
/// `failed` with an alert; library callers inject their own [`Trainer`].
struct UnconfiguredTrainer;

#[async_trait]
impl Trainer for UnconfiguredTrainer {
    async fn train(&self, input: &TrainingInput) -> Result<TrainedCandidate, TrainerError> {
        Err(TrainerError::Failed(format!(
            "no training backend configured for {}",
            input.model_key
        )))
    }

    async fn evaluate(
        &self,
        _artifact: &ModelArtifact,
        _holdout: &HoldoutSplit,
    ) -> Result<Metrics, TrainerError> {
        Err(TrainerError::Evaluation(
            "no training backend configured".to_string(),
        ))
    }
}

struct Services {
    alerts: Arc<AlertPublisher>,
    orchestrator: Arc<RetrainingOrchestrator>,
    scheduler: JobScheduler,
}

fn build_services(config: &AppConfig, db: &DatabaseConnection) -> Result<Services> {
    let clock = Arc::new(SystemClock);
    let events = Arc::new(BroadcastEventBus::default());
    let data = Arc::new(FileDataRepository::new(config.data_dir.clone()));

    let alerts = Arc::new(AlertPublisher::new(db.clone(), events.clone(), clock.clone()));
    let features = Arc::new(FeatureStore::new(
        db.clone(),
        config.feature_store.cache_capacity,
        clock.clone(),
    ));
    let monitor = Arc::new(DriftMonitor::new(
        db.clone(),
        data.clone(),
        alerts.clone(),
        events.clone(),
        clock.clone(),
        config.drift.clone(),
    ));
    let orchestrator = Arc::new(RetrainingOrchestrator::new(
        db.clone(),
        features,
        alerts.clone(),
        RetrainingServices {
            trainer: Arc::new(UnconfiguredTrainer),
            data,
            limiter: Arc::new(SemaphoreLimiter::new(config.retraining.compute_slots)),
            events,
            clock: clock.clone(),
        },
        config.retraining.clone(),
        config.persistence_retry.clone(),
    ));
    let scheduler = JobScheduler::new(
        MlModelRepository::new(db.clone()),
        monitor,
        orchestrator.clone(),
        clock,
        &config.scheduler,
    )
    .context("building scheduler")?;

    Ok(Services {
        alerts,
        orchestrator,
        scheduler,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new().load().context("loading configuration")?;
    telemetry::init_telemetry(&config).context("initializing telemetry")?;
    let span = telemetry::service_span(&config);
    run(cli, config).instrument(span).await
}

async fn run(cli: Cli, config: AppConfig) -> Result<()> {
    if let Ok(redacted) = config.redacted_json() {
        tracing::debug!(config = %redacted, "Loaded configuration");
    }
    info!(profile = %config.profile, "Loaded configuration");

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;
    db::health_check(&db).await?;

    match cli.command {
        Commands::Migrate => {
            Migrator::up(&db, None).await.context("applying migrations")?;
            info!("Migrations applied");
        }
        Commands::Run => {
            let services = build_services(&config, &db)?;
            let shutdown = CancellationToken::new();
            let signal = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Shutdown signal received");
                }
                signal.cancel();
            });
            services.scheduler.run(shutdown).await;
        }
        Commands::Cycle => {
            let services = build_services(&config, &db)?;
            let report = services.scheduler.run_cycle().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Rollback { model, by } => {
            let services = build_services(&config, &db)?;
            let outcome = services.orchestrator.rollback(&model, &by).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::DismissAlert { id, by } => {
            let services = build_services(&config, &db)?;
            let alert = services.alerts.dismiss(id, &by).await?;
            println!("{}", serde_json::to_string_pretty(&alert)?);
        }
    }

    Ok(())
}
