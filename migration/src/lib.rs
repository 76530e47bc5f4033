//! Database migrations for the model lifecycle monitor.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_12_01_000001_create_models;
mod m2025_12_01_000002_create_model_versions;
mod m2025_12_01_000003_create_drift_checks;
mod m2025_12_01_000004_create_client_datasets;
mod m2025_12_01_000005_create_retraining_jobs;
mod m2025_12_01_000006_add_retraining_job_single_flight_guard;
mod m2025_12_01_000007_create_alerts;
mod m2025_12_01_000008_create_feature_snapshots;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_12_01_000001_create_models::Migration),
            Box::new(m2025_12_01_000002_create_model_versions::Migration),
            Box::new(m2025_12_01_000003_create_drift_checks::Migration),
            Box::new(m2025_12_01_000004_create_client_datasets::Migration),
            Box::new(m2025_12_01_000005_create_retraining_jobs::Migration),
            Box::new(m2025_12_01_000006_add_retraining_job_single_flight_guard::Migration),
            Box::new(m2025_12_01_000007_create_alerts::Migration),
            Box::new(m2025_12_01_000008_create_feature_snapshots::Migration),
        ]
    }
}
