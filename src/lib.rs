//! # Model Lifecycle Monitor
//!
//! Watches deployed models for input and output drift, retrains them on
//! accumulated client data, gates promotion on holdout accuracy and keeps an
//! auditable trail of drift checks, jobs, versions and alerts.
//!
//! The five services are [`feature_store::FeatureStore`],
//! [`drift::DriftMonitor`], [`orchestrator::RetrainingOrchestrator`],
//! [`scheduler::JobScheduler`] and [`alerts::AlertPublisher`].

pub mod alerts;
pub mod collaborators;
pub mod config;
pub mod db;
pub mod drift;
pub mod error;
pub mod feature_store;
pub mod models;
pub mod orchestrator;
pub mod repositories;
pub mod scheduler;
pub mod telemetry;
pub use migration;
