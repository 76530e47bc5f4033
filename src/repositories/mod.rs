//! # Repository Layer
//!
//! Repository implementations that encapsulate SeaORM operations for the
//! lifecycle tables. Methods that must participate in a caller's transaction
//! take the connection explicitly.

pub mod alert;
pub mod client_dataset;
pub mod drift_check;
pub mod ml_model;
pub mod model_version;
pub mod retraining_job;

pub use alert::{AlertRepository, NewAlert};
pub use client_dataset::{ClientDatasetRepository, DatasetSummary};
pub use drift_check::DriftCheckRepository;
pub use ml_model::{MlModelRepository, NewModel};
pub use model_version::{ModelVersionRepository, NewModelVersion};
pub use retraining_job::{JobOutcome, NewRetrainingJob, RetrainingJobRepository};
