//! # Data Models
//!
//! SeaORM entities for the model lifecycle tables.

pub mod alert;
pub mod client_dataset;
pub mod drift_check;
pub mod feature_snapshot;
pub mod ml_model;
pub mod model_version;
pub mod retraining_job;

pub use alert::Entity as Alert;
pub use client_dataset::Entity as ClientDataset;
pub use drift_check::Entity as DriftCheck;
pub use feature_snapshot::Entity as FeatureSnapshot;
pub use ml_model::Entity as MlModel;
pub use model_version::Entity as ModelVersion;
pub use retraining_job::Entity as RetrainingJob;
