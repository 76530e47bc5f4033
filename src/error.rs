//! # Error Handling
//!
//! Unified error taxonomy for the lifecycle monitor. Statistical outcomes such as
//! degradation are results, not errors; everything here is something a caller
//! must act on.

use sea_orm::DbErr;
use thiserror::Error;
use uuid::Uuid;

use crate::collaborators::data::DataError;
use crate::collaborators::limiter::LimiterError;
use crate::collaborators::trainer::TrainerError;
use crate::feature_store::TransformError;

/// Top-level error for lifecycle operations
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Sample too small to score; nothing is recorded and the day stays retryable
    #[error("insufficient data for {model_key}: {items_analyzed} items analyzed, {required} required")]
    InsufficientData {
        model_key: String,
        items_analyzed: u64,
        required: u64,
    },

    #[error("a retraining job is already in flight for {model_key}")]
    ConcurrencyConflict { model_key: String },

    #[error("training failed: {0}")]
    Training(#[from] TrainerError),

    #[error("compute slot unavailable: {0}")]
    Resource(#[from] LimiterError),

    #[error("persistence failure while trying to {context}: {source}")]
    Persistence {
        context: &'static str,
        #[source]
        source: DbErr,
    },

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("conflict: {message}")]
    Conflict { message: String },

    #[error("data source error: {0}")]
    DataSource(#[from] DataError),

    #[error("job {job_id} is no longer running")]
    StaleJob { job_id: Uuid },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("feature transform error: {0}")]
    Transform(#[from] TransformError),
}

impl LifecycleError {
    /// Wrap a database error with the operation that produced it.
    pub fn persistence(context: &'static str, source: DbErr) -> Self {
        tracing::error!(error = ?source, context, "Database operation failed");
        Self::Persistence { context, source }
    }

    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            key: key.into(),
        }
    }

    /// Stable code for logs and metrics labels
    pub fn code(&self) -> &'static str {
        match self {
            LifecycleError::InsufficientData { .. } => "INSUFFICIENT_DATA",
            LifecycleError::ConcurrencyConflict { .. } => "CONCURRENCY_CONFLICT",
            LifecycleError::Training(_) => "TRAINING_ERROR",
            LifecycleError::Resource(_) => "RESOURCE_UNAVAILABLE",
            LifecycleError::Persistence { .. } => "PERSISTENCE_ERROR",
            LifecycleError::NotFound { .. } => "NOT_FOUND",
            LifecycleError::Conflict { .. } => "CONFLICT",
            LifecycleError::DataSource(_) => "DATA_SOURCE_ERROR",
            LifecycleError::StaleJob { .. } => "STALE_JOB",
            LifecycleError::Serialization(_) => "SERIALIZATION_ERROR",
            LifecycleError::Transform(_) => "TRANSFORM_ERROR",
        }
    }
}

/// Detects unique-constraint violations across Postgres and SQLite.
pub fn is_unique_violation(error: &DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    if let Some(code) = db_error.code() {
        let code_str = code.as_ref();
        if code_str == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code_str) {
            return true;
        }
    }

    false
}

/// Transient failures worth retrying at the job boundary
pub fn is_transient(error: &DbErr) -> bool {
    match error {
        DbErr::Conn(_) | DbErr::ConnectionAcquire(_) => true,
        DbErr::Exec(_) | DbErr::Query(_) => !is_unique_violation(error),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = LifecycleError::ConcurrencyConflict {
            model_key: "fraud".to_string(),
        };
        assert_eq!(err.code(), "CONCURRENCY_CONFLICT");

        let err = LifecycleError::Training(TrainerError::Failed("diverged".to_string()));
        assert_eq!(err.code(), "TRAINING_ERROR");
        assert_eq!(err.to_string(), "training failed: trainer failed: diverged");
    }

    #[test]
    fn test_insufficient_data_message() {
        let err = LifecycleError::InsufficientData {
            model_key: "churn".to_string(),
            items_analyzed: 12,
            required: 100,
        };
        assert_eq!(
            err.to_string(),
            "insufficient data for churn: 12 items analyzed, 100 required"
        );
    }

    #[test]
    fn test_non_sqlx_errors_are_not_unique_violations() {
        let err = DbErr::RecordNotFound("job".to_string());
        assert!(!is_unique_violation(&err));
        assert!(!is_transient(&err));

        let err = DbErr::Custom("boom".to_string());
        assert!(!is_transient(&err));
    }
}
