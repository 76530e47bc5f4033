//! Database connection and pool management.
//!
//! Initializes the SeaORM pool with a retrying connect and provides the
//! backoff helper used for writes at the retraining job boundary.

use std::future::Future;

use anyhow::{Context, Result};
use rand::Rng;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr};
use std::time::Duration;
use tokio::time::sleep;

use crate::config::{AppConfig, PersistenceRetryConfig};
use crate::error::is_transient;

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {source}")]
    ConnectionFailed {
        #[from]
        source: sea_orm::DbErr,
    },
    #[error("Database connection timeout after {timeout_ms}ms")]
    ConnectionTimeout { timeout_ms: u64 },
    #[error("Invalid database configuration: {message}")]
    InvalidConfiguration { message: String },
}

/// Initializes a database connection pool with the given configuration.
///
/// Retries transient connect failures with exponential backoff.
///
/// ```no_run
/// use lifecycle::{config::AppConfig, db::init_pool};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = AppConfig::default();
///     let db = init_pool(&config).await?;
///     Ok(())
/// }
/// ```
pub async fn init_pool(cfg: &AppConfig) -> Result<DatabaseConnection> {
    if cfg.database_url.is_empty() {
        return Err(DatabaseError::InvalidConfiguration {
            message: "Database URL cannot be empty".to_string(),
        }
        .into());
    }

    let mut opt = ConnectOptions::new(&cfg.database_url);
    opt.max_connections(cfg.db_max_connections)
        .acquire_timeout(Duration::from_millis(cfg.db_acquire_timeout_ms))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let max_retries = 5;
    let mut retry_delay = Duration::from_millis(100);

    for attempt in 1..=max_retries {
        match Database::connect(opt.clone()).await {
            Ok(conn) => {
                log::info!("Successfully connected to database (attempt {})", attempt);
                return Ok(conn);
            }
            Err(e) => {
                if attempt == max_retries {
                    log::error!(
                        "Failed to connect to database after {} attempts: {}",
                        max_retries,
                        e
                    );
                    return Err(DatabaseError::ConnectionFailed { source: e }.into());
                }

                log::warn!(
                    "Database connection attempt {} failed: {}, retrying in {:?}",
                    attempt,
                    e,
                    retry_delay
                );

                sleep(retry_delay).await;
                retry_delay *= 2;
            }
        }
    }

    Err(DatabaseError::ConnectionTimeout {
        timeout_ms: cfg.db_acquire_timeout_ms,
    }
    .into())
}

/// Health check for the database connection.
pub async fn health_check(db: &DatabaseConnection) -> Result<()> {
    use sea_orm::Statement;

    let stmt = Statement::from_string(db.get_database_backend(), "SELECT 1".to_string());

    db.query_one(stmt)
        .await
        .context("Database health check failed")?;

    Ok(())
}

/// Run `operation` until it succeeds, fails permanently, or the attempt budget is spent.
///
/// Only transient errors are retried; unique violations and decoding errors
/// surface immediately.
pub async fn with_retry<T, F, Fut>(
    policy: &PersistenceRetryConfig,
    context: &'static str,
    mut operation: F,
) -> Result<T, DbErr>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DbErr>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_attempts && is_transient(&err) => {
                let delay = backoff_delay(policy, attempt, &mut rand::thread_rng());
                tracing::warn!(
                    error = %err,
                    context,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Transient persistence failure; retrying"
                );
                metrics::counter!("lifecycle_persistence_retries_total", "context" => context)
                    .increment(1);
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn backoff_delay<R: Rng + ?Sized>(
    policy: &PersistenceRetryConfig,
    attempt: u32,
    rng: &mut R,
) -> Duration {
    let exp = policy
        .base_delay_ms
        .saturating_mul(1u64 << attempt.saturating_sub(1).min(16));
    let capped = exp.min(policy.max_delay_ms) as f64;

    let jitter = policy.jitter_factor.clamp(0.0, 1.0);
    let factor = if jitter == 0.0 {
        1.0
    } else {
        rng.gen_range((1.0 - jitter)..=(1.0 + jitter))
    };

    Duration::from_millis((capped * factor).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> PersistenceRetryConfig {
        PersistenceRetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 4,
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn test_invalid_database_url() {
        let mut config = AppConfig::default();
        config.database_url = "".to_string();

        let rt = tokio::runtime::Runtime::new().unwrap();
        let result = rt.block_on(init_pool(&config));

        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err().downcast::<DatabaseError>(),
            Ok(DatabaseError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let policy = PersistenceRetryConfig {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 300,
            jitter_factor: 0.0,
        };

        assert_eq!(backoff_delay(&policy, 1, &mut rng), Duration::from_millis(100));
        assert_eq!(backoff_delay(&policy, 2, &mut rng), Duration::from_millis(200));
        assert_eq!(backoff_delay(&policy, 3, &mut rng), Duration::from_millis(300));
    }

    #[test]
    fn backoff_jitter_stays_in_bounds() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let policy = PersistenceRetryConfig {
            max_attempts: 5,
            base_delay_ms: 1000,
            max_delay_ms: 1000,
            jitter_factor: 0.2,
        };

        for _ in 0..100 {
            let delay = backoff_delay(&policy, 1, &mut rng).as_millis();
            assert!((800..=1200).contains(&delay));
        }
    }

    #[tokio::test]
    async fn retry_gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), DbErr> = with_retry(&policy(), "test write", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(DbErr::Conn(sea_orm::RuntimeErr::Internal(
                    "connection reset".to_string(),
                )))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_does_not_repeat_permanent_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), DbErr> = with_retry(&policy(), "test write", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(DbErr::RecordNotFound("job".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_returns_first_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&policy(), "test write", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(DbErr::Conn(sea_orm::RuntimeErr::Internal("reset".to_string())))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 1);
    }
}
