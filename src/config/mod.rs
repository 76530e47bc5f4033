//! Configuration loading for the lifecycle monitor.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `LIFECYCLE_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, path::PathBuf, str::FromStr, time::Duration};

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const ENV_PREFIX: &str = "LIFECYCLE_";

/// Application configuration derived from `LIFECYCLE_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    /// Root of the exported baselines, production samples and holdout manifests
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub drift: DriftConfig,
    #[serde(default)]
    pub retraining: RetrainingConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub feature_store: FeatureStoreConfig,
    #[serde(default)]
    pub persistence_retry: PersistenceRetryConfig,
}

/// How PSI bucket edges are derived from the baseline sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BinningStrategy {
    /// Baseline quantiles, so every bucket holds roughly the same share of the baseline
    #[default]
    Quantile,
    /// Equal-width buckets between the baseline minimum and maximum
    EqualWidth,
}

impl FromStr for BinningStrategy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "quantile" | "deciles" => Ok(Self::Quantile),
            "equal_width" | "equal-width" => Ok(Self::EqualWidth),
            other => Err(ConfigError::InvalidBinningStrategy {
                value: other.to_string(),
            }),
        }
    }
}

/// How per-feature PSI values collapse into the single score stored on a drift check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PsiAggregation {
    #[default]
    Max,
    Mean,
}

impl FromStr for PsiAggregation {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "max" => Ok(Self::Max),
            "mean" => Ok(Self::Mean),
            other => Err(ConfigError::InvalidPsiAggregation {
                value: other.to_string(),
            }),
        }
    }
}

/// Drift detection thresholds and binning parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct DriftConfig {
    /// Aggregated PSI above which drift is reported (default: 0.1)
    ///
    /// Environment variable: `LIFECYCLE_DRIFT_PSI_THRESHOLD`
    #[serde(default = "default_psi_threshold")]
    pub psi_threshold: f64,

    /// Jensen-Shannon divergence above which drift is reported (default: 0.2)
    ///
    /// Environment variable: `LIFECYCLE_DRIFT_JS_THRESHOLD`
    #[serde(default = "default_js_threshold")]
    pub js_threshold: f64,

    /// Minimum production items required before a check is recorded (default: 100)
    #[serde(default = "default_min_sample_size")]
    pub min_sample_size: u64,

    /// Trailing production window in hours (default: 24)
    #[serde(default = "default_window_hours")]
    pub window_hours: u32,

    /// Replacement proportion for empty buckets (default: 1e-4)
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,

    #[serde(default = "default_bin_count")]
    pub bin_count: usize,

    #[serde(default)]
    pub binning: BinningStrategy,

    #[serde(default)]
    pub aggregation: PsiAggregation,
}

impl DriftConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.window_hours))
    }

    /// Validate drift configuration bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.psi_threshold.is_finite() && self.psi_threshold > 0.0) {
            return Err(ConfigError::InvalidPsiThreshold {
                value: self.psi_threshold,
            });
        }

        // JS divergence in nats is bounded by ln 2
        if !(self.js_threshold > 0.0 && self.js_threshold < std::f64::consts::LN_2) {
            return Err(ConfigError::InvalidJsThreshold {
                value: self.js_threshold,
            });
        }

        if self.min_sample_size == 0 {
            return Err(ConfigError::InvalidMinSampleSize {
                value: self.min_sample_size,
            });
        }

        if self.window_hours == 0 || self.window_hours > 24 * 7 {
            return Err(ConfigError::InvalidDriftWindow {
                value: self.window_hours,
            });
        }

        if !(self.epsilon > 0.0 && self.epsilon < 0.01) {
            return Err(ConfigError::InvalidEpsilon {
                value: self.epsilon,
            });
        }

        if self.bin_count < 2 || self.bin_count > 100 {
            return Err(ConfigError::InvalidBinCount {
                value: self.bin_count,
            });
        }

        Ok(())
    }
}

/// Retraining gate, dataset thresholds and job limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RetrainingConfig {
    /// Accuracy delta below which a candidate is rejected (default: -0.05)
    ///
    /// Environment variable: `LIFECYCLE_RETRAINING_ROLLBACK_THRESHOLD`
    #[serde(default = "default_rollback_threshold")]
    pub rollback_threshold: f64,

    /// Minimum rows accumulated across active client datasets (default: 500)
    #[serde(default = "default_min_dataset_rows")]
    pub min_dataset_rows: i64,

    /// Minimum row-weighted mean label confidence (default: 0.7)
    #[serde(default = "default_min_dataset_confidence")]
    pub min_dataset_confidence: f64,

    /// Upper bound on a single trainer call (default: 3600)
    #[serde(default = "default_max_job_duration_seconds")]
    pub max_job_duration_seconds: u64,

    /// Age after which a queued or running job is force-failed (default: 21600)
    #[serde(default = "default_stale_job_timeout_seconds")]
    pub stale_job_timeout_seconds: u64,

    /// Days after promotion during which live regressions trigger rollback (default: 7)
    #[serde(default = "default_rollback_window_days")]
    pub rollback_window_days: u32,

    /// Concurrent trainer invocations allowed by the default limiter (default: 1)
    #[serde(default = "default_compute_slots")]
    pub compute_slots: usize,
}

impl RetrainingConfig {
    pub fn max_job_duration(&self) -> Duration {
        Duration::from_secs(self.max_job_duration_seconds)
    }

    pub fn stale_job_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_job_timeout_seconds as i64)
    }

    pub fn rollback_window(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.rollback_window_days))
    }

    /// Validate retraining configuration bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(-1.0..=0.0).contains(&self.rollback_threshold) {
            return Err(ConfigError::InvalidRollbackThreshold {
                value: self.rollback_threshold,
            });
        }

        if self.min_dataset_rows < 0 {
            return Err(ConfigError::InvalidMinDatasetRows {
                value: self.min_dataset_rows,
            });
        }

        if !(0.0..=1.0).contains(&self.min_dataset_confidence) {
            return Err(ConfigError::InvalidMinDatasetConfidence {
                value: self.min_dataset_confidence,
            });
        }

        if self.max_job_duration_seconds < 60 {
            return Err(ConfigError::InvalidMaxJobDuration {
                value: self.max_job_duration_seconds,
            });
        }

        // A job must be allowed to finish before reconciliation may reap it
        if self.stale_job_timeout_seconds <= self.max_job_duration_seconds {
            return Err(ConfigError::InvalidStaleJobTimeout {
                value: self.stale_job_timeout_seconds,
                max_job_duration: self.max_job_duration_seconds,
            });
        }

        if self.rollback_window_days == 0 || self.rollback_window_days > 90 {
            return Err(ConfigError::InvalidRollbackWindow {
                value: self.rollback_window_days,
            });
        }

        if self.compute_slots == 0 || self.compute_slots > 64 {
            return Err(ConfigError::InvalidComputeSlots {
                value: self.compute_slots,
            });
        }

        Ok(())
    }
}

/// Daily scheduler configuration parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SchedulerConfig {
    /// UTC wall-clock time of the daily cycle, `HH:MM` (default: 23:00)
    #[serde(default = "default_run_at_utc")]
    pub run_at_utc: String,

    /// Models processed concurrently within one cycle (default: 4)
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
}

impl SchedulerConfig {
    /// Parsed daily fire time.
    pub fn run_at(&self) -> Result<NaiveTime, ConfigError> {
        NaiveTime::parse_from_str(self.run_at_utc.trim(), "%H:%M").map_err(|_| {
            ConfigError::InvalidSchedulerRunAt {
                value: self.run_at_utc.clone(),
            }
        })
    }

    /// Validate scheduler configuration bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.run_at()?;

        if self.worker_pool_size == 0 || self.worker_pool_size > 64 {
            return Err(ConfigError::InvalidWorkerPoolSize {
                value: self.worker_pool_size,
            });
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct FeatureStoreConfig {
    /// Transformer sets kept in memory (default: 64)
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl FeatureStoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_capacity == 0 {
            return Err(ConfigError::InvalidCacheCapacity {
                value: self.cache_capacity,
            });
        }
        Ok(())
    }
}

/// Backoff policy for writes at the job boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct PersistenceRetryConfig {
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Random factor applied to each delay: delay * (1 +/- jitter_factor)
    #[serde(default = "default_retry_jitter_factor")]
    pub jitter_factor: f64,
}

impl PersistenceRetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 || self.max_attempts > 10 {
            return Err(ConfigError::InvalidRetryAttempts {
                value: self.max_attempts,
            });
        }

        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::InvalidRetryBounds {
                base: self.base_delay_ms,
                max: self.max_delay_ms,
            });
        }

        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::InvalidRetryJitter {
                value: self.jitter_factor,
            });
        }

        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            data_dir: default_data_dir(),
            drift: DriftConfig::default(),
            retraining: RetrainingConfig::default(),
            scheduler: SchedulerConfig::default(),
            feature_store: FeatureStoreConfig::default(),
            persistence_retry: PersistenceRetryConfig::default(),
        }
    }
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            psi_threshold: default_psi_threshold(),
            js_threshold: default_js_threshold(),
            min_sample_size: default_min_sample_size(),
            window_hours: default_window_hours(),
            epsilon: default_epsilon(),
            bin_count: default_bin_count(),
            binning: BinningStrategy::default(),
            aggregation: PsiAggregation::default(),
        }
    }
}

impl Default for RetrainingConfig {
    fn default() -> Self {
        Self {
            rollback_threshold: default_rollback_threshold(),
            min_dataset_rows: default_min_dataset_rows(),
            min_dataset_confidence: default_min_dataset_confidence(),
            max_job_duration_seconds: default_max_job_duration_seconds(),
            stale_job_timeout_seconds: default_stale_job_timeout_seconds(),
            rollback_window_days: default_rollback_window_days(),
            compute_slots: default_compute_slots(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            run_at_utc: default_run_at_utc(),
            worker_pool_size: default_worker_pool_size(),
        }
    }
}

impl Default for FeatureStoreConfig {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl Default for PersistenceRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            base_delay_ms: default_retry_base_delay_ms(),
            max_delay_ms: default_retry_max_delay_ms(),
            jitter_factor: default_retry_jitter_factor(),
        }
    }
}

impl AppConfig {
    /// Returns a redacted JSON representation (database credentials are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        config.database_url = redact_database_url(&config.database_url);
        serde_json::to_string_pretty(&config)
    }

    /// Validates every configuration section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::MissingDatabaseUrl);
        }

        if self.db_max_connections == 0 {
            return Err(ConfigError::InvalidDbMaxConnections {
                value: self.db_max_connections,
            });
        }

        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }

        self.drift.validate()?;
        self.retraining.validate()?;
        self.scheduler.validate()?;
        self.feature_store.validate()?;
        self.persistence_retry.validate()?;

        Ok(())
    }
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) if url.password().is_some() => {
            if url.set_password(Some("[REDACTED]")).is_err() {
                return "[REDACTED]".to_string();
            }
            url.to_string()
        }
        Ok(_) => raw.to_string(),
        // Unparseable URLs may still embed credentials
        Err(_) => "[REDACTED]".to_string(),
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://lifecycle.db?mode=rwc".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_psi_threshold() -> f64 {
    0.1
}

fn default_js_threshold() -> f64 {
    0.2
}

fn default_min_sample_size() -> u64 {
    100
}

fn default_window_hours() -> u32 {
    24
}

fn default_epsilon() -> f64 {
    1e-4
}

fn default_bin_count() -> usize {
    10
}

fn default_rollback_threshold() -> f64 {
    -0.05
}

fn default_min_dataset_rows() -> i64 {
    500
}

fn default_min_dataset_confidence() -> f64 {
    0.7
}

fn default_max_job_duration_seconds() -> u64 {
    3600 // 1 hour
}

fn default_stale_job_timeout_seconds() -> u64 {
    21600 // 6 hours
}

fn default_rollback_window_days() -> u32 {
    7
}

fn default_compute_slots() -> usize {
    1
}

fn default_run_at_utc() -> String {
    "23:00".to_string()
}

fn default_worker_pool_size() -> usize {
    4
}

fn default_cache_capacity() -> usize {
    64
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    100
}

fn default_retry_max_delay_ms() -> u64 {
    2000
}

fn default_retry_jitter_factor() -> f64 {
    0.2
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("database url is missing; set LIFECYCLE_DATABASE_URL")]
    MissingDatabaseUrl,
    #[error("database max connections must be positive, got {value}")]
    InvalidDbMaxConnections { value: u32 },
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("psi threshold must be a positive number, got {value}")]
    InvalidPsiThreshold { value: f64 },
    #[error("js threshold must be between 0 and ln 2, got {value}")]
    InvalidJsThreshold { value: f64 },
    #[error("minimum sample size must be positive, got {value}")]
    InvalidMinSampleSize { value: u64 },
    #[error("drift window must be between 1 and 168 hours, got {value}")]
    InvalidDriftWindow { value: u32 },
    #[error("psi epsilon must be in (0, 0.01), got {value}")]
    InvalidEpsilon { value: f64 },
    #[error("psi bin count must be between 2 and 100, got {value}")]
    InvalidBinCount { value: usize },
    #[error("unknown binning strategy '{value}'; expected quantile or equal_width")]
    InvalidBinningStrategy { value: String },
    #[error("unknown psi aggregation '{value}'; expected max or mean")]
    InvalidPsiAggregation { value: String },
    #[error("rollback threshold must be between -1.0 and 0.0, got {value}")]
    InvalidRollbackThreshold { value: f64 },
    #[error("minimum dataset rows cannot be negative, got {value}")]
    InvalidMinDatasetRows { value: i64 },
    #[error("minimum dataset confidence must be between 0.0 and 1.0, got {value}")]
    InvalidMinDatasetConfidence { value: f64 },
    #[error("max job duration must be at least 60 seconds, got {value}")]
    InvalidMaxJobDuration { value: u64 },
    #[error(
        "stale job timeout ({value}s) must exceed the max job duration ({max_job_duration}s)"
    )]
    InvalidStaleJobTimeout { value: u64, max_job_duration: u64 },
    #[error("rollback window must be between 1 and 90 days, got {value}")]
    InvalidRollbackWindow { value: u32 },
    #[error("compute slots must be between 1 and 64, got {value}")]
    InvalidComputeSlots { value: usize },
    #[error("scheduler run time must be HH:MM in UTC, got '{value}'")]
    InvalidSchedulerRunAt { value: String },
    #[error("scheduler worker pool size must be between 1 and 64, got {value}")]
    InvalidWorkerPoolSize { value: usize },
    #[error("feature store cache capacity must be positive, got {value}")]
    InvalidCacheCapacity { value: usize },
    #[error("persistence retry attempts must be between 1 and 10, got {value}")]
    InvalidRetryAttempts { value: u32 },
    #[error("persistence retry base delay ({base}ms) cannot exceed max delay ({max}ms)")]
    InvalidRetryBounds { base: u64, max: u64 },
    #[error("persistence retry jitter factor must be between 0.0 and 1.0, got {value}")]
    InvalidRetryJitter { value: f64 },
}

/// Loads configuration using layered `.env` files and `LIFECYCLE_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads and validates configuration; process environment wins over files.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = layered
            .remove("PROFILE")
            .filter(|v| !v.is_empty())
            .unwrap_or(profile_hint);

        let log_level = take_string(&mut layered, "LOG_LEVEL", default_log_level);
        let log_format = take_string(&mut layered, "LOG_FORMAT", default_log_format);
        let database_url = take_string(&mut layered, "DATABASE_URL", default_database_url);
        let db_max_connections =
            take_parsed(&mut layered, "DB_MAX_CONNECTIONS", default_db_max_connections);
        let db_acquire_timeout_ms = take_parsed(
            &mut layered,
            "DB_ACQUIRE_TIMEOUT_MS",
            default_db_acquire_timeout_ms,
        );
        let data_dir = layered
            .remove("DATA_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        let binning = match layered.remove("DRIFT_BINNING") {
            Some(value) if !value.trim().is_empty() => value.parse()?,
            _ => BinningStrategy::default(),
        };
        let aggregation = match layered.remove("DRIFT_AGGREGATION") {
            Some(value) if !value.trim().is_empty() => value.parse()?,
            _ => PsiAggregation::default(),
        };

        let drift = DriftConfig {
            psi_threshold: take_parsed(&mut layered, "DRIFT_PSI_THRESHOLD", default_psi_threshold),
            js_threshold: take_parsed(&mut layered, "DRIFT_JS_THRESHOLD", default_js_threshold),
            min_sample_size: take_parsed(
                &mut layered,
                "DRIFT_MIN_SAMPLE_SIZE",
                default_min_sample_size,
            ),
            window_hours: take_parsed(&mut layered, "DRIFT_WINDOW_HOURS", default_window_hours),
            epsilon: take_parsed(&mut layered, "DRIFT_EPSILON", default_epsilon),
            bin_count: take_parsed(&mut layered, "DRIFT_BIN_COUNT", default_bin_count),
            binning,
            aggregation,
        };

        let retraining = RetrainingConfig {
            rollback_threshold: take_parsed(
                &mut layered,
                "RETRAINING_ROLLBACK_THRESHOLD",
                default_rollback_threshold,
            ),
            min_dataset_rows: take_parsed(
                &mut layered,
                "RETRAINING_MIN_DATASET_ROWS",
                default_min_dataset_rows,
            ),
            min_dataset_confidence: take_parsed(
                &mut layered,
                "RETRAINING_MIN_DATASET_CONFIDENCE",
                default_min_dataset_confidence,
            ),
            max_job_duration_seconds: take_parsed(
                &mut layered,
                "RETRAINING_MAX_JOB_DURATION_SECONDS",
                default_max_job_duration_seconds,
            ),
            stale_job_timeout_seconds: take_parsed(
                &mut layered,
                "RETRAINING_STALE_JOB_TIMEOUT_SECONDS",
                default_stale_job_timeout_seconds,
            ),
            rollback_window_days: take_parsed(
                &mut layered,
                "RETRAINING_ROLLBACK_WINDOW_DAYS",
                default_rollback_window_days,
            ),
            compute_slots: take_parsed(
                &mut layered,
                "RETRAINING_COMPUTE_SLOTS",
                default_compute_slots,
            ),
        };

        let scheduler = SchedulerConfig {
            run_at_utc: take_string(&mut layered, "SCHEDULER_RUN_AT_UTC", default_run_at_utc),
            worker_pool_size: take_parsed(
                &mut layered,
                "SCHEDULER_WORKER_POOL_SIZE",
                default_worker_pool_size,
            ),
        };

        let feature_store = FeatureStoreConfig {
            cache_capacity: take_parsed(
                &mut layered,
                "FEATURE_STORE_CACHE_CAPACITY",
                default_cache_capacity,
            ),
        };

        let persistence_retry = PersistenceRetryConfig {
            max_attempts: take_parsed(
                &mut layered,
                "PERSISTENCE_RETRY_MAX_ATTEMPTS",
                default_retry_max_attempts,
            ),
            base_delay_ms: take_parsed(
                &mut layered,
                "PERSISTENCE_RETRY_BASE_DELAY_MS",
                default_retry_base_delay_ms,
            ),
            max_delay_ms: take_parsed(
                &mut layered,
                "PERSISTENCE_RETRY_MAX_DELAY_MS",
                default_retry_max_delay_ms,
            ),
            jitter_factor: take_parsed(
                &mut layered,
                "PERSISTENCE_RETRY_JITTER_FACTOR",
                default_retry_jitter_factor,
            ),
        };

        let config = AppConfig {
            profile,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            data_dir,
            drift,
            retraining,
            scheduler,
            feature_store,
            persistence_retry,
        };

        config.validate()?;

        Ok(config)
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn take_string(
    layered: &mut BTreeMap<String, String>,
    key: &str,
    default: fn() -> String,
) -> String {
    layered
        .remove(key)
        .filter(|v| !v.is_empty())
        .unwrap_or_else(default)
}

// Unparseable values fall back to the default; bounds are enforced by validate().
fn take_parsed<T: FromStr>(
    layered: &mut BTreeMap<String, String>,
    key: &str,
    default: fn() -> T,
) -> T {
    layered
        .remove(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or_else(default)
}
