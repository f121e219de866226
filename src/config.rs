// src/config.rs

use log::{info, warn};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

// Bandit scoring
pub const DEFAULT_RELEVANCE_PRIOR: f64 = 0.5;
pub const QUERY_SCOPED_MIN_SAMPLES: usize = 2;
pub const EXPLORATION_BONUS_MAX: f64 = 0.5;

// Adaptive epsilon
pub const RECENT_REWARDS_CAP: usize = 50;
pub const ADAPTIVE_WINDOW: usize = 10;
pub const ADAPTIVE_MARGIN: f64 = 0.1;
pub const ADAPTIVE_SHRINK_FACTOR: f64 = 0.9;
pub const ADAPTIVE_GROW_FACTOR: f64 = 1.1;

// Performance stats
pub const BEST_CHUNK_MIN_SAMPLES: usize = 3;
pub const BEST_CHUNKS_REPORTED: usize = 5;

// Quality judge
pub const JUDGE_MAX_RESULTS: usize = 5;
pub const JUDGE_SNIPPET_CHARS: usize = 200;
pub const NEUTRAL_SCORE: u8 = 3;
pub const QUALITY_HISTORY_WINDOW: usize = 20;
pub const TREND_WINDOW: usize = 5;
pub const IMMEDIATE_SCORE_THRESHOLD: f64 = 2.0;
pub const DECLINE_MARGIN: f64 = 0.5;
pub const TREND_LABEL_MARGIN: f64 = 0.2;

// Quality label thresholds (mean judge score)
pub const EXCELLENT_THRESHOLD: f64 = 4.0;
pub const GOOD_THRESHOLD: f64 = 3.5;
pub const FAIR_THRESHOLD: f64 = 2.5;

// Training set construction
pub const MIN_EVAL_EXAMPLES: usize = 10;
pub const EVAL_FRACTION_DIVISOR: usize = 5;

// Scheduler loop
pub const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct BanditConfig {
    pub initial_epsilon: f64,
    pub decay_rate: f64,
    pub min_epsilon: f64,
    /// Ceiling for adaptive rebounds.
    pub max_epsilon: f64,
    pub max_tracked_queries: usize,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            initial_epsilon: 0.1,
            decay_rate: 0.995,
            min_epsilon: 0.05,
            max_epsilon: 0.3,
            max_tracked_queries: 10_000,
        }
    }
}

#[derive(Clone, Debug)]
pub struct OracleConfig {
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "gemma:2b".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Debug)]
pub struct JudgeConfig {
    /// Recent mean below this triggers immediate retraining.
    pub fine_tuning_threshold: f64,
    pub oracle_timeout: Duration,
    /// How far back startup seeding reads evaluations from the durable log.
    pub history_lookback: chrono::Duration,
    pub stats_lookback: chrono::Duration,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            fine_tuning_threshold: 2.5,
            oracle_timeout: Duration::from_secs(30),
            history_lookback: chrono::Duration::hours(24),
            stats_lookback: chrono::Duration::days(7),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// How often the loop wakes up to check whether a cycle is due.
    pub check_interval: Duration,
    /// Retraining cadence.
    pub retrain_interval: Duration,
    pub min_training_samples: usize,
    /// Candidate eval score must exceed this to be deployed.
    pub improvement_threshold: f64,
    pub fine_tune_timeout: Duration,
    pub collection_window: chrono::Duration,
    pub failure_backoff_base: Duration,
    pub failure_backoff_max: Duration,
    pub models_dir: PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            retrain_interval: Duration::from_secs(120),
            min_training_samples: 5,
            improvement_threshold: 0.001,
            fine_tune_timeout: Duration::from_secs(30 * 60),
            collection_window: chrono::Duration::days(7),
            failure_backoff_base: Duration::from_secs(60),
            failure_backoff_max: Duration::from_secs(60 * 60),
            models_dir: PathBuf::from("./models"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
    pub connect_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5432,
            dbname: "reranker".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            max_connections: 16,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ModelServiceConfig {
    /// Model-serving endpoint used for embeddings and fine-tuning.
    pub base_url: String,
    pub base_model: String,
    pub request_timeout: Duration,
}

impl Default for ModelServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            base_model: "all-MiniLM-L6-v2".to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RerankerConfig {
    pub bandit: BanditConfig,
    pub judge: JudgeConfig,
    pub oracle: OracleConfig,
    pub scheduler: SchedulerConfig,
    pub database: DatabaseConfig,
    pub model_service: ModelServiceConfig,
    pub snapshot_path: PathBuf,
    pub embed_timeout: Duration,
    pub default_top_k: usize,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            bandit: BanditConfig::default(),
            judge: JudgeConfig::default(),
            oracle: OracleConfig::default(),
            scheduler: SchedulerConfig::default(),
            database: DatabaseConfig::default(),
            model_service: ModelServiceConfig::default(),
            snapshot_path: PathBuf::from("bandit_state.json"),
            embed_timeout: Duration::from_secs(5),
            default_top_k: 10,
        }
    }
}

/// Reads `key` from the environment, falling back to `default` when unset or unparseable.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring unparseable value for {}: {:?}", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}

fn env_secs(key: &str, default: Duration) -> Duration {
    Duration::from_secs(env_or(key, default.as_secs()))
}

fn env_check_interval(key: &str, default: Duration) -> Duration {
    let interval = env_secs(key, default);
    if interval < MIN_CHECK_INTERVAL {
        warn!(
            "{} of {:?} is below the minimum, using {:?}",
            key, interval, MIN_CHECK_INTERVAL
        );
        return MIN_CHECK_INTERVAL;
    }
    interval
}

impl RerankerConfig {
    /// Loads `.env` (if present) and overlays environment variables on the defaults.
    pub fn from_env() -> Self {
        match dotenv::dotenv() {
            Ok(path) => info!("Loaded environment variables from {}", path.display()),
            Err(_) => info!("No .env file found, using environment variables from system"),
        }

        let d = Self::default();

        let bandit = BanditConfig {
            initial_epsilon: env_or("BANDIT_EPSILON", d.bandit.initial_epsilon),
            decay_rate: env_or("BANDIT_DECAY_RATE", d.bandit.decay_rate),
            min_epsilon: env_or("BANDIT_MIN_EPSILON", d.bandit.min_epsilon),
            max_epsilon: env_or("BANDIT_MAX_EPSILON", d.bandit.max_epsilon),
            max_tracked_queries: env_or("BANDIT_MAX_TRACKED_QUERIES", d.bandit.max_tracked_queries),
        };

        let oracle = OracleConfig {
            base_url: env_or("JUDGE_OLLAMA_URL", d.oracle.base_url),
            model: env_or("JUDGE_MODEL", d.oracle.model),
            timeout: env_secs("JUDGE_TIMEOUT_SECS", d.oracle.timeout),
        };

        let judge = JudgeConfig {
            fine_tuning_threshold: env_or(
                "JUDGE_FINE_TUNING_THRESHOLD",
                d.judge.fine_tuning_threshold,
            ),
            oracle_timeout: oracle.timeout,
            history_lookback: chrono::Duration::hours(env_or("JUDGE_HISTORY_LOOKBACK_HOURS", 24)),
            stats_lookback: chrono::Duration::days(env_or("JUDGE_STATS_LOOKBACK_DAYS", 7)),
        };

        let scheduler = SchedulerConfig {
            check_interval: env_check_interval("RETRAIN_CHECK_INTERVAL_SECS", d.scheduler.check_interval),
            retrain_interval: env_secs("RETRAIN_INTERVAL_SECS", d.scheduler.retrain_interval),
            min_training_samples: env_or(
                "RETRAIN_MIN_SAMPLES",
                d.scheduler.min_training_samples,
            ),
            improvement_threshold: env_or(
                "RETRAIN_IMPROVEMENT_THRESHOLD",
                d.scheduler.improvement_threshold,
            ),
            fine_tune_timeout: env_secs("FINE_TUNE_TIMEOUT_SECS", d.scheduler.fine_tune_timeout),
            collection_window: chrono::Duration::days(env_or("RETRAIN_WINDOW_DAYS", 7)),
            failure_backoff_base: env_secs(
                "RETRAIN_BACKOFF_BASE_SECS",
                d.scheduler.failure_backoff_base,
            ),
            failure_backoff_max: env_secs(
                "RETRAIN_BACKOFF_MAX_SECS",
                d.scheduler.failure_backoff_max,
            ),
            models_dir: PathBuf::from(env_or(
                "MODELS_DIR",
                d.scheduler.models_dir.display().to_string(),
            )),
        };

        let database = DatabaseConfig {
            host: env_or("POSTGRES_HOST", d.database.host),
            port: env_or("POSTGRES_PORT", d.database.port),
            dbname: env_or("POSTGRES_DB", d.database.dbname),
            user: env_or("POSTGRES_USER", d.database.user),
            password: env_or("POSTGRES_PASSWORD", d.database.password),
            max_connections: env_or("POSTGRES_MAX_CONNECTIONS", d.database.max_connections),
            connect_timeout: env_secs("POSTGRES_CONNECT_TIMEOUT_SECS", d.database.connect_timeout),
        };

        let model_service = ModelServiceConfig {
            base_url: env_or("MODEL_SERVICE_URL", d.model_service.base_url),
            base_model: env_or("BASE_EMBEDDING_MODEL", d.model_service.base_model),
            request_timeout: env_secs(
                "MODEL_SERVICE_TIMEOUT_SECS",
                d.model_service.request_timeout,
            ),
        };

        Self {
            bandit,
            judge,
            oracle,
            scheduler,
            database,
            model_service,
            snapshot_path: PathBuf::from(env_or(
                "BANDIT_SNAPSHOT_PATH",
                d.snapshot_path.display().to_string(),
            )),
            embed_timeout: env_secs("EMBED_TIMEOUT_SECS", d.embed_timeout),
            default_top_k: env_or("DEFAULT_TOP_K", d.default_top_k),
        }
    }
}
