// src/db.rs

use anyhow::{Context, Result};
use async_trait::async_trait;
use bb8::Pool;
use bb8_postgres::PostgresConnectionManager;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_postgres::{Config, NoTls, Row as PgRow};

use crate::config::DatabaseConfig;
use crate::feedback_log::{ChunkFeedback, FeedbackLog, JudgeLogStats, MemoryFeedbackLog};
use crate::models::{ChunkId, QualityEvaluation, QualityLabel, RatingRow, TriggerDecision};

pub type PgPool = Pool<PostgresConnectionManager<NoTls>>;

/// Constructs a PostgreSQL config from the database section of the service config.
fn build_pg_config(db: &DatabaseConfig) -> Config {
    let mut config = Config::new();
    info!(
        "DB Config: Host={}, Port={}, DB={}, User={}",
        db.host, db.port, db.dbname, db.user
    );
    config
        .host(&db.host)
        .port(db.port)
        .dbname(&db.dbname)
        .user(&db.user)
        .password(&db.password);
    config.application_name("chunk_reranker");
    config.connect_timeout(db.connect_timeout);
    config
}

/// Initializes the database connection pool and verifies it with a test query.
pub async fn connect(db: &DatabaseConfig) -> Result<PgPool> {
    let config = build_pg_config(db);
    info!("Connecting to PostgreSQL database...");
    let manager = PostgresConnectionManager::new(config, NoTls);

    let pool = Pool::builder()
        .max_size(db.max_connections)
        .min_idle(Some(1))
        .idle_timeout(Some(Duration::from_secs(180)))
        .connection_timeout(db.connect_timeout)
        .build(manager)
        .await
        .context("Failed to build database connection pool")?;

    let conn = pool
        .get()
        .await
        .context("Failed to get test connection from pool")?;
    conn.query_one("SELECT 1", &[])
        .await
        .context("Test query 'SELECT 1' failed")?;
    drop(conn);
    info!("Database connection pool initialized successfully.");
    Ok(pool)
}

const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS chunk_ratings (
        id UUID PRIMARY KEY,
        query TEXT NOT NULL,
        chunk_id TEXT NOT NULL,
        video_id TEXT NOT NULL,
        chunk_start_time DOUBLE PRECISION NOT NULL,
        chunk_end_time DOUBLE PRECISION NOT NULL,
        chunk_text TEXT NOT NULL,
        relevance_score DOUBLE PRECISION,
        user_rating SMALLINT NOT NULL CHECK (user_rating >= 1 AND user_rating <= 5),
        session_id TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
    CREATE INDEX IF NOT EXISTS idx_ratings_created_at ON chunk_ratings(created_at);
    CREATE INDEX IF NOT EXISTS idx_ratings_chunk ON chunk_ratings(chunk_id);
    CREATE INDEX IF NOT EXISTS idx_ratings_query ON chunk_ratings(query);

    CREATE TABLE IF NOT EXISTS judge_evaluations (
        id UUID PRIMARY KEY,
        query TEXT NOT NULL,
        video_id TEXT,
        scores JSONB NOT NULL,
        average_score DOUBLE PRECISION NOT NULL,
        quality_level TEXT NOT NULL,
        trigger_decision TEXT NOT NULL,
        evaluation_time DOUBLE PRECISION NOT NULL,
        llm_model TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
    CREATE INDEX IF NOT EXISTS idx_judge_evaluations_created_at ON judge_evaluations(created_at);
    CREATE INDEX IF NOT EXISTS idx_judge_evaluations_query ON judge_evaluations(query);
";

/// Creates the feedback tables if they do not exist yet.
pub async fn init_schema(pool: &PgPool) -> Result<()> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for init_schema")?;
    conn.batch_execute(SCHEMA_SQL)
        .await
        .context("Failed to create feedback log tables")?;
    info!("Feedback log schema is ready");
    Ok(())
}

/// Durable feedback log backed by PostgreSQL.
#[derive(Clone)]
pub struct PgFeedbackLog {
    pool: PgPool,
}

impl PgFeedbackLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Connects the durable log. When PostgreSQL is unreachable the service
/// keeps running on a process-local log.
pub async fn open_feedback_log(db: &DatabaseConfig) -> Arc<dyn FeedbackLog> {
    let pool = match connect(db).await {
        Ok(pool) => pool,
        Err(e) => {
            warn!(
                "Durable feedback log unavailable ({:#}), continuing with in-memory log only",
                e
            );
            return Arc::new(MemoryFeedbackLog::new());
        }
    };
    if let Err(e) = init_schema(&pool).await {
        warn!(
            "Could not prepare feedback log schema ({:#}), continuing with in-memory log only",
            e
        );
        return Arc::new(MemoryFeedbackLog::new());
    }
    Arc::new(PgFeedbackLog::new(pool))
}

fn rating_from_row(row: &PgRow) -> Result<RatingRow> {
    let rating: i16 = row.try_get("user_rating")?;
    Ok(RatingRow {
        id: row.try_get("id")?,
        query: row.try_get("query")?,
        chunk_id: ChunkId(row.try_get("chunk_id")?),
        video_id: row.try_get("video_id")?,
        start_time: row.try_get("chunk_start_time")?,
        end_time: row.try_get("chunk_end_time")?,
        chunk_text: row.try_get("chunk_text")?,
        relevance_score: row.try_get("relevance_score")?,
        rating: u8::try_from(rating).context("user_rating out of range")?,
        session_id: row.try_get("session_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn evaluation_from_row(row: &PgRow) -> Result<QualityEvaluation> {
    let scores_json: serde_json::Value = row.try_get("scores")?;
    let label: String = row.try_get("quality_level")?;
    let trigger: String = row.try_get("trigger_decision")?;
    Ok(QualityEvaluation {
        id: row.try_get("id")?,
        query: row.try_get("query")?,
        video_id: row.try_get("video_id")?,
        scores: serde_json::from_value(scores_json).context("Failed to decode judge scores")?,
        mean_score: row.try_get("average_score")?,
        label: QualityLabel::from_str(&label)
            .with_context(|| format!("Unknown quality level '{}'", label))?,
        trigger: TriggerDecision::from_str(&trigger)
            .with_context(|| format!("Unknown trigger decision '{}'", trigger))?,
        evaluation_secs: row.try_get("evaluation_time")?,
        oracle_model: row.try_get("llm_model")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl FeedbackLog for PgFeedbackLog {
    async fn append_rating(&self, row: &RatingRow) -> Result<()> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for append_rating")?;
        const INSERT_SQL: &str = "
            INSERT INTO chunk_ratings
            (id, query, chunk_id, video_id, chunk_start_time, chunk_end_time,
             chunk_text, relevance_score, user_rating, session_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)";
        conn.execute(
            INSERT_SQL,
            &[
                &row.id,
                &row.query,
                &row.chunk_id.as_str(),
                &row.video_id,
                &row.start_time,
                &row.end_time,
                &row.chunk_text,
                &row.relevance_score,
                &i16::from(row.rating),
                &row.session_id,
                &row.created_at,
            ],
        )
        .await
        .context("Failed to insert into chunk_ratings")?;
        debug!("Logged rating {} for chunk {}", row.rating, row.chunk_id);
        Ok(())
    }

    async fn append_evaluation(&self, evaluation: &QualityEvaluation) -> Result<()> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for append_evaluation")?;
        let scores_json = serde_json::to_value(&evaluation.scores)?;
        const INSERT_SQL: &str = "
            INSERT INTO judge_evaluations
            (id, query, video_id, scores, average_score, quality_level,
             trigger_decision, evaluation_time, llm_model, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)";
        conn.execute(
            INSERT_SQL,
            &[
                &evaluation.id,
                &evaluation.query,
                &evaluation.video_id,
                &scores_json,
                &evaluation.mean_score,
                &evaluation.label.as_str(),
                &evaluation.trigger.as_str(),
                &evaluation.evaluation_secs,
                &evaluation.oracle_model,
                &evaluation.created_at,
            ],
        )
        .await
        .context("Failed to insert into judge_evaluations")?;
        Ok(())
    }

    async fn ratings_since(&self, since: DateTime<Utc>) -> Result<Vec<RatingRow>> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for ratings_since")?;
        let rows = conn
            .query(
                "SELECT id, query, chunk_id, video_id, chunk_start_time, chunk_end_time,
                        chunk_text, relevance_score, user_rating, session_id, created_at
                 FROM chunk_ratings
                 WHERE created_at > $1
                 ORDER BY created_at ASC",
                &[&since],
            )
            .await
            .context("Failed to fetch recent chunk ratings")?;

        let mut ratings = Vec::with_capacity(rows.len());
        for row in &rows {
            match rating_from_row(row) {
                Ok(rating) => ratings.push(rating),
                Err(e) => warn!("Skipping undecodable chunk_ratings row: {:#}", e),
            }
        }
        Ok(ratings)
    }

    async fn evaluations_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QualityEvaluation>> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for evaluations_since")?;
        let rows = conn
            .query(
                "SELECT id, query, video_id, scores, average_score, quality_level,
                        trigger_decision, evaluation_time, llm_model, created_at
                 FROM judge_evaluations
                 WHERE created_at > $1
                 ORDER BY created_at DESC
                 LIMIT $2",
                &[&since, &(limit as i64)],
            )
            .await
            .context("Failed to fetch recent judge evaluations")?;

        let mut evaluations = Vec::with_capacity(rows.len());
        for row in &rows {
            match evaluation_from_row(row) {
                Ok(evaluation) => evaluations.push(evaluation),
                Err(e) => warn!("Skipping undecodable judge_evaluations row: {:#}", e),
            }
        }
        Ok(evaluations)
    }

    async fn judge_statistics(&self, since: DateTime<Utc>) -> Result<JudgeLogStats> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for judge_statistics")?;

        let summary = conn
            .query_one(
                "SELECT COUNT(*) AS total_evaluations,
                        AVG(average_score) AS avg_quality,
                        MIN(average_score) AS min_quality,
                        MAX(average_score) AS max_quality,
                        AVG(evaluation_time) AS avg_eval_time
                 FROM judge_evaluations
                 WHERE created_at > $1",
                &[&since],
            )
            .await
            .context("Failed to aggregate judge evaluations")?;

        let quality_rows = conn
            .query(
                "SELECT quality_level, COUNT(*) AS count
                 FROM judge_evaluations
                 WHERE created_at > $1
                 GROUP BY quality_level",
                &[&since],
            )
            .await
            .context("Failed to fetch quality distribution")?;

        let trigger_rows = conn
            .query(
                "SELECT trigger_decision, COUNT(*) AS count
                 FROM judge_evaluations
                 WHERE created_at > $1
                 GROUP BY trigger_decision",
                &[&since],
            )
            .await
            .context("Failed to fetch trigger distribution")?;

        let distribution = |rows: &[PgRow]| -> BTreeMap<String, u64> {
            rows.iter()
                .map(|row| {
                    let key: String = row.get(0);
                    let count: i64 = row.get(1);
                    (key, count.max(0) as u64)
                })
                .collect()
        };

        let total: i64 = summary.try_get("total_evaluations")?;
        let avg_quality: Option<f64> = summary.try_get("avg_quality")?;
        let min_quality: Option<f64> = summary.try_get("min_quality")?;
        let max_quality: Option<f64> = summary.try_get("max_quality")?;
        let avg_eval_time: Option<f64> = summary.try_get("avg_eval_time")?;

        Ok(JudgeLogStats {
            total_evaluations: total.max(0) as u64,
            average_quality: avg_quality.unwrap_or(0.0),
            min_quality: min_quality.unwrap_or(0.0),
            max_quality: max_quality.unwrap_or(0.0),
            average_evaluation_secs: avg_eval_time.unwrap_or(0.0),
            quality_distribution: distribution(&quality_rows),
            trigger_distribution: distribution(&trigger_rows),
        })
    }

    async fn chunk_feedback(&self, chunk_id: &ChunkId) -> Result<ChunkFeedback> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for chunk_feedback")?;
        let row = conn
            .query_one(
                "SELECT AVG(user_rating)::DOUBLE PRECISION AS avg_rating,
                        COUNT(*) AS rating_count
                 FROM chunk_ratings
                 WHERE chunk_id = $1",
                &[&chunk_id.as_str()],
            )
            .await
            .with_context(|| format!("Failed to fetch feedback for chunk {}", chunk_id))?;

        let avg_rating: Option<f64> = row.try_get("avg_rating")?;
        let rating_count: i64 = row.try_get("rating_count")?;
        Ok(ChunkFeedback {
            avg_rating: avg_rating.unwrap_or(0.0),
            rating_count: rating_count.max(0) as u64,
        })
    }
}
