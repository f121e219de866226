// src/feedback_log.rs

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::models::{ChunkId, QualityEvaluation, RatingRow, mean};

/// Aggregate judge statistics over a time window of the durable log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JudgeLogStats {
    pub total_evaluations: u64,
    pub average_quality: f64,
    pub min_quality: f64,
    pub max_quality: f64,
    pub average_evaluation_secs: f64,
    pub quality_distribution: BTreeMap<String, u64>,
    pub trigger_distribution: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkFeedback {
    pub avg_rating: f64,
    pub rating_count: u64,
}

/// Append-only durable record of ratings and judge evaluations.
///
/// Callers treat every error as soft: log it and continue on in-memory state.
#[async_trait]
pub trait FeedbackLog: Send + Sync {
    async fn append_rating(&self, row: &RatingRow) -> Result<()>;

    async fn append_evaluation(&self, evaluation: &QualityEvaluation) -> Result<()>;

    /// Ratings created after `since`, oldest first.
    async fn ratings_since(&self, since: DateTime<Utc>) -> Result<Vec<RatingRow>>;

    /// Up to `limit` evaluations created after `since`, newest first.
    async fn evaluations_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QualityEvaluation>>;

    async fn judge_statistics(&self, since: DateTime<Utc>) -> Result<JudgeLogStats>;

    async fn chunk_feedback(&self, chunk_id: &ChunkId) -> Result<ChunkFeedback>;
}

/// Process-local log, used in tests and when the database is unreachable.
#[derive(Default)]
pub struct MemoryFeedbackLog {
    ratings: RwLock<Vec<RatingRow>>,
    evaluations: RwLock<Vec<QualityEvaluation>>,
}

impl MemoryFeedbackLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn rating_count(&self) -> usize {
        self.ratings.read().await.len()
    }

    pub async fn evaluation_count(&self) -> usize {
        self.evaluations.read().await.len()
    }
}

#[async_trait]
impl FeedbackLog for MemoryFeedbackLog {
    async fn append_rating(&self, row: &RatingRow) -> Result<()> {
        self.ratings.write().await.push(row.clone());
        Ok(())
    }

    async fn append_evaluation(&self, evaluation: &QualityEvaluation) -> Result<()> {
        self.evaluations.write().await.push(evaluation.clone());
        Ok(())
    }

    async fn ratings_since(&self, since: DateTime<Utc>) -> Result<Vec<RatingRow>> {
        let mut rows: Vec<RatingRow> = self
            .ratings
            .read()
            .await
            .iter()
            .filter(|r| r.created_at > since)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.created_at);
        Ok(rows)
    }

    async fn evaluations_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QualityEvaluation>> {
        let mut rows: Vec<QualityEvaluation> = self
            .evaluations
            .read()
            .await
            .iter()
            .filter(|e| e.created_at > since)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn judge_statistics(&self, since: DateTime<Utc>) -> Result<JudgeLogStats> {
        let evaluations = self.evaluations.read().await;
        let window: Vec<&QualityEvaluation> =
            evaluations.iter().filter(|e| e.created_at > since).collect();
        if window.is_empty() {
            return Ok(JudgeLogStats::default());
        }

        let scores: Vec<f64> = window.iter().map(|e| e.mean_score).collect();
        let secs: Vec<f64> = window.iter().map(|e| e.evaluation_secs).collect();
        let mut stats = JudgeLogStats {
            total_evaluations: window.len() as u64,
            average_quality: mean(&scores).unwrap_or(0.0),
            min_quality: scores.iter().cloned().fold(f64::INFINITY, f64::min),
            max_quality: scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            average_evaluation_secs: mean(&secs).unwrap_or(0.0),
            ..JudgeLogStats::default()
        };
        for evaluation in window {
            *stats
                .quality_distribution
                .entry(evaluation.label.as_str().to_string())
                .or_default() += 1;
            *stats
                .trigger_distribution
                .entry(evaluation.trigger.as_str().to_string())
                .or_default() += 1;
        }
        Ok(stats)
    }

    async fn chunk_feedback(&self, chunk_id: &ChunkId) -> Result<ChunkFeedback> {
        let ratings: Vec<f64> = self
            .ratings
            .read()
            .await
            .iter()
            .filter(|r| &r.chunk_id == chunk_id)
            .map(|r| f64::from(r.rating))
            .collect();
        Ok(ChunkFeedback {
            avg_rating: mean(&ratings).unwrap_or(0.0),
            rating_count: ratings.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, QualityLabel, TriggerDecision};

    fn evaluation(mean_score: f64, label: QualityLabel, trigger: TriggerDecision) -> QualityEvaluation {
        QualityEvaluation {
            mean_score,
            label,
            trigger,
            evaluation_secs: 0.5,
            ..QualityEvaluation::no_results("q")
        }
    }

    #[tokio::test]
    async fn judge_statistics_aggregate_window() {
        let log = MemoryFeedbackLog::new();
        log.append_evaluation(&evaluation(4.5, QualityLabel::Excellent, TriggerDecision::None))
            .await
            .unwrap();
        log.append_evaluation(&evaluation(1.5, QualityLabel::Poor, TriggerDecision::Immediate))
            .await
            .unwrap();

        let stats = log
            .judge_statistics(Utc::now() - chrono::Duration::days(7))
            .await
            .unwrap();
        assert_eq!(stats.total_evaluations, 2);
        assert_eq!(stats.average_quality, 3.0);
        assert_eq!(stats.min_quality, 1.5);
        assert_eq!(stats.max_quality, 4.5);
        assert_eq!(stats.quality_distribution.get("poor"), Some(&1));
        assert_eq!(stats.trigger_distribution.get("immediate"), Some(&1));
    }

    #[tokio::test]
    async fn chunk_feedback_averages_ratings() {
        let log = MemoryFeedbackLog::new();
        let chunk = Chunk::new("vid", 10.0, 15.0, "text");
        for rating in [5, 3, 4] {
            log.append_rating(&RatingRow::new("q", &chunk, rating, None))
                .await
                .unwrap();
        }
        let feedback = log.chunk_feedback(&chunk.id()).await.unwrap();
        assert_eq!(feedback.rating_count, 3);
        assert_eq!(feedback.avg_rating, 4.0);

        let other = log.chunk_feedback(&ChunkId::new("vid", 99.0)).await.unwrap();
        assert_eq!(other, ChunkFeedback::default());
    }
}
