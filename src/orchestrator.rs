// src/orchestrator.rs

use anyhow::Result;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RerankerConfig;
use crate::embedding::relevance_priors;
use crate::feedback_log::{ChunkFeedback, FeedbackLog};
use crate::judge::{QualityJudge, QualityStats};
use crate::models::{Chunk, ChunkId, QualityEvaluation, RatingRow, TriggerDecision};
use crate::registry::{ModelInfo, ModelRegistry};
use crate::reinforcement::{
    BanditReranker, BanditStats, RankedChunk, RewardUpdate, SelectionType, save_snapshot,
};
use crate::scheduler::{RetrainTrigger, WakeSource};
use crate::telemetry::{TelemetryEvent, TelemetrySink};

/// Result of one ranking request.
#[derive(Debug, Clone, Serialize)]
pub struct RankingResponse {
    pub results: Vec<RankedChunk>,
    pub evaluation: QualityEvaluation,
    /// Model version whose priors were used for this request.
    pub model_version: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemStats {
    pub bandit: BanditStats,
    pub judge: QualityStats,
    pub model: ModelInfo,
}

/// Request-path glue: embedding priors, bandit reranking, quality judging and
/// the retraining wake-up, plus rating intake.
pub struct RankingOrchestrator {
    bandit: Mutex<BanditReranker>,
    judge: Arc<QualityJudge>,
    registry: Arc<ModelRegistry>,
    log: Arc<dyn FeedbackLog>,
    telemetry: Arc<dyn TelemetrySink>,
    trigger: Option<RetrainTrigger>,
    embed_timeout: Duration,
    default_top_k: usize,
    snapshot_path: PathBuf,
}

impl RankingOrchestrator {
    pub fn new(
        bandit: BanditReranker,
        judge: Arc<QualityJudge>,
        registry: Arc<ModelRegistry>,
        log: Arc<dyn FeedbackLog>,
        telemetry: Arc<dyn TelemetrySink>,
        config: &RerankerConfig,
    ) -> Self {
        Self {
            bandit: Mutex::new(bandit),
            judge,
            registry,
            log,
            telemetry,
            trigger: None,
            embed_timeout: config.embed_timeout,
            default_top_k: config.default_top_k,
            snapshot_path: config.snapshot_path.clone(),
        }
    }

    /// Wires judge `immediate` decisions to the retraining scheduler.
    pub fn with_trigger(mut self, trigger: RetrainTrigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// Ranks `candidates` for `query` and judges the result.
    ///
    /// Embedding and oracle failures degrade to fallback values; this never fails.
    pub async fn rank(
        &self,
        query: &str,
        mut candidates: Vec<Chunk>,
        k: Option<usize>,
    ) -> RankingResponse {
        let k = k.unwrap_or(self.default_top_k);
        let model = self.registry.active();

        if !candidates.is_empty() {
            match relevance_priors(model.model.as_ref(), query, &candidates, self.embed_timeout).await
            {
                Ok(priors) => {
                    for (chunk, prior) in candidates.iter_mut().zip(priors) {
                        chunk.relevance_score = Some(prior);
                    }
                }
                Err(e) => warn!(
                    "Embedding priors unavailable for {:?} ({}), using supplied scores",
                    query, e
                ),
            }
        }

        let candidate_count = candidates.len();
        let (results, epsilon) = {
            let mut bandit = self.bandit.lock();
            let ranked = bandit.select_and_rank(candidates, query, k);
            (ranked, bandit.epsilon())
        };

        let explored = results
            .iter()
            .filter(|r| r.selection == SelectionType::Explore)
            .count();
        self.telemetry.emit(&TelemetryEvent::ChunksRanked {
            candidates: candidate_count,
            returned: results.len(),
            explored,
            exploited: results.len() - explored,
            epsilon,
        });

        let top_chunks: Vec<Chunk> = results.iter().map(|r| r.chunk.clone()).collect();
        let evaluation = self.judge.evaluate(query, &top_chunks).await;
        self.act_on_trigger(query, &evaluation);

        RankingResponse {
            results,
            evaluation,
            model_version: model.version,
        }
    }

    fn act_on_trigger(&self, query: &str, evaluation: &QualityEvaluation) {
        match evaluation.trigger {
            TriggerDecision::Immediate => match &self.trigger {
                Some(trigger) => {
                    info!(
                        "Quality {:.2} for {:?} requires immediate retraining",
                        evaluation.mean_score, query
                    );
                    trigger.request(WakeSource::Judge);
                }
                None => warn!("Immediate retraining requested but no scheduler is attached"),
            },
            TriggerDecision::Scheduled => info!(
                "Quality declining (latest {:.2}), retraining left to the regular schedule",
                evaluation.mean_score
            ),
            TriggerDecision::Monitor => debug!(
                "Quality {:.2} for {:?} below threshold, monitoring",
                evaluation.mean_score, query
            ),
            TriggerDecision::None => {}
        }
    }

    /// Applies a 1-5 star rating. Invalid ratings are rejected before any
    /// state changes; a failed durable-log write is only logged.
    pub async fn record_feedback(
        &self,
        chunk: &Chunk,
        query: &str,
        rating: u8,
        session_id: Option<String>,
    ) -> Result<RewardUpdate> {
        let (update, stats) = {
            let mut bandit = self.bandit.lock();
            let update = bandit.update_reward(chunk, query, rating, chunk.relevance_score)?;
            (update, bandit.performance_stats())
        };

        let row = RatingRow::new(query, chunk, rating, session_id);
        if let Err(e) = self.log.append_rating(&row).await {
            warn!("Could not save rating for {}: {:#}", row.chunk_id, e);
        }

        self.telemetry.emit(&TelemetryEvent::RatingRecorded {
            chunk_id: row.chunk_id.to_string(),
            rating,
            reward: update.reward,
            bandit_score: update.updated_score,
        });
        self.telemetry.emit(&TelemetryEvent::BanditSnapshot {
            total_interactions: stats.total_interactions,
            chunks_learned: stats.chunks_learned,
            queries_learned: stats.queries_learned,
            avg_recent_reward: stats.avg_recent_reward,
            epsilon: stats.current_epsilon,
        });
        Ok(update)
    }

    pub fn bandit_stats(&self) -> BanditStats {
        self.bandit.lock().performance_stats()
    }

    pub fn model_info(&self) -> ModelInfo {
        self.registry.info()
    }

    pub async fn stats(&self) -> SystemStats {
        SystemStats {
            bandit: self.bandit_stats(),
            judge: self.judge.quality_stats().await,
            model: self.model_info(),
        }
    }

    pub async fn chunk_feedback(&self, chunk_id: &ChunkId) -> Result<ChunkFeedback> {
        self.log.chunk_feedback(chunk_id).await
    }

    /// Persists a consistent snapshot of the bandit. The file write happens
    /// outside the bandit lock.
    pub fn save_bandit_state(&self) -> Result<()> {
        let snapshot = self.bandit.lock().snapshot();
        save_snapshot(&self.snapshot_path, &snapshot)
    }
}
