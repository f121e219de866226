// tests/common/mod.rs
#![allow(dead_code)]

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use reranker_lib::embedding::EmbeddingModel;
use reranker_lib::errors::ExternalError;
use reranker_lib::feedback_log::{ChunkFeedback, FeedbackLog, JudgeLogStats};
use reranker_lib::judge::ScoringOracle;
use reranker_lib::scheduler::{FineTuneOutcome, FineTuner, TrainingExample};
use reranker_lib::{Chunk, ChunkId, QualityEvaluation, RatingRow};

/// Oracle that replays canned responses in order, then reports itself down.
pub struct ScriptedOracle {
    responses: Mutex<VecDeque<String>>,
    pub calls: AtomicUsize,
}

impl ScriptedOracle {
    pub fn new(responses: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.iter().map(|r| r.to_string()).collect()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn down() -> Arc<Self> {
        Self::new(&[])
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScoringOracle for ScriptedOracle {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn score(&self, _prompt: &str, _timeout: Duration) -> Result<String, ExternalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.responses.lock().unwrap().pop_front();
        next.ok_or_else(|| ExternalError::unavailable("scoring oracle", "connection refused"))
    }
}

const VOCABULARY: [&str; 5] = ["rust", "tokio", "async", "pasta", "sauce"];

/// Bag-of-words embedding over a tiny fixed vocabulary.
pub struct KeywordEmbedding {
    id: String,
}

impl KeywordEmbedding {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self { id: id.to_string() })
    }
}

#[async_trait]
impl EmbeddingModel for KeywordEmbedding {
    fn model_id(&self) -> &str {
        &self.id
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ExternalError> {
        Ok(texts
            .iter()
            .map(|text| {
                let lowered = text.to_lowercase();
                VOCABULARY
                    .iter()
                    .map(|word| lowered.split_whitespace().filter(|w| w == word).count() as f32)
                    .collect()
            })
            .collect())
    }
}

pub struct UnreachableEmbedding;

#[async_trait]
impl EmbeddingModel for UnreachableEmbedding {
    fn model_id(&self) -> &str {
        "unreachable"
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ExternalError> {
        Err(ExternalError::unavailable("embedding model", "connection refused"))
    }
}

/// Fine-tuner that always produces a candidate with a fixed eval score.
pub struct FixedScoreTuner {
    pub eval_score: f64,
    pub calls: AtomicUsize,
}

impl FixedScoreTuner {
    pub fn new(eval_score: f64) -> Arc<Self> {
        Arc::new(Self {
            eval_score,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FineTuner for FixedScoreTuner {
    async fn fine_tune(
        &self,
        _base: Arc<dyn EmbeddingModel>,
        _train: &[TrainingExample],
        _eval: &[TrainingExample],
        output_path: &Path,
    ) -> Result<FineTuneOutcome, ExternalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(FineTuneOutcome {
            model: KeywordEmbedding::new(&output_path.display().to_string()),
            eval_score: self.eval_score,
        })
    }
}

/// Durable log whose backend is permanently down.
pub struct BrokenLog;

#[async_trait]
impl FeedbackLog for BrokenLog {
    async fn append_rating(&self, _row: &RatingRow) -> Result<()> {
        Err(anyhow!("connection refused"))
    }

    async fn append_evaluation(&self, _evaluation: &QualityEvaluation) -> Result<()> {
        Err(anyhow!("connection refused"))
    }

    async fn ratings_since(&self, _since: DateTime<Utc>) -> Result<Vec<RatingRow>> {
        Err(anyhow!("connection refused"))
    }

    async fn evaluations_since(
        &self,
        _since: DateTime<Utc>,
        _limit: usize,
    ) -> Result<Vec<QualityEvaluation>> {
        Err(anyhow!("connection refused"))
    }

    async fn judge_statistics(&self, _since: DateTime<Utc>) -> Result<JudgeLogStats> {
        Err(anyhow!("connection refused"))
    }

    async fn chunk_feedback(&self, _chunk_id: &ChunkId) -> Result<ChunkFeedback> {
        Err(anyhow!("connection refused"))
    }
}

pub fn chunk(video_id: &str, start: f64, text: &str) -> Chunk {
    Chunk::new(video_id, start, start + 5.0, text)
}

/// `n` distinct chunks with filler text.
pub fn chunks(n: usize) -> Vec<Chunk> {
    (0..n)
        .map(|i| chunk("vid", i as f64 * 5.0, &format!("filler text number {}", i)))
        .collect()
}
