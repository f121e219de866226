// src/models.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::config::{DEFAULT_RELEVANCE_PRIOR, EXCELLENT_THRESHOLD, FAIR_THRESHOLD, GOOD_THRESHOLD};

//------------------------------------------------------------------------------
// IDENTIFIER TYPES
//------------------------------------------------------------------------------

/// Stable identity of a transcript chunk, derived from (video id, start offset).
///
/// Two chunks with the same source item and start offset are the same entity
/// even if their text drifted between transcript fetches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(pub String);

impl ChunkId {
    pub fn new(video_id: &str, start_time: f64) -> Self {
        // -0.0 formats as "-0" but names the same offset as 0.0.
        let start_time = if start_time == 0.0 { 0.0 } else { start_time };
        ChunkId(format!("{}_{}", video_id, start_time))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

//------------------------------------------------------------------------------
// CHUNKS AND REWARDS
//------------------------------------------------------------------------------

/// A timestamped span of transcript text, the atomic retrieval unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub video_id: String,
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
    /// Relevance prior supplied by the embedding model (cosine similarity).
    pub relevance_score: Option<f64>,
}

impl Chunk {
    pub fn new(video_id: impl Into<String>, start_time: f64, end_time: f64, text: impl Into<String>) -> Self {
        Self {
            video_id: video_id.into(),
            start_time,
            end_time,
            text: text.into(),
            relevance_score: None,
        }
    }

    pub fn with_relevance(mut self, relevance_score: f64) -> Self {
        self.relevance_score = Some(relevance_score);
        self
    }

    pub fn id(&self) -> ChunkId {
        ChunkId::new(&self.video_id, self.start_time)
    }

    pub fn duration(&self) -> f64 {
        (self.end_time - self.start_time).max(0.0)
    }

    /// The externally supplied prior, or the neutral default for unscored chunks.
    pub fn prior(&self) -> f64 {
        self.relevance_score.unwrap_or(DEFAULT_RELEVANCE_PRIOR)
    }
}

/// Chunk features captured at rating time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    pub relevance_score: f64,
    pub text_length: usize,
    pub duration: f64,
    pub start_time: f64,
}

impl FeatureSnapshot {
    pub fn capture(chunk: &Chunk, relevance_override: Option<f64>) -> Self {
        Self {
            relevance_score: relevance_override.or(chunk.relevance_score).unwrap_or(0.0),
            text_length: chunk.text.chars().count(),
            duration: chunk.duration(),
            start_time: chunk.start_time,
        }
    }
}

/// One explicit rating converted to a reward in [0, 1]. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardRecord {
    pub chunk_id: ChunkId,
    pub reward: f64,
    pub features: Option<FeatureSnapshot>,
    pub recorded_at: DateTime<Utc>,
}

/// Converts a 1-5 star rating to a [0, 1] reward.
pub fn rating_to_reward(rating: u8) -> f64 {
    (f64::from(rating) - 1.0) / 4.0
}

/// A rating row as written to the durable feedback log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingRow {
    pub id: Uuid,
    pub query: String,
    pub chunk_id: ChunkId,
    pub video_id: String,
    pub start_time: f64,
    pub end_time: f64,
    pub chunk_text: String,
    pub relevance_score: Option<f64>,
    pub rating: u8,
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RatingRow {
    pub fn new(query: &str, chunk: &Chunk, rating: u8, session_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: query.to_string(),
            chunk_id: chunk.id(),
            video_id: chunk.video_id.clone(),
            start_time: chunk.start_time,
            end_time: chunk.end_time,
            chunk_text: chunk.text.clone(),
            relevance_score: chunk.relevance_score,
            rating,
            session_id,
            created_at: Utc::now(),
        }
    }
}

//------------------------------------------------------------------------------
// QUALITY EVALUATION
//------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLabel {
    Excellent, // >= 4.0
    Good,      // >= 3.5
    Fair,      // >= 2.5
    Poor,      // < 2.5
    /// Heuristic fallback, the scoring oracle was not consulted successfully.
    Error,
    NoResults,
}

impl QualityLabel {
    pub fn from_mean_score(mean: f64) -> Self {
        match mean {
            m if m >= EXCELLENT_THRESHOLD => QualityLabel::Excellent,
            m if m >= GOOD_THRESHOLD => QualityLabel::Good,
            m if m >= FAIR_THRESHOLD => QualityLabel::Fair,
            _ => QualityLabel::Poor,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityLabel::Excellent => "excellent",
            QualityLabel::Good => "good",
            QualityLabel::Fair => "fair",
            QualityLabel::Poor => "poor",
            QualityLabel::Error => "error",
            QualityLabel::NoResults => "no_results",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "excellent" => Some(QualityLabel::Excellent),
            "good" => Some(QualityLabel::Good),
            "fair" => Some(QualityLabel::Fair),
            "poor" => Some(QualityLabel::Poor),
            "error" => Some(QualityLabel::Error),
            "no_results" => Some(QualityLabel::NoResults),
            _ => None,
        }
    }

    /// Whether the label came from a real oracle score.
    pub fn is_genuine(&self) -> bool {
        !matches!(self, QualityLabel::Error | QualityLabel::NoResults)
    }
}

/// The judge's recommendation on whether and when to retrain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerDecision {
    None,
    Monitor,
    Scheduled,
    Immediate,
}

impl TriggerDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerDecision::None => "none",
            TriggerDecision::Monitor => "monitor",
            TriggerDecision::Scheduled => "scheduled",
            TriggerDecision::Immediate => "immediate",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "none" => Some(TriggerDecision::None),
            "monitor" => Some(TriggerDecision::Monitor),
            "scheduled" => Some(TriggerDecision::Scheduled),
            "immediate" => Some(TriggerDecision::Immediate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTrend {
    Improving,
    Declining,
    Stable,
    InsufficientData,
}

impl QualityTrend {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTrend::Improving => "improving",
            QualityTrend::Declining => "declining",
            QualityTrend::Stable => "stable",
            QualityTrend::InsufficientData => "insufficient_data",
        }
    }
}

/// Outcome of judging one ranked result list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityEvaluation {
    pub id: Uuid,
    pub query: String,
    /// Source item of the top result, if any.
    pub video_id: Option<String>,
    pub scores: Vec<u8>,
    pub mean_score: f64,
    pub label: QualityLabel,
    pub trigger: TriggerDecision,
    pub evaluation_secs: f64,
    pub oracle_model: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl QualityEvaluation {
    pub fn no_results(query: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: query.to_string(),
            video_id: None,
            scores: Vec::new(),
            mean_score: 0.0,
            label: QualityLabel::NoResults,
            trigger: TriggerDecision::None,
            evaluation_secs: 0.0,
            oracle_model: None,
            created_at: Utc::now(),
        }
    }
}

/// Mean of a slice, `None` when empty.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}
