// src/reinforcement/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::{Chunk, ChunkId, FeatureSnapshot, RewardRecord};

/// Whether a chunk's selection score carried an exploration bonus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionType {
    Explore,
    Exploit,
}

impl SelectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionType::Explore => "explore",
            SelectionType::Exploit => "exploit",
        }
    }
}

/// A candidate after bandit reranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedChunk {
    pub chunk: Chunk,
    pub bandit_score: f64,
    pub selection: SelectionType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestChunk {
    pub chunk_id: ChunkId,
    pub mean_reward: f64,
    pub samples: usize,
}

/// Read-only view of bandit performance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanditStats {
    pub total_interactions: u64,
    pub chunks_learned: usize,
    /// `None` until the first rating arrives.
    pub avg_recent_reward: Option<f64>,
    pub current_epsilon: f64,
    /// Share of per-chunk selections that were exploratory.
    pub exploration_rate: f64,
    pub exploitation_rate: f64,
    pub best_chunks: Vec<BestChunk>,
    pub queries_learned: usize,
}

/// Outcome of one `update_reward` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RewardUpdate {
    pub reward: f64,
    /// Score of the chunk for this query after the update.
    pub updated_score: f64,
    pub epsilon: f64,
}

/// Persisted bandit state. Round-trips losslessly through JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanditSnapshot {
    pub epsilon: f64,
    pub chunk_rewards: HashMap<ChunkId, Vec<RewardRecord>>,
    pub chunk_counts: HashMap<ChunkId, u64>,
    pub chunk_features: HashMap<ChunkId, FeatureSnapshot>,
    pub query_chunk_rewards: HashMap<String, HashMap<ChunkId, Vec<RewardRecord>>>,
    pub total_interactions: u64,
    pub exploration_count: u64,
    pub exploitation_count: u64,
    pub recent_rewards: Vec<f64>,
    pub timestamp: DateTime<Utc>,
}
