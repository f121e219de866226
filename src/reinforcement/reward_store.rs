// src/reinforcement/reward_store.rs
use log::debug;
use std::collections::{BTreeMap, HashMap};

use crate::models::{ChunkId, FeatureSnapshot, RewardRecord, mean};

use super::types::BestChunk;

#[derive(Debug, Clone, Default)]
struct QueryRewards {
    chunks: HashMap<ChunkId, Vec<RewardRecord>>,
    last_touched: u64,
}

/// Append-only reward observations, kept globally per chunk and per query.
///
/// Query tables are bounded: past `max_tracked_queries` the least recently
/// touched query is evicted. Global per-chunk lists are never evicted.
#[derive(Debug, Clone)]
pub struct RewardStore {
    chunk_rewards: HashMap<ChunkId, Vec<RewardRecord>>,
    chunk_counts: HashMap<ChunkId, u64>,
    chunk_features: HashMap<ChunkId, FeatureSnapshot>,
    query_rewards: HashMap<String, QueryRewards>,
    /// Last-touched tick to query, oldest first. Mirrors `query_rewards`.
    recency: BTreeMap<u64, String>,
    max_tracked_queries: usize,
    clock: u64,
}

impl RewardStore {
    pub fn new(max_tracked_queries: usize) -> Self {
        Self {
            chunk_rewards: HashMap::new(),
            chunk_counts: HashMap::new(),
            chunk_features: HashMap::new(),
            query_rewards: HashMap::new(),
            recency: BTreeMap::new(),
            max_tracked_queries: max_tracked_queries.max(1),
            clock: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Appends `record` to the global list and the query-scoped list of its chunk.
    pub fn append(&mut self, query: &str, record: RewardRecord) {
        let chunk_id = record.chunk_id.clone();
        if let Some(features) = &record.features {
            self.chunk_features.insert(chunk_id.clone(), features.clone());
        }
        *self.chunk_counts.entry(chunk_id.clone()).or_default() += 1;
        self.chunk_rewards
            .entry(chunk_id.clone())
            .or_default()
            .push(record.clone());

        let now = self.tick();
        let table = self.query_rewards.entry(query.to_string()).or_default();
        let previous = std::mem::replace(&mut table.last_touched, now);
        table.chunks.entry(chunk_id).or_default().push(record);
        self.recency.remove(&previous);
        self.recency.insert(now, query.to_string());
        self.evict_if_needed();
    }

    /// Marks `query` as recently used, if it is tracked.
    pub fn touch_query(&mut self, query: &str) {
        let now = self.tick();
        if let Some(table) = self.query_rewards.get_mut(query) {
            let previous = std::mem::replace(&mut table.last_touched, now);
            self.recency.remove(&previous);
            self.recency.insert(now, query.to_string());
        }
    }

    fn evict_if_needed(&mut self) {
        while self.query_rewards.len() > self.max_tracked_queries {
            match self.recency.pop_first() {
                Some((_, query)) => {
                    debug!("Evicting least recently used query table: {:?}", query);
                    self.query_rewards.remove(&query);
                }
                None => break,
            }
        }
    }

    pub fn query_rewards(&self, query: &str, chunk_id: &ChunkId) -> &[RewardRecord] {
        self.query_rewards
            .get(query)
            .and_then(|table| table.chunks.get(chunk_id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn global_rewards(&self, chunk_id: &ChunkId) -> &[RewardRecord] {
        self.chunk_rewards
            .get(chunk_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Mean of the query-scoped rewards when at least `min_samples` exist.
    pub fn query_mean(&self, query: &str, chunk_id: &ChunkId, min_samples: usize) -> Option<f64> {
        let records = self.query_rewards(query, chunk_id);
        if records.len() < min_samples.max(1) {
            return None;
        }
        mean(&records.iter().map(|r| r.reward).collect::<Vec<_>>())
    }

    pub fn global_mean(&self, chunk_id: &ChunkId) -> Option<f64> {
        mean(
            &self
                .global_rewards(chunk_id)
                .iter()
                .map(|r| r.reward)
                .collect::<Vec<_>>(),
        )
    }

    pub fn chunks_learned(&self) -> usize {
        self.chunk_rewards.len()
    }

    pub fn queries_learned(&self) -> usize {
        self.query_rewards.len()
    }

    pub fn features(&self, chunk_id: &ChunkId) -> Option<&FeatureSnapshot> {
        self.chunk_features.get(chunk_id)
    }

    /// Top `n` chunks by mean global reward among those with at least `min_samples`.
    pub fn best_chunks(&self, min_samples: usize, n: usize) -> Vec<BestChunk> {
        let mut best: Vec<BestChunk> = self
            .chunk_rewards
            .iter()
            .filter(|(_, rewards)| rewards.len() >= min_samples)
            .filter_map(|(chunk_id, rewards)| {
                let values: Vec<f64> = rewards.iter().map(|r| r.reward).collect();
                mean(&values).map(|mean_reward| BestChunk {
                    chunk_id: chunk_id.clone(),
                    mean_reward,
                    samples: rewards.len(),
                })
            })
            .collect();
        // Ties broken by id so the report is stable across runs.
        best.sort_by(|a, b| {
            b.mean_reward
                .total_cmp(&a.mean_reward)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        best.truncate(n);
        best
    }

    pub(crate) fn export(
        &self,
    ) -> (
        HashMap<ChunkId, Vec<RewardRecord>>,
        HashMap<ChunkId, u64>,
        HashMap<ChunkId, FeatureSnapshot>,
        HashMap<String, HashMap<ChunkId, Vec<RewardRecord>>>,
    ) {
        let queries = self
            .query_rewards
            .iter()
            .map(|(query, table)| (query.clone(), table.chunks.clone()))
            .collect();
        (
            self.chunk_rewards.clone(),
            self.chunk_counts.clone(),
            self.chunk_features.clone(),
            queries,
        )
    }

    pub(crate) fn import(
        max_tracked_queries: usize,
        chunk_rewards: HashMap<ChunkId, Vec<RewardRecord>>,
        chunk_counts: HashMap<ChunkId, u64>,
        chunk_features: HashMap<ChunkId, FeatureSnapshot>,
        query_chunk_rewards: HashMap<String, HashMap<ChunkId, Vec<RewardRecord>>>,
    ) -> Self {
        let mut store = Self::new(max_tracked_queries);
        store.chunk_rewards = chunk_rewards;
        store.chunk_counts = chunk_counts;
        store.chunk_features = chunk_features;
        for (query, chunks) in query_chunk_rewards {
            let last_touched = store.tick();
            store.recency.insert(last_touched, query.clone());
            store.query_rewards.insert(
                query,
                QueryRewards {
                    chunks,
                    last_touched,
                },
            );
        }
        store.evict_if_needed();
        store
    }
}
