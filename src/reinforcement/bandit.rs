// src/reinforcement/bandit.rs
use anyhow::{Context, Result, bail};
use chrono::Utc;
use log::{debug, info, warn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use super::reward_store::RewardStore;
use super::types::{BanditSnapshot, BanditStats, RankedChunk, RewardUpdate, SelectionType};
use crate::config::{
    ADAPTIVE_GROW_FACTOR, ADAPTIVE_MARGIN, ADAPTIVE_SHRINK_FACTOR, ADAPTIVE_WINDOW, BanditConfig,
    BEST_CHUNK_MIN_SAMPLES, BEST_CHUNKS_REPORTED, EXPLORATION_BONUS_MAX, QUERY_SCOPED_MIN_SAMPLES,
    RECENT_REWARDS_CAP,
};
use crate::models::{Chunk, FeatureSnapshot, RewardRecord, mean, rating_to_reward};

/// Epsilon-greedy reranker over transcript chunks, learning from star ratings.
#[derive(Debug, Clone)]
pub struct BanditReranker {
    epsilon: f64,
    decay_rate: f64,
    min_epsilon: f64,
    max_epsilon: f64,
    max_tracked_queries: usize,
    store: RewardStore,
    recent_rewards: VecDeque<f64>,
    total_interactions: u64,
    exploration_count: u64,
    exploitation_count: u64,
    rng: ChaCha8Rng,
}

impl BanditReranker {
    pub fn new(config: &BanditConfig) -> Self {
        Self::with_rng(config, ChaCha8Rng::from_entropy())
    }

    /// Deterministic instance for reproducible rankings.
    pub fn with_seed(config: &BanditConfig, seed: u64) -> Self {
        Self::with_rng(config, ChaCha8Rng::seed_from_u64(seed))
    }

    fn with_rng(config: &BanditConfig, rng: ChaCha8Rng) -> Self {
        info!(
            "Epsilon-greedy bandit initialized (epsilon={}, decay={}, floor={})",
            config.initial_epsilon, config.decay_rate, config.min_epsilon
        );
        Self {
            epsilon: config.initial_epsilon,
            decay_rate: config.decay_rate,
            min_epsilon: config.min_epsilon,
            max_epsilon: config.max_epsilon,
            max_tracked_queries: config.max_tracked_queries,
            store: RewardStore::new(config.max_tracked_queries),
            recent_rewards: VecDeque::with_capacity(RECENT_REWARDS_CAP),
            total_interactions: 0,
            exploration_count: 0,
            exploitation_count: 0,
            rng,
        }
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn total_interactions(&self) -> u64 {
        self.total_interactions
    }

    /// Expected reward of `chunk` for `query`.
    ///
    /// Query-scoped mean once there are at least two samples for this query,
    /// then the global mean, then the chunk's relevance prior.
    pub fn score(&self, chunk: &Chunk, query: &str) -> f64 {
        let chunk_id = chunk.id();
        if let Some(query_mean) = self
            .store
            .query_mean(query, &chunk_id, QUERY_SCOPED_MIN_SAMPLES)
        {
            return query_mean;
        }
        if let Some(global_mean) = self.store.global_mean(&chunk_id) {
            return global_mean;
        }
        chunk.prior()
    }

    /// Scores every candidate, explores with probability epsilon, and returns
    /// the top `k` by final score. Decays epsilon once per non-empty call.
    pub fn select_and_rank(&mut self, chunks: Vec<Chunk>, query: &str, k: usize) -> Vec<RankedChunk> {
        if chunks.is_empty() {
            return Vec::new();
        }
        self.store.touch_query(query);

        let candidates = chunks.len();
        let mut explored = 0u64;
        let mut ranked: Vec<RankedChunk> = Vec::with_capacity(candidates);
        for chunk in chunks {
            let base_score = self.score(&chunk, query);
            let (bandit_score, selection) = if self.rng.r#gen::<f64>() < self.epsilon {
                let bonus = self.rng.gen_range(0.0..EXPLORATION_BONUS_MAX);
                explored += 1;
                (base_score + bonus, SelectionType::Explore)
            } else {
                (base_score, SelectionType::Exploit)
            };
            ranked.push(RankedChunk {
                chunk,
                bandit_score,
                selection,
            });
        }

        self.exploration_count += explored;
        self.exploitation_count += candidates as u64 - explored;

        // Vec::sort_by is stable: equal scores keep their input order.
        ranked.sort_by(|a, b| b.bandit_score.total_cmp(&a.bandit_score));
        ranked.truncate(k);

        self.decay_epsilon();

        debug!(
            "Ranked {} chunks for {:?} (epsilon={:.3}), explored {}, exploited {}",
            candidates,
            query,
            self.epsilon,
            explored,
            candidates as u64 - explored
        );
        ranked
    }

    fn decay_epsilon(&mut self) {
        self.epsilon = (self.epsilon * self.decay_rate).max(self.min_epsilon);
    }

    /// Records a 1-5 star rating for `chunk` under `query`.
    pub fn update_reward(
        &mut self,
        chunk: &Chunk,
        query: &str,
        rating: u8,
        relevance_score: Option<f64>,
    ) -> Result<RewardUpdate> {
        if !(1..=5).contains(&rating) {
            bail!("Rating must be between 1 and 5, got {}", rating);
        }

        let reward = rating_to_reward(rating);
        let record = RewardRecord {
            chunk_id: chunk.id(),
            reward,
            features: Some(FeatureSnapshot::capture(chunk, relevance_score)),
            recorded_at: Utc::now(),
        };
        self.store.append(query, record);

        self.recent_rewards.push_back(reward);
        while self.recent_rewards.len() > RECENT_REWARDS_CAP {
            self.recent_rewards.pop_front();
        }
        self.total_interactions += 1;

        let chunk_id = chunk.id();
        debug!(
            "Updated bandit: chunk {} got {} stars (reward={:.2}), chunk avg {:.3} over {} samples",
            chunk_id,
            rating,
            reward,
            self.store.global_mean(&chunk_id).unwrap_or(reward),
            self.store.global_rewards(&chunk_id).len()
        );

        self.adapt_epsilon();

        Ok(RewardUpdate {
            reward,
            updated_score: self.score(chunk, query),
            epsilon: self.epsilon,
        })
    }

    /// Couples exploration to the observed reward trend: the last
    /// `ADAPTIVE_WINDOW` rewards against the window before them.
    fn adapt_epsilon(&mut self) {
        let len = self.recent_rewards.len();
        if len < ADAPTIVE_WINDOW {
            return;
        }

        let rewards: Vec<f64> = self.recent_rewards.iter().copied().collect();
        let recent_avg = mean(&rewards[len - ADAPTIVE_WINDOW..]).unwrap_or(0.0);
        let older_avg = if len >= 2 * ADAPTIVE_WINDOW {
            mean(&rewards[len - 2 * ADAPTIVE_WINDOW..len - ADAPTIVE_WINDOW]).unwrap_or(recent_avg)
        } else {
            recent_avg
        };

        if recent_avg > older_avg + ADAPTIVE_MARGIN {
            self.epsilon = (self.epsilon * ADAPTIVE_SHRINK_FACTOR).max(self.min_epsilon);
            debug!("Rewards improving ({:.3} > {:.3}), epsilon -> {:.3}", recent_avg, older_avg, self.epsilon);
        } else if recent_avg < older_avg - ADAPTIVE_MARGIN {
            self.epsilon = (self.epsilon * ADAPTIVE_GROW_FACTOR).min(self.max_epsilon);
            debug!("Rewards declining ({:.3} < {:.3}), epsilon -> {:.3}", recent_avg, older_avg, self.epsilon);
        }
    }

    pub fn performance_stats(&self) -> BanditStats {
        let selections = self.exploration_count + self.exploitation_count;
        let exploration_rate = if selections == 0 {
            0.0
        } else {
            self.exploration_count as f64 / selections as f64
        };
        let recent: Vec<f64> = self.recent_rewards.iter().copied().collect();

        BanditStats {
            total_interactions: self.total_interactions,
            chunks_learned: self.store.chunks_learned(),
            avg_recent_reward: mean(&recent),
            current_epsilon: self.epsilon,
            exploration_rate,
            exploitation_rate: if selections == 0 { 0.0 } else { 1.0 - exploration_rate },
            best_chunks: self
                .store
                .best_chunks(BEST_CHUNK_MIN_SAMPLES, BEST_CHUNKS_REPORTED),
            queries_learned: self.store.queries_learned(),
        }
    }

    /// Point-in-time copy of all learned state.
    pub fn snapshot(&self) -> BanditSnapshot {
        let (chunk_rewards, chunk_counts, chunk_features, query_chunk_rewards) = self.store.export();
        BanditSnapshot {
            epsilon: self.epsilon,
            chunk_rewards,
            chunk_counts,
            chunk_features,
            query_chunk_rewards,
            total_interactions: self.total_interactions,
            exploration_count: self.exploration_count,
            exploitation_count: self.exploitation_count,
            recent_rewards: self.recent_rewards.iter().copied().collect(),
            timestamp: Utc::now(),
        }
    }

    /// Replaces learned state with `snapshot`. Hyperparameters stay as configured.
    pub fn restore(&mut self, snapshot: BanditSnapshot) {
        self.epsilon = snapshot.epsilon;
        self.store = RewardStore::import(
            self.max_tracked_queries,
            snapshot.chunk_rewards,
            snapshot.chunk_counts,
            snapshot.chunk_features,
            snapshot.query_chunk_rewards,
        );
        self.total_interactions = snapshot.total_interactions;
        self.exploration_count = snapshot.exploration_count;
        self.exploitation_count = snapshot.exploitation_count;
        let skip = snapshot.recent_rewards.len().saturating_sub(RECENT_REWARDS_CAP);
        self.recent_rewards = snapshot.recent_rewards.into_iter().skip(skip).collect();
    }

    pub fn save_state(&self, path: &Path) -> Result<()> {
        save_snapshot(path, &self.snapshot())
    }

    /// Loads state from `path`. Returns `Ok(false)` when no snapshot exists.
    pub fn load_state(&mut self, path: &Path) -> Result<bool> {
        match load_snapshot(path)? {
            Some(snapshot) => {
                self.restore(snapshot);
                info!(
                    "Bandit state loaded from {}: {} interactions, {} chunks learned, epsilon {:.3}",
                    path.display(),
                    self.total_interactions,
                    self.store.chunks_learned(),
                    self.epsilon
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Fresh bandit with the snapshot at `path` applied if it loads cleanly.
    /// A missing or corrupt snapshot is reported and ignored.
    pub fn load_or_new(config: &BanditConfig, path: &Path) -> Self {
        let mut bandit = Self::new(config);
        match bandit.load_state(path) {
            Ok(true) => {}
            Ok(false) => warn!("No saved bandit state found at {}", path.display()),
            Err(e) => {
                warn!(
                    "Could not load bandit state from {}: {:#}. Starting fresh.",
                    path.display(),
                    e
                );
                bandit = Self::new(config);
            }
        }
        bandit
    }
}

/// Writes `snapshot` as pretty JSON via a temp file renamed into place.
pub fn save_snapshot(path: &Path, snapshot: &BanditSnapshot) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot).context("Failed to serialize bandit state")?;
    let tmp_path = path.with_extension("json.tmp");
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    fs::write(&tmp_path, json)
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to move snapshot into {}", path.display()))?;
    info!(
        "Bandit state saved to {} ({} interactions)",
        path.display(),
        snapshot.total_interactions
    );
    Ok(())
}

/// Reads a snapshot; `Ok(None)` if the file does not exist.
pub fn load_snapshot(path: &Path) -> Result<Option<BanditSnapshot>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let snapshot = serde_json::from_str(&raw)
        .with_context(|| format!("Corrupt bandit snapshot at {}", path.display()))?;
    Ok(Some(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config(epsilon: f64) -> BanditConfig {
        BanditConfig {
            initial_epsilon: epsilon,
            min_epsilon: epsilon.min(0.05),
            ..BanditConfig::default()
        }
    }

    fn chunk(video: &str, start: f64, relevance: f64) -> Chunk {
        Chunk::new(video, start, start + 5.0, format!("{} at {}", video, start)).with_relevance(relevance)
    }

    #[test]
    fn empty_candidates_leave_state_untouched() {
        let mut bandit = BanditReranker::with_seed(&config(0.1), 7);
        let ranked = bandit.select_and_rank(Vec::new(), "anything", 5);
        assert!(ranked.is_empty());
        assert_eq!(bandit.epsilon(), 0.1);
        let stats = bandit.performance_stats();
        assert_eq!(stats.exploration_rate, 0.0);
        assert_eq!(stats.exploitation_rate, 0.0);
    }

    #[test]
    fn greedy_ranking_follows_priors_and_truncates() {
        let mut bandit = BanditReranker::with_seed(&config(0.0), 1);
        let chunks = vec![chunk("a", 0.0, 0.2), chunk("b", 0.0, 0.9), chunk("c", 0.0, 0.5)];
        let ranked = bandit.select_and_rank(chunks, "q", 2);

        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].chunk.video_id, "b");
        assert_eq!(ranked[1].chunk.video_id, "c");
        assert!(ranked.iter().all(|r| r.selection == SelectionType::Exploit));
    }

    #[test]
    fn equal_scores_keep_input_order() {
        let mut bandit = BanditReranker::with_seed(&config(0.0), 3);
        let chunks = vec![chunk("x", 0.0, 0.5), chunk("y", 0.0, 0.5), chunk("z", 0.0, 0.5)];
        let ranked = bandit.select_and_rank(chunks, "q", 10);
        let order: Vec<&str> = ranked.iter().map(|r| r.chunk.video_id.as_str()).collect();
        assert_eq!(order, vec!["x", "y", "z"]);
    }

    #[test]
    fn exploration_bonus_is_bounded() {
        let cfg = BanditConfig {
            initial_epsilon: 1.0,
            min_epsilon: 1.0,
            max_epsilon: 1.0,
            ..BanditConfig::default()
        };
        let mut bandit = BanditReranker::with_seed(&cfg, 11);
        let chunks: Vec<Chunk> = (0..20).map(|i| chunk("v", i as f64, 0.3)).collect();
        let ranked = bandit.select_and_rank(chunks, "q", 20);
        for r in &ranked {
            assert_eq!(r.selection, SelectionType::Explore);
            assert!(r.bandit_score >= 0.3 && r.bandit_score < 0.3 + EXPLORATION_BONUS_MAX);
        }
        assert_eq!(bandit.performance_stats().exploration_rate, 1.0);
    }

    #[test]
    fn epsilon_decays_to_floor() {
        let cfg = BanditConfig {
            initial_epsilon: 0.1,
            decay_rate: 0.5,
            min_epsilon: 0.05,
            ..BanditConfig::default()
        };
        let mut bandit = BanditReranker::with_seed(&cfg, 5);
        bandit.select_and_rank(vec![chunk("a", 0.0, 0.5)], "q", 1);
        assert!((bandit.epsilon() - 0.05).abs() < 1e-12);
        bandit.select_and_rank(vec![chunk("a", 0.0, 0.5)], "q", 1);
        assert!((bandit.epsilon() - 0.05).abs() < 1e-12);
    }

    #[test]
    fn score_falls_back_from_query_to_global_to_prior() {
        let mut bandit = BanditReranker::with_seed(&config(0.0), 2);
        let c = chunk("vid", 30.0, 0.4);
        assert_eq!(bandit.score(&c, "rust"), 0.4);

        bandit.update_reward(&c, "tokio", 5, None).unwrap();
        // One rating under another query: the global mean applies.
        assert_eq!(bandit.score(&c, "rust"), 1.0);

        bandit.update_reward(&c, "rust", 1, None).unwrap();
        // Still a single query-scoped sample, so global mean of [1.0, 0.0].
        assert_eq!(bandit.score(&c, "rust"), 0.5);

        let update = bandit.update_reward(&c, "rust", 2, None).unwrap();
        assert_eq!(update.reward, 0.25);
        assert_eq!(update.updated_score, 0.125);
    }

    #[test]
    fn out_of_range_rating_is_rejected_without_side_effects() {
        let mut bandit = BanditReranker::with_seed(&config(0.1), 2);
        let c = chunk("vid", 0.0, 0.4);
        assert!(bandit.update_reward(&c, "q", 0, None).is_err());
        assert!(bandit.update_reward(&c, "q", 6, None).is_err());
        assert_eq!(bandit.total_interactions(), 0);
        assert_eq!(bandit.score(&c, "q"), 0.4);
        assert_eq!(bandit.performance_stats().avg_recent_reward, None);
    }

    #[test]
    fn improving_rewards_shrink_epsilon() {
        let cfg = BanditConfig {
            initial_epsilon: 0.2,
            ..BanditConfig::default()
        };
        let mut bandit = BanditReranker::with_seed(&cfg, 9);
        let c = chunk("vid", 0.0, 0.5);
        for _ in 0..10 {
            bandit.update_reward(&c, "q", 1, None).unwrap();
        }
        assert_eq!(bandit.epsilon(), 0.2);
        for _ in 0..10 {
            bandit.update_reward(&c, "q", 5, None).unwrap();
        }
        assert!((bandit.epsilon() - 0.18).abs() < 1e-9);
    }

    #[test]
    fn declining_rewards_grow_epsilon_up_to_ceiling() {
        let cfg = BanditConfig {
            initial_epsilon: 0.29,
            ..BanditConfig::default()
        };
        let mut bandit = BanditReranker::with_seed(&cfg, 9);
        let c = chunk("vid", 0.0, 0.5);
        for _ in 0..10 {
            bandit.update_reward(&c, "q", 5, None).unwrap();
        }
        for _ in 0..10 {
            bandit.update_reward(&c, "q", 1, None).unwrap();
        }
        assert_eq!(bandit.epsilon(), 0.3);
    }

    #[test]
    fn recent_rewards_are_capped() {
        let mut bandit = BanditReranker::with_seed(&config(0.1), 4);
        let c = chunk("vid", 0.0, 0.5);
        for _ in 0..(RECENT_REWARDS_CAP + 15) {
            bandit.update_reward(&c, "q", 3, None).unwrap();
        }
        assert_eq!(bandit.snapshot().recent_rewards.len(), RECENT_REWARDS_CAP);
        assert_eq!(bandit.total_interactions(), (RECENT_REWARDS_CAP + 15) as u64);
    }

    #[test]
    fn state_survives_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bandit_state.json");

        let mut bandit = BanditReranker::with_seed(&config(0.1), 21);
        let a = chunk("a", 0.0, 0.3);
        let b = chunk("b", 12.5, 0.6);
        bandit.select_and_rank(vec![a.clone(), b.clone()], "q", 2);
        bandit.update_reward(&a, "q", 5, Some(0.3)).unwrap();
        bandit.update_reward(&a, "q", 4, None).unwrap();
        bandit.update_reward(&b, "other", 2, None).unwrap();
        bandit.save_state(&path).unwrap();

        let mut restored = BanditReranker::with_seed(&config(0.1), 99);
        assert!(restored.load_state(&path).unwrap());

        let before = bandit.snapshot();
        let mut after = restored.snapshot();
        after.timestamp = before.timestamp;
        assert_eq!(after, before);
        assert_eq!(after.total_interactions, 3);
        assert_eq!(restored.score(&a, "q"), bandit.score(&a, "q"));
        assert_eq!(restored.score(&b, "q"), bandit.score(&b, "q"));
    }

    #[test]
    fn decayed_epsilon_and_priors_reload_bit_for_bit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bandit_state.json");
        let config = BanditConfig {
            initial_epsilon: 0.3,
            decay_rate: 0.995,
            min_epsilon: 1e-6,
            ..BanditConfig::default()
        };

        let mut bandit = BanditReranker::with_seed(&config, 5);
        let priors = [0.1 + 0.2, 1.0 / 3.0, 2.0_f64.sqrt() / 7.0, 0.7 * 0.7];
        let chunks: Vec<Chunk> = priors
            .iter()
            .enumerate()
            .map(|(i, p)| chunk("awkward", i as f64 / 3.0, *p))
            .collect();
        for _ in 0..137 {
            bandit.select_and_rank(chunks.clone(), "q", 2);
        }
        for (i, c) in chunks.iter().enumerate() {
            bandit.update_reward(c, "q", (i % 5 + 1) as u8, c.relevance_score).unwrap();
        }
        bandit.save_state(&path).unwrap();

        let mut restored = BanditReranker::with_seed(&config, 6);
        assert!(restored.load_state(&path).unwrap());

        assert_eq!(restored.epsilon().to_bits(), bandit.epsilon().to_bits());
        let before = bandit.snapshot();
        let mut after = restored.snapshot();
        after.timestamp = before.timestamp;
        assert_eq!(after, before);
        for c in &chunks {
            assert_eq!(restored.score(c, "q").to_bits(), bandit.score(c, "q").to_bits());
            assert_eq!(
                restored.score(c, "unseen").to_bits(),
                bandit.score(c, "unseen").to_bits()
            );
        }
    }

    #[test]
    fn missing_or_corrupt_state_starts_fresh() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        let mut bandit = BanditReranker::with_seed(&config(0.1), 1);
        assert!(!bandit.load_state(&missing).unwrap());

        let corrupt = dir.path().join("corrupt.json");
        fs::write(&corrupt, "{ not json").unwrap();
        assert!(bandit.load_state(&corrupt).is_err());

        let fresh = BanditReranker::load_or_new(&config(0.1), &corrupt);
        assert_eq!(fresh.total_interactions(), 0);
        assert_eq!(fresh.epsilon(), 0.1);
    }
}
