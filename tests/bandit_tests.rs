// tests/bandit_tests.rs

mod common;

use common::chunk;
use reranker_lib::BanditReranker;
use reranker_lib::config::BanditConfig;

fn greedy() -> BanditConfig {
    BanditConfig {
        initial_epsilon: 0.0,
        min_epsilon: 0.0,
        ..BanditConfig::default()
    }
}

#[test]
fn unrated_chunks_score_their_prior() {
    let bandit = BanditReranker::with_seed(&BanditConfig::default(), 1);
    let scored = chunk("a", 0.0, "x").with_relevance(0.73);
    let unscored = chunk("b", 0.0, "y");

    assert_eq!(bandit.score(&scored, "any query"), 0.73);
    assert_eq!(bandit.score(&unscored, "any query"), 0.5);
}

#[test]
fn query_scoped_mean_ignores_global_ratings() {
    let mut bandit = BanditReranker::with_seed(&greedy(), 1);
    let c = chunk("a", 10.0, "x").with_relevance(0.2);

    for _ in 0..3 {
        bandit.update_reward(&c, "other query", 1, None).unwrap();
    }
    bandit.update_reward(&c, "rust", 5, None).unwrap();
    bandit.update_reward(&c, "rust", 4, None).unwrap();

    assert_eq!(bandit.score(&c, "rust"), (1.0 + 0.75) / 2.0);
    assert_eq!(bandit.score(&c, "unseen"), (0.0 * 3.0 + 1.0 + 0.75) / 5.0);
}

#[test]
fn five_then_one_star_averages_to_half() {
    let mut bandit = BanditReranker::with_seed(&greedy(), 1);
    let c = chunk("a", 0.0, "x");
    bandit.update_reward(&c, "q", 5, None).unwrap();
    let update = bandit.update_reward(&c, "q", 1, None).unwrap();
    assert_eq!(update.updated_score, 0.5);
    assert_eq!(bandit.score(&c, "q"), 0.5);
}

#[test]
fn epsilon_never_increases_across_rankings() {
    let config = BanditConfig {
        initial_epsilon: 0.3,
        decay_rate: 0.9,
        min_epsilon: 0.05,
        ..BanditConfig::default()
    };
    let mut bandit = BanditReranker::with_seed(&config, 42);
    let mut previous = bandit.epsilon();
    for round in 0..100 {
        let candidates = vec![chunk("a", round as f64, "x"), chunk("b", round as f64, "y")];
        bandit.select_and_rank(candidates, "q", 1);
        assert!(bandit.epsilon() <= previous);
        assert!(bandit.epsilon() >= 0.05);
        previous = bandit.epsilon();
    }
    assert!((bandit.epsilon() - 0.05).abs() < 1e-12);
}

#[test]
fn learned_rewards_reorder_results() {
    let mut bandit = BanditReranker::with_seed(&greedy(), 1);
    let strong_prior = chunk("a", 0.0, "x").with_relevance(0.9);
    let weak_prior = chunk("b", 0.0, "y").with_relevance(0.3);

    let before = bandit.select_and_rank(vec![strong_prior.clone(), weak_prior.clone()], "q", 2);
    assert_eq!(before[0].chunk.video_id, "a");

    bandit.update_reward(&strong_prior, "q", 1, None).unwrap();
    bandit.update_reward(&weak_prior, "q", 5, None).unwrap();

    let after = bandit.select_and_rank(vec![strong_prior, weak_prior], "q", 2);
    assert_eq!(after[0].chunk.video_id, "b");
    assert_eq!(after[0].bandit_score, 1.0);
}

#[test]
fn performance_stats_report_best_chunks() {
    let mut bandit = BanditReranker::with_seed(&greedy(), 1);
    let good = chunk("good", 0.0, "x");
    let rare = chunk("rare", 0.0, "y");
    for _ in 0..3 {
        bandit.update_reward(&good, "q", 5, None).unwrap();
    }
    bandit.update_reward(&rare, "q", 5, None).unwrap();
    bandit.select_and_rank(vec![good.clone(), rare.clone()], "q", 2);

    let stats = bandit.performance_stats();
    assert_eq!(stats.total_interactions, 4);
    assert_eq!(stats.chunks_learned, 2);
    assert_eq!(stats.queries_learned, 1);
    assert_eq!(stats.avg_recent_reward, Some(1.0));
    assert_eq!(stats.exploration_rate, 0.0);
    assert_eq!(stats.exploitation_rate, 1.0);
    assert_eq!(stats.best_chunks.len(), 1);
    assert_eq!(stats.best_chunks[0].chunk_id, good.id());
}

#[test]
fn snapshot_reload_reproduces_scores() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("bandit_state.json");

    let mut bandit = BanditReranker::with_seed(&BanditConfig::default(), 3);
    let rated: Vec<_> = (0..6)
        .map(|i| chunk(&format!("v{}", i), i as f64 * 2.5, "text").with_relevance(0.1 * i as f64))
        .collect();
    for (i, c) in rated.iter().enumerate() {
        bandit.update_reward(c, "q", (i % 5 + 1) as u8, None).unwrap();
        bandit.update_reward(c, "q", 5, None).unwrap();
        bandit.update_reward(c, "other", 2, None).unwrap();
    }
    bandit.save_state(&path).unwrap();

    let fresh = BanditReranker::load_or_new(&BanditConfig::default(), &path);
    for c in &rated {
        for query in ["q", "other", "never seen"] {
            assert_eq!(fresh.score(c, query), bandit.score(c, query));
        }
    }
    assert_eq!(fresh.total_interactions(), bandit.total_interactions());
}
