// tests/orchestrator_tests.rs

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{BrokenLog, FixedScoreTuner, KeywordEmbedding, ScriptedOracle, UnreachableEmbedding, chunk};
use reranker_lib::config::{BanditConfig, RerankerConfig};
use reranker_lib::embedding::EmbeddingModel;
use reranker_lib::feedback_log::{FeedbackLog, MemoryFeedbackLog};
use reranker_lib::telemetry::NoopSink;
use reranker_lib::{
    BanditReranker, ModelRegistry, QualityJudge, QualityLabel, RankingOrchestrator,
    RetrainingScheduler, TriggerDecision,
};

struct Harness {
    orchestrator: RankingOrchestrator,
    registry: Arc<ModelRegistry>,
    config: RerankerConfig,
    _dir: tempfile::TempDir,
}

fn harness(
    base: Arc<dyn EmbeddingModel>,
    oracle: Arc<ScriptedOracle>,
    log: Arc<dyn FeedbackLog>,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = RerankerConfig::default();
    config.bandit = BanditConfig {
        initial_epsilon: 0.0,
        min_epsilon: 0.0,
        ..BanditConfig::default()
    };
    config.snapshot_path = dir.path().join("bandit_state.json");
    config.scheduler.models_dir = dir.path().join("models");

    let registry = Arc::new(ModelRegistry::new(base));
    let judge = Arc::new(QualityJudge::new(
        oracle,
        log.clone(),
        Arc::new(NoopSink),
        config.judge.clone(),
    ));
    let bandit = BanditReranker::with_seed(&config.bandit, 9);
    let orchestrator = RankingOrchestrator::new(
        bandit,
        judge,
        registry.clone(),
        log,
        Arc::new(NoopSink),
        &config,
    );
    Harness {
        orchestrator,
        registry,
        config,
        _dir: dir,
    }
}

#[tokio::test]
async fn embedding_priors_drive_the_first_ranking() {
    let h = harness(
        KeywordEmbedding::new("base"),
        ScriptedOracle::new(&["[5, 4]"]),
        Arc::new(MemoryFeedbackLog::new()),
    );
    let candidates = vec![
        chunk("cooking", 0.0, "pasta sauce").with_relevance(0.9),
        chunk("talk", 30.0, "rust tokio async").with_relevance(0.1),
    ];

    let response = h.orchestrator.rank("rust tokio", candidates, Some(2)).await;

    assert_eq!(response.model_version, 1);
    assert_eq!(response.results[0].chunk.video_id, "talk");
    assert!(response.results[0].bandit_score > 0.8);
    assert_eq!(response.results[1].bandit_score, 0.0);
    assert_eq!(response.evaluation.mean_score, 4.5);
    assert_eq!(response.evaluation.trigger, TriggerDecision::None);
}

#[tokio::test]
async fn unreachable_embedding_keeps_supplied_scores() {
    let h = harness(
        Arc::new(UnreachableEmbedding),
        ScriptedOracle::new(&["[4, 4]"]),
        Arc::new(MemoryFeedbackLog::new()),
    );
    let candidates = vec![
        chunk("a", 0.0, "rust tokio async").with_relevance(0.2),
        chunk("b", 0.0, "pasta sauce").with_relevance(0.7),
        chunk("c", 0.0, "unscored"),
    ];

    let response = h.orchestrator.rank("rust tokio", candidates, Some(2)).await;

    let order: Vec<&str> = response.results.iter().map(|r| r.chunk.video_id.as_str()).collect();
    assert_eq!(order, vec!["b", "c"]);
    assert_eq!(response.results[0].bandit_score, 0.7);
    assert_eq!(response.results[1].bandit_score, 0.5);
}

#[tokio::test]
async fn empty_candidates_return_no_results() {
    let oracle = ScriptedOracle::new(&["[5]"]);
    let h = harness(
        KeywordEmbedding::new("base"),
        oracle.clone(),
        Arc::new(MemoryFeedbackLog::new()),
    );

    let response = h.orchestrator.rank("anything", Vec::new(), None).await;

    assert!(response.results.is_empty());
    assert_eq!(response.evaluation.label, QualityLabel::NoResults);
    assert_eq!(oracle.call_count(), 0);
    assert_eq!(h.orchestrator.bandit_stats().exploitation_rate, 0.0);
}

#[tokio::test]
async fn feedback_is_learned_and_logged() {
    let log = Arc::new(MemoryFeedbackLog::new());
    let h = harness(KeywordEmbedding::new("base"), ScriptedOracle::down(), log.clone());
    let rated = chunk("talk", 30.0, "rust tokio");

    let first = h.orchestrator.record_feedback(&rated, "rust", 5, Some("s1".into())).await.unwrap();
    let second = h.orchestrator.record_feedback(&rated, "rust", 3, None).await.unwrap();

    assert_eq!(first.reward, 1.0);
    assert_eq!(second.updated_score, 0.75);
    assert_eq!(log.rating_count().await, 2);

    let feedback = h.orchestrator.chunk_feedback(&rated.id()).await.unwrap();
    assert_eq!(feedback.rating_count, 2);
    assert_eq!(feedback.avg_rating, 4.0);

    let stats = h.orchestrator.bandit_stats();
    assert_eq!(stats.total_interactions, 2);
    assert_eq!(stats.chunks_learned, 1);
}

#[tokio::test]
async fn invalid_rating_changes_nothing() {
    let log = Arc::new(MemoryFeedbackLog::new());
    let h = harness(KeywordEmbedding::new("base"), ScriptedOracle::down(), log.clone());
    let rated = chunk("talk", 0.0, "text");

    assert!(h.orchestrator.record_feedback(&rated, "q", 0, None).await.is_err());
    assert!(h.orchestrator.record_feedback(&rated, "q", 6, None).await.is_err());

    assert_eq!(log.rating_count().await, 0);
    assert_eq!(h.orchestrator.bandit_stats().total_interactions, 0);
}

#[tokio::test]
async fn broken_log_does_not_block_feedback_or_ranking() {
    let h = harness(
        KeywordEmbedding::new("base"),
        ScriptedOracle::new(&["[3]"]),
        Arc::new(BrokenLog),
    );
    let rated = chunk("talk", 0.0, "rust");

    let update = h.orchestrator.record_feedback(&rated, "rust", 4, None).await.unwrap();
    assert_eq!(update.reward, 0.75);

    let response = h.orchestrator.rank("rust", vec![rated], None).await;
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.evaluation.label, QualityLabel::Fair);
    assert!(h.orchestrator.chunk_feedback(&response.results[0].chunk.id()).await.is_err());
}

#[tokio::test]
async fn saved_bandit_state_survives_a_restart() {
    let h = harness(
        KeywordEmbedding::new("base"),
        ScriptedOracle::down(),
        Arc::new(MemoryFeedbackLog::new()),
    );
    let rated = chunk("talk", 0.0, "rust");
    for rating in [5, 4, 2] {
        h.orchestrator.record_feedback(&rated, "rust", rating, None).await.unwrap();
    }
    h.orchestrator.save_bandit_state().unwrap();

    let restored = BanditReranker::load_or_new(&h.config.bandit, &h.config.snapshot_path);
    assert_eq!(restored.total_interactions(), 3);
    assert_eq!(restored.score(&rated, "rust"), (1.0 + 0.75 + 0.25) / 3.0);
}

#[tokio::test]
async fn immediate_trigger_retrains_and_swaps_the_model() {
    let log = Arc::new(MemoryFeedbackLog::new());
    let oracle = ScriptedOracle::new(&["[1, 1]"]);
    let tuner = FixedScoreTuner::new(0.42);
    let h = harness(KeywordEmbedding::new("base"), oracle, log.clone());

    let scheduler = RetrainingScheduler::new(
        log.clone(),
        h.registry.clone(),
        tuner.clone(),
        Arc::new(NoopSink),
        h.config.scheduler.clone(),
    );
    let handle = scheduler.spawn();
    let Harness {
        orchestrator,
        registry,
        config,
        _dir,
    } = h;
    let orchestrator = orchestrator.with_trigger(handle.trigger());

    for i in 0..6 {
        let rated = chunk("talk", i as f64 * 5.0, "rust tokio");
        orchestrator.record_feedback(&rated, "rust", if i % 2 == 0 { 5 } else { 1 }, None).await.unwrap();
    }

    let candidates = vec![chunk("x", 0.0, "pasta"), chunk("y", 0.0, "sauce")];
    let response = orchestrator.rank("rust", candidates, None).await;
    assert_eq!(response.evaluation.trigger, TriggerDecision::Immediate);
    assert_eq!(response.model_version, 1);

    tokio::time::timeout(Duration::from_secs(5), async {
        while registry.current_version() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("scheduler never deployed a new model");

    let info = orchestrator.model_info();
    assert_eq!(info.version, 2);
    assert_eq!(info.eval_score, Some(0.42));
    assert_eq!(tuner.call_count(), 1);
    assert!(config.scheduler.models_dir.join("deployment_log.jsonl").exists());

    handle.shutdown().await.unwrap();
}
