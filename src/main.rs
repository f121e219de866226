// src/main.rs
use anyhow::{Context, Result};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;

use reranker_lib::{
    BanditReranker, ModelRegistry, QualityJudge, RankingOrchestrator, RerankerConfig,
    RetrainingScheduler, db,
    judge::OllamaOracle,
    remote::{HttpEmbeddingModel, HttpFineTuner},
    telemetry::{MetricsSink, TelemetrySink},
};

const SNAPSHOT_INTERVAL_SECS: u64 = 300;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    info!("Starting chunk reranker");

    let config = RerankerConfig::from_env();
    let telemetry: Arc<dyn TelemetrySink> = Arc::new(MetricsSink);

    // Durable log (falls back to memory when PostgreSQL is down)
    let log = db::open_feedback_log(&config.database).await;

    // Model registry, starting from the base embedding model
    let base_model = HttpEmbeddingModel::new(&config.model_service, config.model_service.base_model.clone())
        .context("Failed to build embedding client")?;
    let registry = Arc::new(ModelRegistry::new(Arc::new(base_model)));
    info!("Active embedding model: {:?}", registry.info());

    // Quality judge
    let oracle = OllamaOracle::new(&config.oracle).context("Failed to build oracle client")?;
    oracle.check_connection().await;
    let judge = Arc::new(QualityJudge::new(
        Arc::new(oracle),
        log.clone(),
        telemetry.clone(),
        config.judge.clone(),
    ));
    judge.seed_history().await;

    // Bandit, restored from the last snapshot when possible
    let bandit = BanditReranker::load_or_new(&config.bandit, &config.snapshot_path);

    // Retraining scheduler
    let fine_tuner = HttpFineTuner::new(&config.model_service).context("Failed to build fine-tuning client")?;
    let scheduler = RetrainingScheduler::new(
        log.clone(),
        registry.clone(),
        Arc::new(fine_tuner),
        telemetry.clone(),
        config.scheduler.clone(),
    );
    let scheduler_handle = scheduler.spawn();

    let orchestrator = RankingOrchestrator::new(bandit, judge, registry, log, telemetry, &config)
        .with_trigger(scheduler_handle.trigger());

    info!("Chunk reranker is running. Press Ctrl-C to stop.");
    let mut snapshot_timer = tokio::time::interval(Duration::from_secs(SNAPSHOT_INTERVAL_SECS));
    snapshot_timer.tick().await;

    loop {
        tokio::select! {
            _ = snapshot_timer.tick() => {
                if let Err(e) = orchestrator.save_bandit_state() {
                    warn!("Periodic bandit snapshot failed: {:#}", e);
                }
                let stats = orchestrator.stats().await;
                info!(
                    "Bandit: {} interactions, {} chunks learned, epsilon {:.3}; judge trend {}; model v{}",
                    stats.bandit.total_interactions,
                    stats.bandit.chunks_learned,
                    stats.bandit.current_epsilon,
                    stats.judge.trend.as_str(),
                    stats.model.version
                );
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
                break;
            }
        }
    }

    info!("Shutting down");
    if let Err(e) = orchestrator.save_bandit_state() {
        error!("Could not save bandit state on shutdown: {:#}", e);
    }
    scheduler_handle.shutdown().await?;
    info!("Chunk reranker stopped");
    Ok(())
}
