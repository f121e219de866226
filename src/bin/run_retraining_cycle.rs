// src/bin/run_retraining_cycle.rs
use anyhow::{Context, Result};
use log::info;
use std::sync::Arc;

// Import modules from the main crate
use reranker_lib::{
    ModelRegistry, RerankerConfig, RetrainingScheduler, db,
    remote::{HttpEmbeddingModel, HttpFineTuner},
    scheduler::WakeSource,
    telemetry::MetricsSink,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    info!("Running a single retraining cycle");

    let config = RerankerConfig::from_env();
    let log = db::open_feedback_log(&config.database).await;

    let base_model = HttpEmbeddingModel::new(&config.model_service, config.model_service.base_model.clone())
        .context("Failed to build embedding client")?;
    let registry = Arc::new(ModelRegistry::new(Arc::new(base_model)));
    let fine_tuner = HttpFineTuner::new(&config.model_service).context("Failed to build fine-tuning client")?;

    let mut scheduler = RetrainingScheduler::new(
        log,
        registry.clone(),
        Arc::new(fine_tuner),
        Arc::new(MetricsSink),
        config.scheduler.clone(),
    );
    let outcome = scheduler.run_cycle(WakeSource::Manual).await;

    info!("Cycle outcome: {:?}", outcome);
    info!("Active model after cycle: {:?}", registry.info());

    if outcome.is_failure() {
        anyhow::bail!("Retraining cycle failed: {:?}", outcome);
    }
    Ok(())
}
