// src/lib.rs
pub mod config;
pub mod db;
pub mod embedding;
pub mod errors;
pub mod feedback_log;
pub mod judge;
pub mod models;
pub mod orchestrator;
pub mod registry;
pub mod reinforcement;
pub mod remote;
pub mod scheduler;
pub mod telemetry;

// Re-export common types for easier access
pub use models::{
    Chunk, ChunkId, FeatureSnapshot, QualityEvaluation, QualityLabel, QualityTrend, RatingRow,
    RewardRecord, TriggerDecision,
};

// Re-export important functionality
pub use config::RerankerConfig;
pub use orchestrator::RankingOrchestrator;
pub use registry::{ModelRegistry, ModelVersion};
pub use reinforcement::BanditReranker;
pub use judge::QualityJudge;
pub use scheduler::{RetrainingScheduler, SchedulerHandle};
